use anyhow::{bail, Context, Result};
use modelops::ProviderConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Base URL of the transformer pipeline backend.
    pub pipeline_url: String,
    /// Base URL of the OpenAI-compatible chat backend.
    pub llm_url: String,
    pub bind_addr: String,
    pub provider: ProviderConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| var(key).with_context(|| format!("Missing required env var: {key}"));

        let pipeline_url = get("PIPELINE_URL")?;
        let llm_url = var("LLM_URL").unwrap_or_else(|| "http://127.0.0.1:1234".to_string());
        let bind_addr = var("BRIDGE_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let defaults = ProviderConfig::default();
        let provider = ProviderConfig {
            module_url: var("TRANSFORMERS_MODULE_URL").unwrap_or(defaults.module_url),
            load_timeout_ms: number(&var, "LOAD_TIMEOUT_MS")?.unwrap_or(defaults.load_timeout_ms),
            max_retries: number(&var, "MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            nonce: var("SCRIPT_NONCE").filter(|n| !n.is_empty()),
            enable_webllm: var("ENABLE_WEBLLM").map(|v| flag(&v)).unwrap_or(defaults.enable_webllm),
            webllm_module_url: var("WEBLLM_MODULE_URL").unwrap_or(defaults.webllm_module_url),
            default_llm_model: var("DEFAULT_LLM_MODEL").unwrap_or(defaults.default_llm_model),
            model_retry_count: number(&var, "MODEL_RETRY_COUNT")?
                .unwrap_or(defaults.model_retry_count),
        };

        // Tiny sanity checks (fail fast, fail loud)
        for (key, url) in [("PIPELINE_URL", &pipeline_url), ("LLM_URL", &llm_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("{key} must start with http:// or https://");
            }
        }
        if provider.max_retries == 0 {
            bail!("MAX_RETRIES must be at least 1");
        }

        Ok(Self {
            pipeline_url: pipeline_url.trim_end_matches('/').to_string(),
            llm_url: llm_url.trim_end_matches('/').to_string(),
            bind_addr,
            provider,
        })
    }
}

fn flag(v: &str) -> bool {
    matches!(v, "1" | "true" | "TRUE" | "yes" | "YES")
}

fn number<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse() {
            Ok(v) => Ok(Some(v)),
            Err(e) => bail!("{key} is not a valid number ({raw:?}): {e}"),
        },
    }
}
