use std::convert::Infallible;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use modelops::{tasks, ChatChunk, ChatRequest, ModelError};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::SharedState;

pub async fn chat_complete(
    State(st): State<SharedState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let sessions = st.provider.webllm()?.clone();
    if req.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }
    // Fail before the event stream starts rather than inside it.
    if sessions.active_model().is_none() {
        return Err(ModelError::NoSession.into());
    }

    if !req.stream {
        let out = tasks::chat(&sessions, req.messages, req.options).await?;
        return Ok(Json(out).into_response());
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    tokio::spawn(async move {
        let chunks = tx.clone();
        let generate = tasks::stream_chat(
            &sessions,
            req.messages,
            move |text| {
                let body = serde_json::to_string(&ChatChunk::text(text)).unwrap_or_default();
                if chunks.send(Event::default().data(body)).is_err() {
                    debug!("chat client gone, dropping chunk");
                }
            },
            req.options,
        );
        // Dropping `generate` closes the engine stream.
        let last = tokio::select! {
            _ = tx.closed() => {
                info!("chat client disconnected, generation stopped");
                return;
            }
            res = generate => match res {
                Ok(_) => Event::default().data("[DONE]"),
                Err(e) => {
                    warn!(error=%e, "chat stream failed");
                    let body = json!({ "error": e.to_string() }).to_string();
                    Event::default().event("error").data(body)
                }
            },
        };
        if tx.send(last).is_err() {
            debug!("chat client gone before the final event");
        }
    });

    let stream = futures::stream::poll_fn(move |cx| {
        rx.poll_recv(cx).map(|ev| ev.map(Ok::<_, Infallible>))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()).into_response())
}
