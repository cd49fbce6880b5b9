pub mod active;
pub mod error;
pub mod input;
pub mod inventory;
pub mod provider;
pub mod runtime;
pub mod schema;
pub mod store;
pub mod tasks;

pub use active::*;
pub use error::*;
pub use input::*;
pub use provider::*;
pub use runtime::*;
pub use schema::*;
pub use store::*;
