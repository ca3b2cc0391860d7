//! Service layer: database access and domain rules behind the handlers.

mod ads;
mod auth;
mod chat_hub;
mod google;
mod messages;
mod points;
mod storage;

pub use ads::*;
pub use auth::*;
pub use chat_hub::*;
pub use google::*;
pub use messages::*;
pub use points::*;
pub use storage::*;
