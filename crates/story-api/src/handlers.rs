//! Request handlers.

pub mod credits;
pub mod health;
pub mod models;
pub mod previews;
pub mod stories;
pub mod webhooks;

pub use credits::*;
pub use health::*;
pub use models::*;
pub use previews::*;
pub use stories::*;
pub use webhooks::*;
