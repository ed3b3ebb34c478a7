//! Request handlers.

pub mod health;
pub mod stories;
pub mod webhooks;

pub use health::*;
pub use stories::*;
pub use webhooks::*;
