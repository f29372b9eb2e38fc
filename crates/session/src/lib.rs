#![warn(clippy::unwrap_used)]

pub mod client;
pub mod cookie;
pub mod local;
pub mod store;

pub use client::RedisSessionStore;
pub use cookie::CookieSigner;
pub use local::MemorySessionStore;
pub use store::{connect, SessionError, SessionStore};
