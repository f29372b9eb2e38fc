#![warn(clippy::unwrap_used)]

//! HTTP bootstrap for govform wizards: sessions, flags, headers, template
//! rendering, translations and error pages around an axum router.

pub mod errors;
pub mod flags;
pub mod headers;
pub mod health;
pub mod i18n;
pub mod render;
pub mod routes;
pub mod server;
pub mod session;
pub mod telemetry;

pub use errors::{AppError, ErrorPage};
pub use flags::{redirect_if_disabled, redirect_if_enabled, route_if, Flags};
pub use i18n::Translator;
pub use render::{HandlebarsRenderer, Renderer};
pub use server::{setup, start_metrics, App, AppState, SetupOptions};
pub use session::Session;
