//! Shared building blocks for govform: layered configuration, the error
//! taxonomy, and the per-session journey document the wizard writes into.

pub mod config;
pub mod document;
pub mod error;
pub mod session;

pub use config::AppConfig;
pub use document::{JourneyDocument, JourneyKey};
pub use error::{WizardError, WizardResult};
pub use session::{HistoryEntry, JourneySession};
