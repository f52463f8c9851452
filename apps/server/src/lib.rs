// Re-export modules for library usage
pub mod ai;
pub mod commands;
pub mod config;
pub mod error;
pub mod router;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, Result};
pub use state::AppState;
pub use types::*;
