//! Interactive WebSocket client.
//!
//! Connects to one address, prints every connection event as a JSON line
//! and turns stdin lines into sends and control commands.

pub mod app;
pub mod config;
pub mod error;

pub use app::{parse_command, Application, Command};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
