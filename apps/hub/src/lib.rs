//! Hearth hub library
//!
//! Exposes the core components for use in integration tests and as a
//! library.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod websocket;

pub use config::Config;
pub use error::{ErrorResponse, HubError, HubResult};
pub use services::{AuthReason, AuthService, CredentialBackend};
pub use websocket::{SessionEngine, SessionSettings};
