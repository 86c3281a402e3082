//! Hub services

pub mod auth;
pub mod credentials;
pub mod secret;

pub use auth::{AuthReason, AuthService, CredentialBackend, CredentialError, UserAccount};
pub use credentials::FileCredentials;
