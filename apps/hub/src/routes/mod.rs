//! HTTP route handlers for the hub

pub mod auth;
pub mod health;

pub use auth::{auth_router, AuthState};
pub use health::{health_router, HealthState};
