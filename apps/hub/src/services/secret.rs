//! Token secret resolution
//!
//! The signing secret is resolved once per process: the contents of the
//! file named by `HEARTH_SECRET_FILE` win, falling back to the
//! `HEARTH_TOKEN_SECRET` environment variable. Whether absence is fatal is
//! the config layer's call; here it just yields `None`.

use once_cell::sync::OnceCell;

static SECRET: OnceCell<Option<String>> = OnceCell::new();

/// The cached token signing secret, if one is configured
pub fn token_secret() -> Option<&'static str> {
    SECRET.get_or_init(load).as_deref()
}

fn load() -> Option<String> {
    if let Ok(path) = std::env::var("HEARTH_SECRET_FILE") {
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let secret = contents.trim().to_string();
                if !secret.is_empty() {
                    tracing::debug!(path = %path, "Token secret loaded from file");
                    return Some(secret);
                }
                tracing::warn!(path = %path, "Secret file is empty, falling back to environment");
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Could not read secret file, falling back to environment");
            }
        }
    }
    std::env::var("HEARTH_TOKEN_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
}
