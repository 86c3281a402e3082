//! File-backed credential store
//!
//! Accounts live in a small JSON file of the form
//! `{"users": {"admin": {"password_sha256": "...", "disabled": false}}}`.
//! Passwords are stored as lowercase hex SHA-256 digests. This backend
//! targets the single-box installs the hub is built for; anything bigger
//! plugs in its own [`CredentialBackend`].

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::auth::{CredentialBackend, CredentialError, UserAccount};

#[derive(Debug, Clone, Deserialize)]
struct StoredUser {
    #[serde(default)]
    disabled: bool,
    password_sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    users: HashMap<String, StoredUser>,
}

/// Credential backend reading a static JSON user file at startup
pub struct FileCredentials {
    users: HashMap<String, StoredUser>,
}

impl FileCredentials {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CredentialError(format!("cannot read {}: {e}", path.display())))?;
        let file: CredentialFile = serde_json::from_str(&raw)
            .map_err(|e| CredentialError(format!("cannot parse {}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), users = file.users.len(), "Credential file loaded");
        Ok(Self { users: file.users })
    }
}

#[async_trait::async_trait]
impl CredentialBackend for FileCredentials {
    async fn lookup(&self, user: &str) -> Result<Option<UserAccount>, CredentialError> {
        Ok(self.users.get(user).map(|u| UserAccount {
            disabled: u.disabled,
            has_password: u.password_sha256.is_some(),
        }))
    }

    async fn check_password(&self, user: &str, password: &str) -> Result<bool, CredentialError> {
        let Some(stored) = self.users.get(user).and_then(|u| u.password_sha256.as_deref())
        else {
            return Ok(false);
        };
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Ok(digest == stored.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> FileCredentials {
        // sha256("hunter2")
        let file: CredentialFile = serde_json::from_str(
            r#"{
                "users": {
                    "admin": {"password_sha256": "F52FBD32B2B3B86FF88EF6C490628285F482AF15DDCB29541F94BCF526A3F6C7"},
                    "kiosk": {},
                    "old": {"password_sha256": "abc", "disabled": true}
                }
            }"#,
        )
        .unwrap();
        FileCredentials { users: file.users }
    }

    #[tokio::test]
    async fn test_lookup() {
        let creds = backend();

        let admin = creds.lookup("admin").await.unwrap().unwrap();
        assert!(!admin.disabled);
        assert!(admin.has_password);

        let kiosk = creds.lookup("kiosk").await.unwrap().unwrap();
        assert!(!kiosk.has_password);

        let old = creds.lookup("old").await.unwrap().unwrap();
        assert!(old.disabled);

        assert!(creds.lookup("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"{"users": {"admin": {"password_sha256": "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7"}}}"#,
        )
        .unwrap();

        let creds = FileCredentials::load(&path).unwrap();
        assert!(creds.check_password("admin", "hunter2").await.unwrap());

        assert!(FileCredentials::load(dir.path().join("missing.json")).is_err());
    }

    #[tokio::test]
    async fn test_check_password_case_insensitive_digest() {
        let creds = backend();
        assert!(creds.check_password("admin", "hunter2").await.unwrap());
        assert!(!creds.check_password("admin", "hunter3").await.unwrap());
        assert!(!creds.check_password("kiosk", "anything").await.unwrap());
        assert!(!creds.check_password("nobody", "x").await.unwrap());
    }
}
