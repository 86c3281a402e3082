//! Token issuance route
//!
//! `POST /auth/token` exchanges username/password for a bearer token that
//! the WebSocket upgrade accepts. Refusals carry the machine-readable
//! reason so clients can distinguish bad credentials from a misconfigured
//! or unreachable backend.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::services::{AuthReason, AuthService};

/// Shared state for auth route handlers
#[derive(Clone)]
pub struct AuthState {
    pub auth_service: AuthService,
}

pub fn auth_router(state: AuthState) -> Router {
    Router::new()
        .route("/token", post(issue_token))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum TokenResponse {
    #[serde(rename_all = "camelCase")]
    Issued {
        ok: bool,
        token: String,
        expires_at: i64,
    },
    Refused {
        ok: bool,
        reason: AuthReason,
    },
}

async fn issue_token(
    State(state): State<AuthState>,
    Json(request): Json<TokenRequest>,
) -> impl IntoResponse {
    match state
        .auth_service
        .issue_token(&request.username, &request.password)
        .await
    {
        Ok(issued) => (
            StatusCode::OK,
            Json(TokenResponse::Issued {
                ok: true,
                token: issued.token,
                expires_at: issued.expires_at,
            }),
        ),
        Err(reason) => {
            let status = match reason {
                AuthReason::NoSecret => StatusCode::SERVICE_UNAVAILABLE,
                AuthReason::AuthError => StatusCode::BAD_GATEWAY,
                _ => StatusCode::UNAUTHORIZED,
            };
            (status, Json(TokenResponse::Refused { ok: false, reason }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_response_shape() {
        let json = serde_json::to_value(TokenResponse::Issued {
            ok: true,
            token: "a.b".into(),
            expires_at: 1_700_000_000,
        })
        .unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["token"], "a.b");
        assert_eq!(json["expiresAt"], 1_700_000_000);
    }

    #[test]
    fn test_refused_response_shape() {
        let json = serde_json::to_value(TokenResponse::Refused {
            ok: false,
            reason: AuthReason::UserNotFound,
        })
        .unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["reason"], "USER_NOT_FOUND");
    }
}
