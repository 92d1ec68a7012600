//! Bearer-token authentication
//!
//! Two accepted credentials: the static shared secret (compared by
//! SHA-256 digest equality, which is constant-time in the secret) and
//! an HS256-signed token verified with `JWT_SECRET`. Failures answer 401
//! with a SCIM Error body.

use crate::config::AuthConfig;
use crate::error::AppError;
use crate::logging::{AuthPrincipal, LogCategory, RequestContext};
use crate::server::AppState;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize)]
struct TokenClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

/// Verify a bearer token against the configured credentials.
pub fn verify_token(auth: &AuthConfig, token: &str) -> Result<AuthPrincipal, String> {
    if let Some(secret) = &auth.shared_secret {
        if digest(token) == digest(secret) {
            return Ok(AuthPrincipal {
                auth_type: "shared-secret".to_string(),
                client_id: None,
            });
        }
    }
    if let Some(jwt_secret) = &auth.jwt_secret {
        let key = DecodingKey::from_secret(jwt_secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        // Connectors put their own audiences in tokens; the principal is
        // derived from sub/client_id, not aud.
        validation.validate_aud = false;
        match decode::<TokenClaims>(token, &key, &validation) {
            Ok(data) => {
                return Ok(AuthPrincipal {
                    auth_type: "jwt".to_string(),
                    client_id: data.claims.client_id.or(data.claims.sub),
                });
            }
            Err(_) if auth.shared_secret.is_some() => {
                return Err("Invalid bearer token".to_string())
            }
            Err(e) => return Err(format!("Invalid or expired token: {}", e)),
        }
    }
    Err("Invalid bearer token".to_string())
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = request.extensions().get::<RequestContext>().cloned();

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let Some(token) = token else {
        state.logger.warn(
            LogCategory::Auth,
            ctx.as_ref(),
            "Request rejected: missing bearer token",
        );
        return AppError::Unauthorized("Missing or invalid Authorization header".to_string())
            .into_response();
    };

    match verify_token(&state.config.auth, &token) {
        Ok(principal) => {
            if let Some(ctx) = request.extensions_mut().get_mut::<RequestContext>() {
                ctx.principal = Some(principal);
            }
            next.run(request).await
        }
        Err(detail) => {
            state.logger.warn(
                LogCategory::Auth,
                ctx.as_ref(),
                format!("Request rejected: {}", detail),
            );
            AppError::Unauthorized(detail).into_response()
        }
    }
}
