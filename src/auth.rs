use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    access::resolve_admin_flag,
    config::AppConfig,
    error::{AppError, AppResult},
    state::AppState,
};

const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Claims issued by the sign-in service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, rename = "isAdmin", alias = "is_admin")]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let secret = config.jwt_secret.as_deref()?;
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = config.jwt_issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }
        Some(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|error| {
                tracing::debug!(error = %error, "Rejected access token");
                AppError::Unauthorized("Unauthorized: invalid or expired token.".to_string())
            })
    }
}

/// The resolved caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub viewer: Viewer,
    pub claims: Option<Claims>,
}

/// `None` for anonymous callers. A token that is present but invalid is an
/// error, never a silent downgrade to anonymous.
pub async fn resolve_identity(state: &AppState, headers: &HeaderMap) -> AppResult<Option<Identity>> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(raw_id) = header_str(headers, "x-user-id") {
            let user_id = canonical_user_id(&raw_id);
            let claimed_admin = header_str(headers, "x-user-admin")
                .is_some_and(|value| value.eq_ignore_ascii_case("true") || value == "1");
            let is_admin = resolve_admin_flag(state, &user_id, claimed_admin).await;
            return Ok(Some(Identity {
                viewer: Viewer {
                    id: user_id,
                    is_admin,
                },
                claims: None,
            }));
        }
    }

    let Some(token) = extract_token(headers) else {
        return Ok(None);
    };
    let Some(verifier) = state.jwt.as_ref() else {
        tracing::warn!("Access token presented but JWT_SECRET is not configured");
        return Err(AppError::Unauthorized(
            "Unauthorized: token verification is not configured.".to_string(),
        ));
    };

    let claims = verifier.verify(&token)?;
    if claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: missing user.".to_string(),
        ));
    }
    let user_id = canonical_user_id(&claims.sub);
    let is_admin = resolve_admin_flag(state, &user_id, claims.is_admin).await;
    Ok(Some(Identity {
        viewer: Viewer {
            id: user_id,
            is_admin,
        },
        claims: Some(claims),
    }))
}

/// Stored owner ids come back from Postgres as lowercase hyphenated text, so
/// any id that parses as a UUID is compared in that form.
fn canonical_user_id(raw: &str) -> String {
    let raw = raw.trim();
    Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

pub async fn optional_viewer(state: &AppState, headers: &HeaderMap) -> AppResult<Option<Viewer>> {
    Ok(resolve_identity(state, headers)
        .await?
        .map(|identity| identity.viewer))
}

pub async fn require_identity(state: &AppState, headers: &HeaderMap) -> AppResult<Identity> {
    resolve_identity(state, headers)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: sign in required.".to_string()))
}

pub async fn require_viewer(state: &AppState, headers: &HeaderMap) -> AppResult<Viewer> {
    Ok(require_identity(state, headers).await?.viewer)
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(bearer.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == ACCESS_TOKEN_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
pub(crate) fn issue_test_token(secret: &str, claims: &Claims) -> String {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token encodes")
}
