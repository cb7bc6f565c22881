//! Caller identity resolved from an optional bearer token.

use crate::config::AuthConfig;
use crate::error::{AppError, AppErrorKind, AppResult, AuthError};
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header, request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// `customer`, `staff` or `admin`
    pub role: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Who is making the request. Handlers pass this into services explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerContext {
    Guest,
    Customer { user_id: Uuid },
    Staff { user_id: Uuid },
}

impl CallerContext {
    pub fn is_staff(&self) -> bool {
        matches!(self, CallerContext::Staff { .. })
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            CallerContext::Guest => None,
            CallerContext::Customer { user_id } | CallerContext::Staff { user_id } => {
                Some(*user_id)
            }
        }
    }

    pub fn require_staff(&self) -> AppResult<()> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::forbidden("staff role required"))
        }
    }

    /// Staff may act on any order, customers on their own, guests on guest orders.
    pub fn ensure_can_access(&self, order_owner: Option<Uuid>) -> AppResult<()> {
        let allowed = match (self, order_owner) {
            (CallerContext::Staff { .. }, _) => true,
            (CallerContext::Customer { user_id }, Some(owner)) => *user_id == owner,
            (CallerContext::Guest, None) => true,
            _ => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(AppError::forbidden("order belongs to another customer"))
        }
    }

    /// Access check for requests that name an order. Guest order ids are
    /// sequential, so guests must also present the order reference.
    pub fn ensure_can_claim(
        &self,
        order_owner: Option<Uuid>,
        reference: &str,
        presented: Option<&str>,
    ) -> AppResult<()> {
        self.ensure_can_access(order_owner)?;
        match (self, presented.map(str::trim)) {
            (_, Some(presented)) if presented != reference => {
                Err(AppError::forbidden("order reference does not match"))
            }
            (CallerContext::Guest, None) => Err(AppError::forbidden(
                "guests must identify the order by its order_reference",
            )),
            _ => Ok(()),
        }
    }

    fn from_claims(claims: &Claims) -> AppResult<Self> {
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| invalid_token("subject is not a UUID"))?;
        match claims.role.to_lowercase().as_str() {
            "customer" => Ok(CallerContext::Customer { user_id }),
            "staff" | "admin" => Ok(CallerContext::Staff { user_id }),
            other => Err(invalid_token(&format!("unknown role '{}'", other))),
        }
    }
}

fn invalid_token(reason: &str) -> AppError {
    AppError::new(AppErrorKind::Authentication(AuthError::InvalidToken {
        reason: reason.to_string(),
    }))
}

/// HS256 token codec built once from configuration.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
}

impl TokenVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::default();
        if let Some(issuer) = &config.jwt_issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
        }
    }

    pub fn verify(&self, token: &str) -> AppResult<CallerContext> {
        let decoded = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| invalid_token(&e.to_string()))?;
        CallerContext::from_claims(&decoded.claims)
    }

    /// Signs a token for `user_id`. Login lives outside this service; this is
    /// used by operational tooling and tests.
    pub fn issue(&self, user_id: Uuid, role: &str, ttl: chrono::Duration) -> AppResult<String> {
        let expiration = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| AppError::internal("failed to compute token expiration"))?;
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            exp: expiration.timestamp() as usize,
            iss: self.issuer.clone(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::internal(format!("failed to sign token: {}", e)))
    }
}

impl<S> FromRequestParts<S> for CallerContext
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = crate::middleware::error::get_request_id_from_headers(&parts.headers);
        let with_id = |err: AppError| match &request_id {
            Some(id) => err.with_request_id(id.clone()),
            None => err,
        };

        let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(CallerContext::Guest);
        };

        let auth_str = auth_header
            .to_str()
            .map_err(|_| with_id(invalid_token("authorization header is not ASCII")))?;
        let token = auth_str
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| with_id(invalid_token("expected a Bearer token")))?;

        let verifier = Arc::<TokenVerifier>::from_ref(state);
        verifier.verify(token).map_err(with_id)
    }
}
