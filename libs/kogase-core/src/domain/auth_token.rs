use crate::CoreError;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TOKEN_ISSUER: &str = "kogase-api";

/// Server-side record of an issued bearer token. The row is authoritative:
/// a validly signed token without a live row is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, CoreError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| CoreError::Unauthorized("Invalid token subject".into()))
    }
}

/// A freshly signed token together with its bookkeeping row.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub record: AuthToken,
}

/// Signs and validates HS256 bearer tokens.
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: TimeDelta,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: std::time::Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl: TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::hours(24)),
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, CoreError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            iss: TOKEN_ISSUER.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| CoreError::Internal(format!("failed to sign token: {e}")))?;

        let record = AuthToken {
            id: Uuid::new_v4(),
            user_id,
            token: token.clone(),
            expires_at,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        Ok(IssuedToken {
            token,
            expires_at,
            record,
        })
    }

    /// Checks signature, issuer and the time claims. Row lookup is the caller's job.
    pub fn decode(&self, token: &str) -> Result<Claims, CoreError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| CoreError::Unauthorized(format!("Invalid token: {e}")))
    }
}
