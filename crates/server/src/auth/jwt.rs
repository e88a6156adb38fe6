// Access-token issuing and verification (HS256).
//
// `verify` checks the signature and shape only. Expiry is deliberately
// NOT enforced here: the HTTP middleware and the WebSocket handshake
// each apply their own `exp > now` policy.

use std::collections::HashMap;

use anyhow::{anyhow, Context};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ISSUER: &str = "projectmanagementapi";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

impl Claims {
    pub fn subject(&self) -> anyhow::Result<Uuid> {
        Uuid::parse_str(&self.sub)
            .with_context(|| format!("token subject '{}' is not a UUID", self.sub))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is the caller's policy decision, not the decoder's.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn generate(
        &self,
        subject: &str,
        expires_at: DateTime<Utc>,
        extra: HashMap<String, String>,
    ) -> anyhow::Result<String> {
        let claims = Claims {
            iss: ISSUER.to_string(),
            sub: subject.to_string(),
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
            extra,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }

    /// Validates the signature and claim shape; signature mismatch,
    /// malformed tokens, and unparseable claims all collapse into one
    /// generic error.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| anyhow!("invalid access token"))
    }
}
