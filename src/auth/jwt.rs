use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::state::AppState;

/// Session token claims: subject email plus timing, nothing else.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

/// Why a token was rejected. Kept internal for logging; callers only ever
/// see a single invalid outcome, so responses cannot be used to probe
/// whether a token is expired versus forged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Malformed,
    Signature,
    Expired,
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let cfg = &state.config.jwt;
        Self::new(&cfg.secret, Duration::from_secs(cfg.ttl_minutes as u64 * 60))
    }
}

impl JwtKeys {
    pub fn new(secret: &str, session_ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            session_ttl,
        }
    }

    /// Mint a session token for this subject with the configured TTL.
    pub fn sign(&self, subject: &str) -> anyhow::Result<String> {
        self.sign_with_ttl(subject, self.session_ttl)
    }

    pub fn sign_with_ttl(&self, subject: &str, ttl: Duration) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(subject = %subject, "session token signed");
        Ok(token)
    }

    /// Verify signature and expiry, returning the subject. The rejection
    /// reason is for logs only; do not surface it past this module.
    pub fn verify(&self, token: &str) -> Result<String, TokenRejection> {
        let mut validation = Validation::default();
        // Strict expiry boundary; the default 60s leeway would keep dead
        // tokens alive.
        validation.leeway = 0;
        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims.sub),
            Err(e) => {
                let rejection = match e.kind() {
                    ErrorKind::ExpiredSignature => TokenRejection::Expired,
                    ErrorKind::InvalidSignature => TokenRejection::Signature,
                    _ => TokenRejection::Malformed,
                };
                debug!(?rejection, "session token rejected");
                Err(rejection)
            }
        }
    }
}
