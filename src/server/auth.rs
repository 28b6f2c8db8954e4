use chrono::Utc;
use hmac::{ Hmac, Mac };
use sha2::Sha256;

use crate::error::{ MessagingError, Result };

type HmacSha256 = Hmac<Sha256>;

const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Session tokens of the form `<user_id>.<issued_at>.<hex hmac-sha256>`.
///
/// Session management lives outside this service; whoever logs the user in issues the token
/// with the shared secret. Without a secret the signer runs open and a token is just the
/// user id.
#[derive(Clone)]
pub struct SessionSigner {
    secret: Option<String>,
    ttl_secs: i64,
}

impl SessionSigner {
    pub fn new(secret: Option<String>, ttl_secs: u64) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn is_open(&self) -> bool {
        self.secret.is_none()
    }

    fn mac(secret: &str, user_id: &str, issued_at: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e|
            MessagingError::Internal(format!("hmac key: {}", e))
        )?;
        mac.update(format!("{}.{}", user_id, issued_at).as_bytes());
        Ok(mac)
    }

    pub fn issue(&self, user_id: &str) -> Result<String> {
        self.issue_at(user_id, Utc::now().timestamp())
    }

    pub fn issue_at(&self, user_id: &str, issued_at: i64) -> Result<String> {
        match &self.secret {
            None => Ok(user_id.to_string()),
            Some(secret) => {
                let signature = Self::mac(secret, user_id, issued_at)?.finalize().into_bytes();
                Ok(format!("{}.{}.{}", user_id, issued_at, hex::encode(signature)))
            }
        }
    }

    /// Returns the user id the token was issued to.
    pub fn verify(&self, token: &str) -> Result<String> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<String> {
        let secret = match &self.secret {
            None => {
                if token.trim().is_empty() {
                    return Err(MessagingError::Unauthenticated("missing user id".into()));
                }
                return Ok(token.to_string());
            }
            Some(secret) => secret,
        };

        let malformed = || MessagingError::Unauthenticated("malformed token".into());
        let mut parts = token.rsplitn(3, '.');
        let signature = parts.next().ok_or_else(malformed)?;
        let issued_at: i64 = parts
            .next()
            .and_then(|ts| ts.parse().ok())
            .ok_or_else(malformed)?;
        let user_id = parts.next().filter(|u| !u.is_empty()).ok_or_else(malformed)?;

        let age = now.checked_sub(issued_at).ok_or_else(malformed)?;
        if age > self.ttl_secs || age < -MAX_CLOCK_SKEW_SECS {
            return Err(MessagingError::Unauthenticated("token expired".into()));
        }

        let expected = hex::decode(signature).map_err(|_| malformed())?;
        Self::mac(secret, user_id, issued_at)?
            .verify_slice(&expected)
            .map_err(|_| MessagingError::Unauthenticated("bad signature".into()))?;
        Ok(user_id.to_string())
    }
}
