//! Stateless signed tokens: `b64url(json(claims)) "." b64url(hmac_sha256(secret, body))`.
//!
//! There is no server-side session store and no revocation; a token is valid
//! until its `exp` passes.

use base64::alphabet;
use base64::engine::{general_purpose, DecodePaddingMode, Engine as _, GeneralPurpose, GeneralPurposeConfig};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::Claims;
use crate::config::config;
use crate::database::models::Role;

type HmacSha256 = Hmac<Sha256>;

/// Accepts both padded and unpadded input
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Invalid token claims")]
    InvalidClaims,

    #[error("Token expired")]
    Expired,

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
    lifetime: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: impl AsRef<[u8]>, lifetime_hours: u64) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            lifetime: Duration::hours(lifetime_hours as i64),
        }
    }

    pub fn from_config() -> Self {
        let security = &config().security;
        Self::new(&security.auth_secret, security.token_expiry_hours)
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Build claims expiring after the configured lifetime and sign them
    pub fn issue(
        &self,
        subject: &str,
        role: Role,
        tenant_id: i64,
        tenant_slug: &str,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject.to_string(),
            role,
            tenant_id,
            tenant_slug: tenant_slug.to_string(),
            exp: Some((Utc::now() + self.lifetime).timestamp()),
        };
        self.mint(&claims)
    }

    pub fn mint(&self, claims: &Claims) -> Result<String, TokenError> {
        let json = serde_json::to_vec(claims).map_err(|e| TokenError::Encoding(e.to_string()))?;
        let body = general_purpose::URL_SAFE_NO_PAD.encode(json);

        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        let signature = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", body, signature))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let (body, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        if body.is_empty() || signature.is_empty() {
            return Err(TokenError::Malformed);
        }

        let signature = LENIENT_URL_SAFE
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(body.as_bytes());
        // constant-time comparison
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let json = LENIENT_URL_SAFE.decode(body).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| TokenError::InvalidClaims)?;

        if let Some(exp) = claims.exp {
            if exp < Utc::now().timestamp() {
                return Err(TokenError::Expired);
            }
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new("test-secret", 12)
    }

    fn claims(exp: Option<i64>) -> Claims {
        Claims {
            sub: "ADMIN.ACME".to_string(),
            role: Role::Admin,
            tenant_id: 2,
            tenant_slug: "acme".to_string(),
            exp,
        }
    }

    #[test]
    fn verify_returns_minted_claims() {
        let input = claims(Some(Utc::now().timestamp() + 3600));
        let token = codec().mint(&input).unwrap();
        assert_eq!(codec().verify(&token).unwrap(), input);
    }

    #[test]
    fn minted_tokens_are_unpadded() {
        let input = claims(Some(Utc::now().timestamp() + 3600));
        let token = codec().mint(&input).unwrap();
        assert!(!token.contains('='));
        assert_eq!(codec().verify(&token).unwrap(), input);
    }

    #[test]
    fn padded_tokens_still_verify() {
        let json = serde_json::to_vec(&claims(None)).unwrap();
        let body = general_purpose::URL_SAFE.encode(json);
        let mut mac = codec().mac().unwrap();
        mac.update(body.as_bytes());
        let signature = general_purpose::URL_SAFE.encode(mac.finalize().into_bytes());
        assert_eq!(codec().verify(&format!("{}.{}", body, signature)).unwrap(), claims(None));
    }

    #[test]
    fn float_expiry_in_the_past_is_rejected() {
        let json = serde_json::to_vec(&serde_json::json!({
            "sub": "ADMIN.ACME",
            "role": "ADMIN",
            "tenant_id": 2,
            "tenant_slug": "acme",
            "exp": (Utc::now().timestamp() - 10) as f64 + 0.5
        }))
        .unwrap();
        let body = general_purpose::URL_SAFE_NO_PAD.encode(json);
        let mut mac = codec().mac().unwrap();
        mac.update(body.as_bytes());
        let signature = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        assert!(matches!(
            codec().verify(&format!("{}.{}", body, signature)),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn claims_without_expiry_are_accepted() {
        let token = codec().mint(&claims(None)).unwrap();
        assert_eq!(codec().verify(&token).unwrap().exp, None);
    }

    #[test]
    fn rejects_flipped_signature_byte() {
        let token = codec().mint(&claims(None)).unwrap();
        let (body, signature) = token.split_once('.').unwrap();
        let mut raw = LENIENT_URL_SAFE.decode(signature).unwrap();
        raw[0] ^= 0x01;
        let tampered = format!("{}.{}", body, general_purpose::URL_SAFE.encode(raw));
        assert!(matches!(codec().verify(&tampered), Err(TokenError::BadSignature)));
    }

    #[test]
    fn rejects_tampered_body() {
        let token = codec().mint(&claims(None)).unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let mut forged = claims(None);
        forged.role = Role::Superadmin;
        let body = general_purpose::URL_SAFE.encode(serde_json::to_vec(&forged).unwrap());
        assert!(matches!(
            codec().verify(&format!("{}.{}", body, signature)),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let token = codec().mint(&claims(Some(Utc::now().timestamp() - 1))).unwrap();
        assert!(matches!(codec().verify(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn rejects_other_secret_and_garbage() {
        let token = codec().mint(&claims(None)).unwrap();
        assert!(TokenCodec::new("other", 12).verify(&token).is_err());
        assert!(matches!(codec().verify("no-separator"), Err(TokenError::Malformed)));
        assert!(matches!(codec().verify("."), Err(TokenError::Malformed)));
    }

    #[test]
    fn rejects_signed_garbage_body() {
        let body = general_purpose::URL_SAFE.encode(b"not json");
        let mut mac = codec().mac().unwrap();
        mac.update(body.as_bytes());
        let signature = general_purpose::URL_SAFE.encode(mac.finalize().into_bytes());
        assert!(matches!(
            codec().verify(&format!("{}.{}", body, signature)),
            Err(TokenError::InvalidClaims)
        ));
    }

    #[test]
    fn issue_sets_future_expiry() {
        let token = codec().issue("ADMINISTRATOR", Role::Superadmin, 1, "executive").unwrap();
        let claims = codec().verify(&token).unwrap();
        let exp = claims.exp.unwrap();
        let now = Utc::now().timestamp();
        assert!(exp > now + 11 * 3600 && exp <= now + 12 * 3600);
    }
}
