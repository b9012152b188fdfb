//! PBKDF2-HMAC-SHA256 password hashing for stored identities.

use rand::RngCore;
use ring::pbkdf2;
use std::num::NonZeroU32;

pub const PBKDF2_ITERATIONS: u32 = 120_000;
const SALT_BYTES: usize = 16;
const DIGEST_BYTES: usize = 32;

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Salt and digest as stored in `users.password_salt` / `users.password_hash`
#[derive(Debug, Clone)]
pub struct PasswordHash {
    pub salt: String,
    pub hash: String,
}

fn iterations() -> NonZeroU32 {
    NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN)
}

/// Hash with a fresh random salt. Both salt and digest are stored hex-encoded;
/// the key derivation runs over the decoded salt bytes.
pub fn hash_password(password: &str) -> PasswordHash {
    let mut raw_salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut raw_salt);
    PasswordHash {
        salt: hex::encode(raw_salt),
        hash: derive(password, &raw_salt),
    }
}

fn derive(password: &str, salt: &[u8]) -> String {
    let mut out = [0u8; DIGEST_BYTES];
    pbkdf2::derive(ALGORITHM, iterations(), salt, password.as_bytes(), &mut out);
    hex::encode(out)
}

/// Constant-time comparison against a stored salt/digest pair. A salt or
/// digest that is not valid hex never matches.
pub fn verify_password(password: &str, salt: &str, hash: &str) -> bool {
    let (Ok(salt), Ok(expected)) = (hex::decode(salt.trim()), hex::decode(hash.trim())) else {
        return false;
    };
    pbkdf2::verify(ALGORITHM, iterations(), &salt, password.as_bytes(), &expected).is_ok()
}
