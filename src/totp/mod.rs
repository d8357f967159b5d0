//! TOTP second-factor verification.

use totp_rs::{Algorithm, Secret, TOTP};
use tracing::debug;

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

fn totp(secret: &str) -> Option<TOTP> {
    let bytes = Secret::Encoded(secret.trim().to_uppercase()).to_bytes().ok()?;
    // Stored secrets predate the 128-bit minimum enforced by `TOTP::new`.
    Some(TOTP::new_unchecked(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECONDS,
        bytes,
        None,
        String::new(),
    ))
}

/// Check a 6-digit code against a base32 secret, allowing one step of clock skew.
#[must_use]
pub fn verify_code(secret: &str, code: &str) -> bool {
    let code = code.trim();
    if code.len() != DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let Some(totp) = totp(secret) else {
        debug!("unusable totp secret");
        return false;
    };
    totp.check_current(code).unwrap_or(false)
}
