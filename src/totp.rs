//! Authenticator codes for the TOTP 2FA path.

use anyhow::{anyhow, Result};
use secrecy::{ExposeSecret, SecretString};
use totp_rs::{Algorithm, Secret, TOTP};

/// Standard authenticator-app parameters: SHA-1, 6 digits, 30 s step.
const DIGITS: usize = 6;
const STEP_SECS: u64 = 30;

fn build(secret: &SecretString) -> Result<TOTP> {
    // Authenticator exports often carry spaces, lowercase or padding.
    let normalized: String = secret
        .expose_secret()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let bytes = Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|e| anyhow!("TOTP secret is not valid base32: {e:?}"))?;
    Ok(TOTP::new_unchecked(Algorithm::SHA1, DIGITS, 1, STEP_SECS, bytes))
}

/// Code for the given Unix time.
pub fn code_at(secret: &SecretString, unix_secs: u64) -> Result<String> {
    Ok(build(secret)?.generate(unix_secs))
}

/// Code for right now.
pub fn current_code(secret: &SecretString) -> Result<String> {
    let now = chrono::Utc::now().timestamp();
    let now = u64::try_from(now).map_err(|_| anyhow!("system clock is before the Unix epoch"))?;
    code_at(secret, now)
}
