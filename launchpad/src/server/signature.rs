//! Webhook signatures: HMAC-SHA256 over the raw request body

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::errors::LaunchpadError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex digest>`
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify `header` against `body`. The digest comparison is constant time.
///
/// The error message never names a target or echoes the expected digest.
pub fn verify(secret: &SecretString, body: &[u8], header: Option<&str>) -> Result<(), LaunchpadError> {
    let secret = secret.expose_secret();
    if secret.is_empty() {
        return Err(LaunchpadError::AuthenticationFailure(
            "webhook secret is not configured".to_string(),
        ));
    }

    let header = header.ok_or_else(|| LaunchpadError::AuthenticationFailure("missing signature".to_string()))?;
    let digest = header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
        .ok_or_else(|| LaunchpadError::AuthenticationFailure("malformed signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| LaunchpadError::Internal(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&digest)
        .map_err(|_| LaunchpadError::AuthenticationFailure("invalid signature".to_string()))
}

/// `sha256=<hex>` header value for `body`
pub fn sign(secret: &str, body: &[u8]) -> Result<String, LaunchpadError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| LaunchpadError::Internal(e.to_string()))?;
    mac.update(body);
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes())))
}
