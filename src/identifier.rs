use base64::{Engine, engine::general_purpose::URL_SAFE};
use sha2::{Digest, Sha256};

use crate::error::ShortenError;

/// Length of every generated identifier.
pub const ID_LEN: usize = 8;

/// Number of digest bytes fed into the encoder.
const PREFIX_LEN: usize = 8;

/// Ensures the URL carries an explicit scheme, defaulting to `http://`.
///
/// Nothing beyond the scheme prefix is checked.
pub fn normalize(raw: &str) -> Result<String, ShortenError> {
    if raw.is_empty() {
        return Err(ShortenError::Validation("URL cannot be empty".to_owned()));
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(raw.to_owned());
    }

    Ok(format!("http://{raw}"))
}

#[must_use]
pub fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Encodes bytes with the URL-safe base64 alphabet, then drops padding and
/// `+`/`/` before keeping the first [`ID_LEN`] characters.
///
/// The character filter runs before truncation. With the URL-safe alphabet
/// it never removes anything but padding, so an 8 byte prefix always yields
/// exactly [`ID_LEN`] characters.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE
        .encode(bytes)
        .chars()
        .filter(|c| !matches!(c, '+' | '/' | '='))
        .take(ID_LEN)
        .collect()
}

/// Derives the short identifier for an already normalized URL.
#[must_use]
pub fn generate(normalized_url: &str) -> String {
    let hash = digest(normalized_url.as_bytes());
    encode(&hash[..PREFIX_LEN])
}
