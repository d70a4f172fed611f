//! Curve25519 overlay identity: generation, base64 codec, key file.
//!
//! Keys are WireGuard-compatible: 32 raw bytes, base64-encoded to the
//! familiar 44-character form. The private key lives in a single file next
//! to the config, mode 600, one line.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::ConfigError;

pub const KEY_FILE_NAME: &str = "private.key";

/// Generate a fresh keypair; returns `(private_b64, public_b64)`.
pub fn generate_keypair() -> (String, String) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (
        STANDARD.encode(secret.to_bytes()),
        STANDARD.encode(public.to_bytes()),
    )
}

/// Derive the base64 public key from a base64 private key.
pub fn derive_public_key(private_b64: &str) -> Result<String, ConfigError> {
    let secret = decode_private(private_b64)?;
    let public = PublicKey::from(&secret);
    Ok(STANDARD.encode(public.to_bytes()))
}

/// Check that a string decodes to exactly 32 key bytes.
pub fn is_valid_key(b64: &str) -> bool {
    matches!(STANDARD.decode(b64.trim()), Ok(bytes) if bytes.len() == 32)
}

fn decode_private(private_b64: &str) -> Result<StaticSecret, ConfigError> {
    let bytes = STANDARD
        .decode(private_b64.trim())
        .map_err(|_| ConfigError::InvalidKey)?;
    let raw: [u8; 32] = bytes.try_into().map_err(|_| ConfigError::InvalidKey)?;
    Ok(StaticSecret::from(raw))
}

/// Read the private key file, trimmed of surrounding whitespace.
pub fn read_key_file(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Write the private key file with mode 600.
pub fn write_key_file(path: &Path, private_b64: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{private_b64}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
