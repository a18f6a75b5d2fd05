//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with zero configuration
//! against a local development server.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;

use duet_shared::constants::{
    PROBE_INTERVAL_SECS, PROBE_TIMEOUT_SECS, PROGRESS_INTERVAL_MS, ROOM_KEY_BITS, ROOM_KEY_ITERATIONS,
};
use duet_shared::crypto::KdfParams;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root used for uploads, attachment URLs and the probe.
    /// Env: `DUET_BASE_URL`
    /// Default: `http://127.0.0.1:3000`
    pub base_url: String,

    /// Application-wide salt of the room key derivation. Every client of a
    /// deployment must use the same value.
    /// Env: `DUET_SALT`
    pub salt: String,

    /// Env: `DUET_KDF_ITERATIONS`
    pub kdf_iterations: u32,

    /// 128, 192 or 256.
    /// Env: `DUET_KEY_BITS`
    pub key_bits: u32,

    /// Minimum spacing of applied progress updates per transfer.
    /// Env: `DUET_PROGRESS_INTERVAL_MS`
    pub progress_interval: Duration,

    /// Env: `DUET_PROBE_INTERVAL_SECS`
    pub probe_interval: Duration,

    /// Env: `DUET_PROBE_TIMEOUT_SECS`
    pub probe_timeout: Duration,

    /// Where downloaded attachments and extracted artwork are written.
    /// Env: `DUET_MEDIA_DIR`
    /// Default: platform data dir + `media`, or `./media`.
    pub media_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let media_dir = ProjectDirs::from("com", "duet", "duet")
            .map(|dirs| dirs.data_dir().join("media"))
            .unwrap_or_else(|| PathBuf::from("./media"));

        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            salt: "duet-room-salt".to_string(),
            kdf_iterations: ROOM_KEY_ITERATIONS,
            key_bits: ROOM_KEY_BITS,
            progress_interval: Duration::from_millis(PROGRESS_INTERVAL_MS),
            probe_interval: Duration::from_secs(PROBE_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
            media_dir,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source, falling back to defaults
    /// for anything missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("DUET_BASE_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.starts_with("http://") || url.starts_with("https://") {
                config.base_url = url.to_string();
            } else {
                tracing::warn!(value = %url, "Invalid DUET_BASE_URL, using default");
            }
        }

        if let Some(salt) = lookup("DUET_SALT") {
            if salt.is_empty() {
                tracing::warn!("Empty DUET_SALT, using default");
            } else {
                config.salt = salt;
            }
        }

        if let Some(n) = parse_var::<u32>(&lookup, "DUET_KDF_ITERATIONS") {
            if n > 0 {
                config.kdf_iterations = n;
            } else {
                tracing::warn!("DUET_KDF_ITERATIONS must be positive, using default");
            }
        }

        if let Some(bits) = parse_var::<u32>(&lookup, "DUET_KEY_BITS") {
            if matches!(bits, 128 | 192 | 256) {
                config.key_bits = bits;
            } else {
                tracing::warn!(value = bits, "Unsupported DUET_KEY_BITS, using default");
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "DUET_PROGRESS_INTERVAL_MS") {
            config.progress_interval = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "DUET_PROBE_INTERVAL_SECS") {
            if secs > 0 {
                config.probe_interval = Duration::from_secs(secs);
            }
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "DUET_PROBE_TIMEOUT_SECS") {
            if secs > 0 {
                config.probe_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(dir) = lookup("DUET_MEDIA_DIR") {
            config.media_dir = PathBuf::from(dir);
        }

        config
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            salt: self.salt.clone(),
            iterations: self.kdf_iterations,
            key_bits: self.key_bits,
        }
    }

    pub fn upload_url(&self) -> String {
        format!("{}{}", self.base_url, duet_shared::constants::UPLOAD_PATH)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid numeric value, using default");
            None
        }
    }
}
