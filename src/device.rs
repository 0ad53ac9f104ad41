// MIT License - Copyright (c) 2026 Peter Wright

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;

/// Persistent device identity presented to the cloud.
///
/// The vendor ties OTP device authorization to the identifiers sent at
/// login. They must therefore be stable across restarts: derived
/// deterministically from the account and host, persisted once, and reused
/// on every subsequent login so the authorization sticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentifiers {
    /// Raw device id (64 hex chars).
    pub id_device: String,
    /// Device UUID in uppercase 8-4-4-4-12 form.
    pub uuid: String,
    /// Push-notification (Indigitall) UUID in lowercase 8-4-4-4-12 form.
    pub id_device_indigitall: String,
    pub device_name: String,
    pub device_brand: String,
    pub device_os_version: String,
    pub device_version: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub device_resolution: String,
    pub generated_time: i64,
}

impl DeviceIdentifiers {
    /// Derive a fresh identity for `user` on this host.
    pub fn generate(user: &str, app_version: &str) -> Self {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;

        let id_device = sha256_hex(&format!("{user}_{os}_{arch}"));
        let uuid = format_uuid(&id_device.to_uppercase());
        let indigitall_digest = sha256_hex(&format!("{user}_indigitall_{os}"));
        let id_device_indigitall = format_uuid(&indigitall_digest);

        Self {
            id_device,
            uuid,
            id_device_indigitall,
            device_name: format!("VerisureBridge-{os}"),
            device_brand: "VerisureBridge".to_string(),
            device_os_version: format!("{os} {arch}"),
            device_version: app_version.to_string(),
            device_type: String::new(),
            device_resolution: String::new(),
            generated_time: Utc::now().timestamp(),
        }
    }

    /// Load identifiers from `path`, or derive and persist new ones.
    pub fn load_or_generate(path: &Path, user: &str, app_version: &str) -> Result<Self> {
        if let Some(existing) = Self::load(path)? {
            return Ok(existing);
        }
        debug!("Generating new device identifiers for {user}");
        let identifiers = Self::generate(user, app_version);
        identifiers.save(path)?;
        Ok(identifiers)
    }

    /// Load identifiers from `path`. A missing or unreadable file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&text) {
            Ok(identifiers) => {
                debug!("Device identifiers loaded from {}", path.display());
                Ok(Some(identifiers))
            }
            Err(e) => {
                warn!("Discarding unreadable device file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Persist identifiers to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        debug!("Device identifiers saved to {}", path.display());
        Ok(())
    }
}

/// Path helper mirroring the session file naming.
pub fn device_file_path(storage_dir: &Path, user: &str) -> PathBuf {
    storage_dir.join(format!("device_{user}.json"))
}

fn sha256_hex(input: &str) -> String {
    use std::fmt::Write;
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Format the first 32 chars of a hex digest as 8-4-4-4-12.
fn format_uuid(hex: &str) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
