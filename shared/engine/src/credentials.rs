//! Staff sessions kept on the device between launches: one JSON blob per
//! role under a fixed key.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::api::StaffSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Company,
    Admin,
}

impl Slot {
    pub fn key(self) -> &'static str {
        match self {
            Slot::Company => "company-auth",
            Slot::Admin => "admin-auth",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("credential storage: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential blob: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Restored {
    pub company: Option<StaffSession>,
    pub admin: Option<StaffSession>,
}

pub struct CredentialVault {
    dir: PathBuf,
}

impl CredentialVault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, slot: Slot) -> PathBuf {
        self.dir.join(format!("{}.json", slot.key()))
    }

    pub fn save(&self, slot: Slot, session: &StaffSession) -> Result<(), VaultError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(slot), serde_json::to_vec_pretty(session)?)?;
        Ok(())
    }

    pub fn load(&self, slot: Slot) -> Result<Option<StaffSession>, VaultError> {
        match std::fs::read(self.path(slot)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn clear(&self, slot: Slot) -> Result<(), VaultError> {
        match std::fs::remove_file(self.path(slot)) {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    /// Startup restore; an unreadable blob is logged and treated as signed out.
    pub fn restore(&self) -> Restored {
        let load = |slot: Slot| {
            self.load(slot)
                .inspect_err(|err| tracing::warn!(key = slot.key(), %err, "discarding stored credentials"))
                .ok()
                .flatten()
        };
        Restored {
            company: load(Slot::Company),
            admin: load(Slot::Admin),
        }
    }
}
