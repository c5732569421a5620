//! The machine record on disk: `<store>/machines/<name>/config.json`.

use std::path::{Path, PathBuf};

use dm_driver::{Driver, MachineBase};
use tracing::debug;

use crate::error::{Error, Result};

pub const RECORD_FILE: &str = "config.json";

pub fn record_path(store: &Path, machine_name: &str) -> PathBuf {
    MachineBase::new(machine_name, store)
        .machine_dir()
        .join(RECORD_FILE)
}

pub async fn load(store: &Path, machine_name: &str) -> Result<Driver> {
    let path = record_path(store, machine_name);
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::MissingMachine(machine_name.to_string()));
        }
        Err(e) => return Err(Error::io(format!("could not read {}", path.display()))(e)),
    };

    let driver: Driver =
        serde_json::from_str(&raw).map_err(|source| Error::Record { path: path.clone(), source })?;
    debug!(path = %path.display(), "loaded machine record");
    Ok(driver.with_version(env!("CARGO_PKG_VERSION")))
}

pub async fn save(driver: &Driver) -> Result<()> {
    let dir = driver.base.machine_dir();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(Error::io(format!("could not create {}", dir.display())))?;

    let path = dir.join(RECORD_FILE);
    let json = serde_json::to_string_pretty(driver).map_err(|source| Error::Record {
        path: path.clone(),
        source,
    })?;
    tokio::fs::write(&path, json)
        .await
        .map_err(Error::io(format!("could not write {}", path.display())))?;
    debug!(path = %path.display(), "saved machine record");
    Ok(())
}

/// Remove the record. A record that is already gone is fine.
pub async fn delete(driver: &Driver) -> Result<()> {
    let path = driver.base.machine_dir().join(RECORD_FILE);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!("could not remove {}", path.display()))(e)),
    }
}
