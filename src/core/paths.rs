use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "DATACENTER_HOME";

/// Base config directory. `$DATACENTER_HOME` wins, then `~/.config/datacenter/`.
pub fn root() -> Result<PathBuf> {
    if let Ok(dir) = env::var(HOME_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(&dir).to_string()));
        }
    }

    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("datacenter"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("datacenter"))
    }
}

/// Global settings file (datacenter.json)
pub fn settings(root: &Path) -> PathBuf {
    root.join("datacenter.json")
}

/// Directory holding one JSON file per record of a kind
pub fn entity_dir(root: &Path, dir_name: &str) -> PathBuf {
    root.join(dir_name)
}

pub fn entity_file(root: &Path, dir_name: &str, id: &str) -> PathBuf {
    entity_dir(root, dir_name).join(format!("{}.json", id))
}
