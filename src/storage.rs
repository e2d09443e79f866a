use anyhow::Result;
use std::path::{Path, PathBuf};

/// Root of finchat's on-disk state (config, logs).
///
/// Can be overridden with `$FINCHAT_HOME`.
pub fn finchat_dir() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FINCHAT_HOME") {
        return Ok(PathBuf::from(path));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("No home directory"))?;
    Ok(home.join(".finchat"))
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
