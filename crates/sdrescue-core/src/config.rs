/// Server configuration
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server listens on
    pub bind: SocketAddr,
    /// Block device node or image file of the medium
    pub device: PathBuf,
    /// Directory where the medium's filesystem is mounted
    pub root: PathBuf,
    /// Sector size used for raw reads
    pub sector_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            device: PathBuf::from("/dev/mmcblk0"),
            root: PathBuf::from("/mnt/sdcard"),
            sector_size: DEFAULT_SECTOR_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load a JSON configuration file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ServerConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sector_size == 0 {
            anyhow::bail!("sector_size must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sdrescue.json");
        std::fs::write(&path, r#"{ "device": "/dev/sdb", "sector_size": 4096 }"#).unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.device, PathBuf::from("/dev/sdb"));
        assert_eq!(config.sector_size, 4096);
        assert_eq!(config.root, ServerConfig::default().root);
        assert_eq!(config.bind.port(), 8080);
    }

    #[test]
    fn test_zero_sector_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "sector_size": 0 }"#).unwrap();
        assert!(ServerConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(ServerConfig::from_file("/nonexistent/sdrescue.json").is_err());
    }
}
