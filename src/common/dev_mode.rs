use crate::common::error::Result;
use std::fs;
use std::path::PathBuf;

/// Redirects enrollment records and images into `./dev_data`.
#[derive(Debug, Clone)]
pub struct DevMode {
    enabled: bool,
    base_dir: PathBuf,
}

impl DevMode {
    pub fn new(enabled: bool) -> Result<Self> {
        Self::with_base_dir(enabled, PathBuf::from("./dev_data"))
    }

    pub fn with_base_dir(enabled: bool, base_dir: PathBuf) -> Result<Self> {
        if enabled {
            fs::create_dir_all(base_dir.join("records"))?;
            fs::create_dir_all(base_dir.join("enrollment"))?;

            tracing::info!("Development mode enabled - data will be saved to: {}", base_dir.display());
        }

        Ok(Self { enabled, base_dir })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `None` outside dev mode; callers fall back to system locations.
    pub fn records_dir(&self) -> Option<PathBuf> {
        self.enabled.then(|| self.base_dir.join("records"))
    }

    pub fn enrollment_images_dir(&self) -> Option<PathBuf> {
        self.enabled.then(|| self.base_dir.join("enrollment"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_mode_has_no_dev_dirs() {
        let dev = DevMode::with_base_dir(false, PathBuf::from("/nonexistent")).unwrap();
        assert!(dev.records_dir().is_none());
        assert!(dev.enrollment_images_dir().is_none());
    }

    #[test]
    fn test_enabled_mode_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = DevMode::with_base_dir(true, tmp.path().join("dev")).unwrap();
        assert!(dev.records_dir().unwrap().is_dir());
        assert!(dev.enrollment_images_dir().unwrap().is_dir());
        assert!(dev.is_enabled());
    }
}
