use anyhow::{Context, Result};
use std::{env, path::PathBuf, sync::OnceLock, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP server configuration
    pub ui: UiConfig,

    /// Controller communication configuration
    pub device: DeviceConfig,

    /// Path configuration
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct UiConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub request_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub data_dir: PathBuf,
    pub entries_file: PathBuf,
    pub import_config_file: PathBuf,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. On first call, it loads
    /// and validates all configuration from environment variables. Subsequent
    /// calls return the cached instance.
    ///
    /// # Panics
    /// Panics if configuration loading fails. The service cannot run without a
    /// usable data directory.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| {
            Self::load_internal().expect("failed to load application configuration")
        })
    }

    fn load_internal() -> Result<Self> {
        let ui = UiConfig::load()?;
        let device = DeviceConfig::load()?;
        let paths = PathConfig::load()?;

        Ok(Self { ui, device, paths })
    }
}

impl UiConfig {
    fn load() -> Result<Self> {
        let bind_address = env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("UI_PORT")
            .unwrap_or_else(|_| "8099".to_string())
            .parse::<u16>()
            .context("failed to parse UI_PORT: invalid format")?;

        Ok(Self { bind_address, port })
    }
}

impl DeviceConfig {
    fn load() -> Result<Self> {
        let secs = env::var("DEVICE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .context("failed to parse DEVICE_TIMEOUT_SECS: invalid format")?;

        anyhow::ensure!(secs > 0, "DEVICE_TIMEOUT_SECS must be greater than zero");

        Ok(Self {
            request_timeout: Duration::from_secs(secs),
        })
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let data_dir = Self::data_dir();

        std::fs::create_dir_all(&data_dir)
            .context(format!("failed to create data directory: {data_dir:?}"))?;

        let entries_file = data_dir.join("touchline_entries.json");
        let import_config_file = env::var("IMPORT_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("touchline.ini"));

        Ok(Self {
            data_dir,
            entries_file,
            import_config_file,
        })
    }

    #[cfg(not(any(test, feature = "mock")))]
    fn data_dir() -> PathBuf {
        env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/data/"))
    }

    // In test mode, use temp directory to avoid /data requirement
    #[cfg(any(test, feature = "mock"))]
    fn data_dir() -> PathBuf {
        std::env::temp_dir().join("touchline-setup-test")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_uses_temp_data_dir() {
        let paths = &AppConfig::get().paths;
        assert!(paths.data_dir.starts_with(std::env::temp_dir()));
        assert!(paths.data_dir.exists());
    }

    #[test]
    fn entries_file_lives_in_data_dir() {
        let paths = &AppConfig::get().paths;
        assert_eq!(
            paths.entries_file,
            paths.data_dir.join("touchline_entries.json")
        );
    }

    #[test]
    fn device_timeout_is_positive() {
        assert!(!AppConfig::get().device.request_timeout.is_zero());
    }
}
