use anyhow::{Context, Result};
use presence_core::wizard::{DEFAULT_MIN_SAMPLES, DEFAULT_SUCCESS_DISPLAY};
use presence_core::WizardConfig;
use presence_hw::StreamSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration: defaults, then the TOML file, then `PRESENCE_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the attendance API, including the `/api` prefix.
    pub api_url: String,
    /// Where the login token and identity are kept between runs.
    pub session_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub request_timeout_secs: u64,
    /// Samples required before batch registration is allowed.
    pub min_samples: usize,
    /// How long a success result stays on screen before the wizard idles.
    pub success_display_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: presence_api::DEFAULT_BASE_URL.to_string(),
            session_path: data_dir().join("session.json"),
            camera_device: "/dev/video0".to_string(),
            request_timeout_secs: presence_api::DEFAULT_TIMEOUT.as_secs(),
            min_samples: DEFAULT_MIN_SAMPLES,
            success_display_ms: DEFAULT_SUCCESS_DISPLAY.as_millis() as u64,
            jpeg_quality: 90,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("PRESENCE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        tracing::debug!(config_file = %path.display(), api_url = %config.api_url, "config loaded");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&src).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Overlay `PRESENCE_*` values. Unparseable numbers keep the current value.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("PRESENCE_API_URL") {
            self.api_url = url;
        }
        if let Some(path) = get("PRESENCE_SESSION_PATH") {
            self.session_path = PathBuf::from(path);
        }
        if let Some(device) = get("PRESENCE_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        self.request_timeout_secs = parsed(
            &get,
            "PRESENCE_REQUEST_TIMEOUT_SECS",
            self.request_timeout_secs,
        );
        self.min_samples = parsed(&get, "PRESENCE_MIN_SAMPLES", self.min_samples);
        self.success_display_ms =
            parsed(&get, "PRESENCE_SUCCESS_DISPLAY_MS", self.success_display_ms);
        self.jpeg_quality = parsed(&get, "PRESENCE_JPEG_QUALITY", self.jpeg_quality).clamp(1, 100);
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn wizard_config(&self) -> WizardConfig {
        WizardConfig {
            min_samples: self.min_samples,
            success_display: Duration::from_millis(self.success_display_ms),
            ..WizardConfig::default()
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            jpeg_quality: self.jpeg_quality,
            ..StreamSettings::default()
        }
    }
}

fn parsed<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    current: T,
) -> T {
    match get(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable setting");
                current
            }
        },
        None => current,
    }
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("presence")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
        .join("presence")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:5000/api");
        assert_eq!(config.min_samples, 5);
        assert_eq!(config.success_display_ms, 2000);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.session_path.ends_with("presence/session.json"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "api_url = \"https://attendance.example.edu/api\"\nmin_samples = 8\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.api_url, "https://attendance.example.edu/api");
        assert_eq!(config.min_samples, 8);
        assert_eq!(config.camera_device, "/dev/video0");
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_ur = \"typo\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PRESENCE_API_URL", "http://10.0.0.2:5000/api"),
            ("PRESENCE_MIN_SAMPLES", "3"),
            ("PRESENCE_REQUEST_TIMEOUT_SECS", "soon"),
            ("PRESENCE_JPEG_QUALITY", "250"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_url, "http://10.0.0.2:5000/api");
        assert_eq!(config.min_samples, 3);
        assert_eq!(config.request_timeout_secs, 30);
        // 250 does not fit in a u8, so the default stays.
        assert_eq!(config.jpeg_quality, 90);
    }

    #[test]
    fn test_wizard_config_carries_settings() {
        let config = Config {
            min_samples: 7,
            success_display_ms: 500,
            ..Config::default()
        };
        let wizard = config.wizard_config();
        assert_eq!(wizard.min_samples, 7);
        assert_eq!(wizard.success_display, Duration::from_millis(500));
        assert_eq!(wizard.prompts.len(), 10);
    }
}
