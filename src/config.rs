use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "odocam.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    pub camera: CameraConfig,
    pub picker: PickerConfig,
    pub server: ServerConfig,
    pub paths: PathConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Full URL of the receiver's upload route.
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    /// Exposure settle time before the shutter fires.
    pub warmup_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickerConfig {
    /// Crop picked images to `aspect_width:aspect_height` and return them inline.
    pub crop_to_aspect: bool,
    pub aspect_width: u32,
    pub aspect_height: u32,
    pub quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub upload_folder: PathBuf,
    pub max_content_length: u64,
    pub cors_origins: Vec<String>,
    pub ocr_enabled: bool,
    pub tesseract_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub capture_dir: PathBuf,
    pub config_file: PathBuf,
}

impl PickerConfig {
    pub fn aspect(&self) -> (u32, u32) {
        (self.aspect_width, self.aspect_height)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: ClientConfig {
                endpoint: "http://192.168.1.7:8086/odometer".to_string(),
                timeout_secs: 30,
            },
            camera: CameraConfig {
                width: 1600,
                height: 1200,
                quality: 90,
                warmup_ms: 500,
            },
            picker: PickerConfig {
                crop_to_aspect: true,
                aspect_width: 4,
                aspect_height: 3,
                quality: 95,
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                upload_folder: PathBuf::from("uploads"),
                max_content_length: 2 * 1024 * 1024,
                cors_origins: Vec::new(),
                ocr_enabled: true,
                tesseract_bin: "tesseract".to_string(),
            },
            paths: PathConfig {
                capture_dir: std::env::temp_dir().join("odocam"),
                config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from(DEFAULT_CONFIG_FILE);

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            log::info!("Config file not found, creating default configuration");
            let default_config = Self::default();
            default_config.save()?;
            default_config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| "Failed to parse configuration file")?;

        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_file(&self.paths.config_file)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
            }
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `ODOCAM_*` overrides through `lookup`. Unparseable numbers are logged and skipped.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("ODOCAM_ENDPOINT") {
            self.client.endpoint = endpoint;
        }
        if let Some(host) = lookup("ODOCAM_API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("ODOCAM_API_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => log::warn!("Ignoring invalid ODOCAM_API_PORT: {}", port),
            }
        }
        if let Some(folder) = lookup("ODOCAM_UPLOAD_FOLDER") {
            self.server.upload_folder = PathBuf::from(folder);
        }
        if let Some(limit) = lookup("ODOCAM_MAX_CONTENT_LENGTH") {
            match limit.parse() {
                Ok(limit) => self.server.max_content_length = limit,
                Err(_) => log::warn!("Ignoring invalid ODOCAM_MAX_CONTENT_LENGTH: {}", limit),
            }
        }
        if let Some(origins) = lookup("ODOCAM_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(String::from)
                .collect();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.client.endpoint.starts_with("http://") || self.client.endpoint.starts_with("https://")) {
            return Err(anyhow::anyhow!("Endpoint must be an http(s) URL: {}", self.client.endpoint));
        }

        if self.client.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Client timeout must be positive"));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow::anyhow!("Invalid camera resolution"));
        }

        for quality in [self.camera.quality, self.picker.quality] {
            if quality == 0 || quality > 100 {
                return Err(anyhow::anyhow!("Invalid JPEG quality: {}", quality));
            }
        }

        if self.picker.aspect_width == 0 || self.picker.aspect_height == 0 {
            return Err(anyhow::anyhow!("Invalid picker aspect ratio"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Invalid server port"));
        }

        if self.server.max_content_length == 0 {
            return Err(anyhow::anyhow!("Invalid max content length"));
        }

        Ok(())
    }

    pub fn create_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.capture_dir)
            .with_context(|| format!("Failed to create capture directory: {}",
                self.paths.capture_dir.display()))?;

        std::fs::create_dir_all(&self.server.upload_folder)
            .with_context(|| format!("Failed to create upload folder: {}",
                self.server.upload_folder.display()))?;

        log::info!("Created necessary directories");
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// Configuration builder for easier setup
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.config.client.endpoint = endpoint.to_string();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.client.timeout_secs = secs;
        self
    }

    pub fn camera_resolution(mut self, width: u32, height: u32) -> Self {
        self.config.camera.width = width;
        self.config.camera.height = height;
        self
    }

    pub fn crop_to_aspect(mut self, enabled: bool) -> Self {
        self.config.picker.crop_to_aspect = enabled;
        self
    }

    pub fn bind(mut self, host: &str, port: u16) -> Self {
        self.config.server.host = host.to_string();
        self.config.server.port = port;
        self
    }

    pub fn upload_folder<P: Into<PathBuf>>(mut self, folder: P) -> Self {
        self.config.server.upload_folder = folder.into();
        self
    }

    pub fn max_content_length(mut self, bytes: u64) -> Self {
        self.config.server.max_content_length = bytes;
        self
    }

    pub fn cors_origin(mut self, origin: &str) -> Self {
        self.config.server.cors_origins.push(origin.to_string());
        self
    }

    pub fn ocr_enabled(mut self, enabled: bool) -> Self {
        self.config.server.ocr_enabled = enabled;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// Environment-specific configuration presets
impl Config {
    pub fn field_device() -> Self {
        Config {
            camera: CameraConfig {
                width: 2028,
                height: 1520,
                quality: 90,
                warmup_ms: 800,
            },
            ..Default::default()
        }
    }

    pub fn development_desktop() -> Self {
        Config {
            client: ClientConfig {
                endpoint: "http://127.0.0.1:5000/odometer".to_string(),
                timeout_secs: 10,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                cors_origins: vec!["*".to_string()],
                ..Config::default().server
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client.endpoint, "http://192.168.1.7:8086/odometer");
        assert_eq!(config.server.max_content_length, 2_097_152);
        assert_eq!(config.picker.aspect(), (4, 3));
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .endpoint("https://odo.example.com/odometer")
            .timeout_secs(5)
            .crop_to_aspect(false)
            .bind("127.0.0.1", 8086)
            .cors_origin("http://localhost:8081")
            .build()
            .unwrap();

        assert_eq!(config.client.endpoint, "https://odo.example.com/odometer");
        assert_eq!(config.client.timeout_secs, 5);
        assert!(!config.picker.crop_to_aspect);
        assert_eq!(config.bind_address(), "127.0.0.1:8086");
        assert_eq!(config.server.cors_origins, vec!["http://localhost:8081"]);
    }

    #[test]
    fn test_config_builder_rejects_invalid() {
        assert!(ConfigBuilder::new().camera_resolution(0, 1200).build().is_err());
        assert!(ConfigBuilder::new().max_content_length(0).build().is_err());
        assert!(ConfigBuilder::new().endpoint("192.168.1.7:8086").build().is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.client.endpoint = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config.client.endpoint = "http://example.com/odometer".to_string();
        config.camera.quality = 0;
        assert!(config.validate().is_err());

        config.camera.quality = 90;
        config.picker.aspect_height = 0;
        assert!(config.validate().is_err());

        config.picker.aspect_height = 3;
        config.server.max_content_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("test_config.toml");

        let original_config = Config::field_device();
        original_config.save_to_file(&config_path).unwrap();

        let loaded_config = Config::load_from_file(&config_path).unwrap();

        assert_eq!(original_config.camera.width, loaded_config.camera.width);
        assert_eq!(original_config.client.endpoint, loaded_config.client.endpoint);
        assert_eq!(original_config.server.upload_folder, loaded_config.server.upload_folder);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ODOCAM_ENDPOINT", "http://10.0.0.2:8086/odometer"),
            ("ODOCAM_API_PORT", "8086"),
            ("ODOCAM_MAX_CONTENT_LENGTH", "not-a-number"),
            ("ODOCAM_CORS_ORIGINS", "http://a.test, http://b.test,,"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.client.endpoint, "http://10.0.0.2:8086/odometer");
        assert_eq!(config.server.port, 8086);
        assert_eq!(config.server.max_content_length, 2_097_152);
        assert_eq!(config.server.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_preset_configs() {
        assert!(Config::field_device().validate().is_ok());
        assert!(Config::development_desktop().validate().is_ok());
    }
}
