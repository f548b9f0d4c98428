//! Configuration: device families (JSON) and tool defaults (TOML).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::constants::{
    DEFAULT_APP_START, DEFAULT_BAUD_RATE, DEFAULT_ERASE_BLOCK_SIZE, DEFAULT_PRODUCT_ID,
    DEFAULT_VENDOR_ID,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid TOML: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("Cannot serialize TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Unknown device family: {0}")]
    UnknownFamily(String),
    #[error("Invalid device family {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Flash layout of one device family, as read from the families file.
///
/// ```json
/// [{ "name": "PIC32MZ", "appStartAddress": 2638217216, "eraseBlockSize": 16384 }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFamily {
    pub name: String,
    pub app_start_address: u32,
    pub erase_block_size: u32,
}

impl Default for DeviceFamily {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            app_start_address: DEFAULT_APP_START,
            erase_block_size: DEFAULT_ERASE_BLOCK_SIZE,
        }
    }
}

impl DeviceFamily {
    /// Parse and validate a JSON array of families.
    pub fn parse_all(json: &str) -> Result<Vec<Self>, ConfigError> {
        let families: Vec<Self> = serde_json::from_str(json)?;
        for family in &families {
            family.validate()?;
        }
        Ok(families)
    }

    /// Load all families from a JSON file.
    pub fn load_all<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_all(&content)
    }

    /// Find a family by name (case-insensitive).
    pub fn find<'a>(families: &'a [Self], name: &str) -> Result<&'a Self, ConfigError> {
        families
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownFamily(name.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.erase_block_size == 0 || self.erase_block_size % 4 != 0 {
            return Err(ConfigError::Invalid {
                name: self.name.clone(),
                reason: format!(
                    "erase block size {} must be a non-zero multiple of 4",
                    self.erase_block_size
                ),
            });
        }
        Ok(())
    }
}

/// Tool defaults, persisted as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// HID vendor ID.
    pub vid: u16,
    /// HID product ID.
    pub pid: u16,
    /// UART baud rate.
    pub baud_rate: u32,
    /// Last used serial port.
    pub port: Option<String>,
    /// Device family name used for UART sessions.
    pub family: Option<String>,
    /// Path to the device families JSON file.
    pub families_path: Option<PathBuf>,
    /// Last firmware file.
    pub last_file: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            vid: DEFAULT_VENDOR_ID,
            pid: DEFAULT_PRODUCT_ID,
            baud_rate: DEFAULT_BAUD_RATE,
            port: None,
            family: None,
            families_path: None,
            last_file: None,
        }
    }
}

impl ToolConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ToolConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the device family for UART sessions.
    ///
    /// Without a families file the built-in default layout is used.
    pub fn resolve_family(&self) -> Result<DeviceFamily, ConfigError> {
        let Some(path) = &self.families_path else {
            return Ok(DeviceFamily::default());
        };
        let families = DeviceFamily::load_all(path)?;
        match &self.family {
            Some(name) => DeviceFamily::find(&families, name).cloned(),
            None => families
                .into_iter()
                .next()
                .ok_or_else(|| ConfigError::UnknownFamily("(families file is empty)".into())),
        }
    }
}
