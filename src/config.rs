//! # Configuration Management
//!
//! Centralized configuration for the framing server.
//!
//! Two layers live here:
//! - [`ServerConfig`]: the immutable, validated framing configuration every stage reads.
//!   Invalid length widths and empty markers are rejected when it is constructed, never
//!   per message.
//! - [`NetworkConfig`]: the loadable settings tree (listener, framing, compression,
//!   logging) that produces a `ServerConfig`.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults

use crate::error::{constants, PipelineError, Result};
use crate::utils::compression::CompressionKind;
use bytes::{BufMut, Bytes};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Tag written in front of every TLV frame unless configured otherwise
pub const DEFAULT_TAG: &str = "BF";

/// Largest frame accepted on the wire, header included
pub const MAX_FRAME_SIZE: usize = 65535;

/// Default DEFLATE level (0-9)
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// How long `run_until` waits for in-flight connections after the listener closes
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Width of the big-endian length field in a TLV header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LengthWidth {
    Two,
    Four,
    Eight,
}

impl LengthWidth {
    /// Map a byte count to a width. Only 2, 4 and 8 are accepted.
    pub fn from_bytes(width: usize) -> Result<Self> {
        match width {
            2 => Ok(LengthWidth::Two),
            4 => Ok(LengthWidth::Four),
            8 => Ok(LengthWidth::Eight),
            other => Err(PipelineError::ConfigError(format!(
                "Unsupported length field width: {other} (expected 2, 4 or 8)"
            ))),
        }
    }

    /// Number of bytes the length field occupies
    pub fn bytes(self) -> usize {
        match self {
            LengthWidth::Two => 2,
            LengthWidth::Four => 4,
            LengthWidth::Eight => 8,
        }
    }

    /// Largest length representable in this width
    pub fn max_value(self) -> u64 {
        match self {
            LengthWidth::Two => u64::from(u16::MAX),
            LengthWidth::Four => u64::from(u32::MAX),
            LengthWidth::Eight => u64::MAX,
        }
    }

    /// Read a big-endian length. `field` must be exactly `self.bytes()` long.
    pub fn read_be(self, field: &[u8]) -> u64 {
        field.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    }

    /// Append `value` as a big-endian field of this width.
    ///
    /// # Errors
    /// `LengthOverflow` when `value` does not fit.
    pub fn write_be<B: BufMut>(self, value: u64, out: &mut B) -> Result<()> {
        if value > self.max_value() {
            return Err(PipelineError::LengthOverflow {
                length: value,
                width: self.bytes(),
            });
        }
        let be = value.to_be_bytes();
        out.put_slice(&be[be.len() - self.bytes()..]);
        Ok(())
    }
}

/// Wire framing discipline and its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// `[tag][length][body]`, length counts the whole frame
    Tlv { tag: Bytes, width: LengthWidth },
    /// `[payload][marker]`
    EndMarker { marker: Bytes },
}

impl Framing {
    /// Header length of a TLV frame, zero for end-marker framing
    pub fn header_len(&self) -> usize {
        match self {
            Framing::Tlv { tag, width } => tag.len() + width.bytes(),
            Framing::EndMarker { .. } => 0,
        }
    }

    pub fn discipline(&self) -> Discipline {
        match self {
            Framing::Tlv { .. } => Discipline::Tlv,
            Framing::EndMarker { .. } => Discipline::EndMarker,
        }
    }
}

/// Immutable framing configuration shared by every connection.
///
/// Only one discipline's parameters exist at a time, so there is nothing to ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    framing: Framing,
    max_frame_size: usize,
    validate_tag: bool,
}

impl ServerConfig {
    /// TLV framing with the given tag and length-field width (2, 4 or 8 bytes).
    ///
    /// # Errors
    /// `ConfigError` for an empty tag or an unsupported width.
    pub fn tlv(tag: impl AsRef<[u8]>, width: usize) -> Result<Self> {
        let tag = tag.as_ref();
        if tag.is_empty() {
            return Err(PipelineError::ConfigError(constants::ERR_EMPTY_TAG.into()));
        }
        let width = LengthWidth::from_bytes(width)?;
        Ok(Self {
            framing: Framing::Tlv {
                tag: Bytes::copy_from_slice(tag),
                width,
            },
            max_frame_size: MAX_FRAME_SIZE,
            validate_tag: false,
        })
    }

    /// End-marker framing.
    ///
    /// # Errors
    /// `ConfigError` for an empty marker.
    pub fn end_marker(marker: impl AsRef<[u8]>) -> Result<Self> {
        let marker = marker.as_ref();
        if marker.is_empty() {
            return Err(PipelineError::ConfigError(
                constants::ERR_EMPTY_END_MARKER.into(),
            ));
        }
        Ok(Self {
            framing: Framing::EndMarker {
                marker: Bytes::copy_from_slice(marker),
            },
            max_frame_size: MAX_FRAME_SIZE,
            validate_tag: false,
        })
    }

    /// Override the frame size ceiling (header and marker included).
    ///
    /// # Errors
    /// `ConfigError` if the limit cannot hold even an empty frame.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Result<Self> {
        let minimum = match &self.framing {
            Framing::Tlv { .. } => self.framing.header_len(),
            Framing::EndMarker { marker } => marker.len(),
        };
        if max_frame_size < minimum.max(1) {
            return Err(PipelineError::ConfigError(format!(
                "Max frame size {max_frame_size} cannot hold a {minimum}-byte frame header"
            )));
        }
        self.max_frame_size = max_frame_size;
        Ok(self)
    }

    /// Reject TLV frames whose leading bytes differ from the configured tag.
    ///
    /// Off by default: the tag is written on encode but not checked on decode.
    pub fn with_tag_validation(mut self, enabled: bool) -> Self {
        self.validate_tag = enabled;
        self
    }

    pub fn framing(&self) -> &Framing {
        &self.framing
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn validate_tag(&self) -> bool {
        self.validate_tag
    }
}

/// Framing discipline selector used by the settings file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    Tlv,
    EndMarker,
}

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ListenerConfig,

    /// Wire framing configuration
    #[serde(default)]
    pub framing: FramingConfig,

    /// Payload compression configuration
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| {
            PipelineError::ConfigError(format!("Failed to open config file: {e}"))
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| {
            PipelineError::ConfigError(format!("Failed to read config file: {e}"))
        })?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| PipelineError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("STAGEWIRE_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(discipline) = std::env::var("STAGEWIRE_FRAMING") {
            config.framing.discipline = match discipline.to_ascii_lowercase().as_str() {
                "tlv" => Discipline::Tlv,
                "end_marker" | "endmarker" => Discipline::EndMarker,
                other => {
                    return Err(PipelineError::ConfigError(format!(
                        "Unknown framing discipline in STAGEWIRE_FRAMING: {other}"
                    )))
                }
            };
        }

        if let Ok(tag) = std::env::var("STAGEWIRE_TAG") {
            config.framing.tag = tag;
        }

        if let Ok(width) = std::env::var("STAGEWIRE_LENGTH_WIDTH") {
            if let Ok(val) = width.parse::<usize>() {
                config.framing.length_width = val;
            }
        }

        if let Ok(marker) = std::env::var("STAGEWIRE_END_MARKER") {
            config.framing.end_marker = marker;
        }

        if let Ok(size) = std::env::var("STAGEWIRE_MAX_FRAME_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.framing.max_frame_size = val;
            }
        }

        if let Ok(enabled) = std::env::var("STAGEWIRE_COMPRESSION") {
            if let Ok(val) = enabled.parse::<bool>() {
                config.compression.enabled = val;
            }
        }

        if let Ok(level) = std::env::var("STAGEWIRE_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                config.logging.log_level = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            PipelineError::ConfigError(format!("Failed to serialize config: {e}"))
        })?;

        std::fs::write(path, content).map_err(|e| {
            PipelineError::ConfigError(format!("Failed to write config file: {e}"))
        })?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.framing.validate());
        errors.extend(self.compression.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Build the immutable framing configuration described by the `framing` section
    pub fn server_config(&self) -> Result<ServerConfig> {
        self.framing.to_server_config()
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    /// Listen address (e.g., "127.0.0.1:8080", "[::1]:8080", "0.0.0.0:8080")
    pub address: String,

    /// Number of scratch buffers preallocated in the shared pool
    pub buffer_pool_size: usize,

    /// Time to wait for connections to drain after shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8080"),
            buffer_pool_size: 64,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected e.g. '192.168.0.250:8080' or '[::1]:8080')",
                self.address
            ));
        }

        if self.buffer_pool_size > 100_000 {
            errors.push(format!(
                "Buffer pool size too large: {} (max recommended: 100,000)",
                self.buffer_pool_size
            ));
        }

        if self.shutdown_timeout.as_secs() > 300 {
            errors.push("Shutdown timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Wire framing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FramingConfig {
    /// Which discipline delimits messages
    pub discipline: Discipline,

    /// TLV tag (TLV only)
    pub tag: String,

    /// TLV length field width in bytes: 2, 4 or 8 (TLV only)
    pub length_width: usize,

    /// Trailing delimiter (end-marker only)
    pub end_marker: String,

    /// Largest frame accepted, header or marker included
    pub max_frame_size: usize,

    /// Reject TLV frames whose tag differs from `tag`
    #[serde(default)]
    pub validate_tag: bool,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            discipline: Discipline::Tlv,
            tag: String::from(DEFAULT_TAG),
            length_width: 4,
            end_marker: String::from("\r\n"),
            max_frame_size: MAX_FRAME_SIZE,
            validate_tag: false,
        }
    }
}

impl FramingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.discipline {
            Discipline::Tlv => {
                if self.tag.is_empty() {
                    errors.push(constants::ERR_EMPTY_TAG.to_string());
                }
                if !matches!(self.length_width, 2 | 4 | 8) {
                    errors.push(format!(
                        "Unsupported length field width: {} (expected 2, 4 or 8)",
                        self.length_width
                    ));
                }
                let header = self.tag.len() + self.length_width;
                if self.max_frame_size < header {
                    errors.push(format!(
                        "Max frame size {} is smaller than the {header}-byte TLV header",
                        self.max_frame_size
                    ));
                }
            }
            Discipline::EndMarker => {
                if self.end_marker.is_empty() {
                    errors.push(constants::ERR_EMPTY_END_MARKER.to_string());
                }
                if self.max_frame_size < self.end_marker.len().max(1) {
                    errors.push(format!(
                        "Max frame size {} cannot hold the end marker",
                        self.max_frame_size
                    ));
                }
            }
        }

        errors
    }

    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let config = match self.discipline {
            Discipline::Tlv => ServerConfig::tlv(self.tag.as_bytes(), self.length_width)?
                .with_tag_validation(self.validate_tag),
            Discipline::EndMarker => ServerConfig::end_marker(self.end_marker.as_bytes())?,
        };
        config.with_max_frame_size(self.max_frame_size)
    }
}

/// Payload compression configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompressionConfig {
    /// Insert decompress/compress stages around the handler
    pub enabled: bool,

    /// Algorithm used by the compression stages
    pub kind: CompressionKind,

    /// Compression level (0-9 for deflate, 1-22 for zstd, ignored by lz4)
    pub level: u32,

    /// Idle codec instances kept per pool
    pub pool_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: CompressionKind::Deflate,
            level: DEFAULT_COMPRESSION_LEVEL,
            pool_size: 32,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.enabled {
            match self.kind {
                CompressionKind::Deflate if self.level > 9 => errors.push(format!(
                    "Invalid deflate compression level: {} (valid range: 0-9)",
                    self.level
                )),
                CompressionKind::Zstd if !(1..=22).contains(&self.level) => {
                    errors.push(format!(
                        "Invalid zstd compression level: {} (valid range: 1-22)",
                        self.level
                    ))
                }
                _ => {}
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("stagewire"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file && self.log_file_path.is_none() {
            errors.push("log_file_path must be specified when log_to_file is true".to_string());
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
