//! Inbound pipeline configuration.
//!
//! [`InboundConfig`] can be built in code with the `with_*` setters or
//! loaded from a TOML document:
//!
//! ```
//! use tablestream::config::InboundConfig;
//!
//! let config = InboundConfig::from_toml_str("max_message_len = 4096").unwrap();
//! assert_eq!(config.max_message_len, 4096);
//! assert_eq!(config.read_chunk_size, InboundConfig::DEFAULT_READ_CHUNK_SIZE);
//! ```

use std::{fs, io, path::Path};

use serde::Deserialize;
use thiserror::Error;

use crate::codec::{self, CURRENT_VERSION};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    /// The configuration file is not valid TOML for [`InboundConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is outside its accepted range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for inbound streaming connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InboundConfig {
    /// Largest message body accepted before the connection is failed.
    pub max_message_len: usize,
    /// Size of each read from the socket, and so of each framed buffer.
    pub read_chunk_size: usize,
    /// Protocol version assumed for new connections.
    pub protocol_version: u32,
}

impl InboundConfig {
    /// Default for [`InboundConfig::max_message_len`] (128 MiB).
    pub const DEFAULT_MAX_MESSAGE_LEN: usize = 128 * 1024 * 1024;
    /// Default for [`InboundConfig::read_chunk_size`] (64 KiB).
    pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

    /// Override the maximum message body length.
    #[must_use]
    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    /// Override the socket read size.
    #[must_use]
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Override the protocol version.
    #[must_use]
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Check every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_len == 0 {
            return Err(ConfigError::Invalid("max_message_len must be > 0".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid("read_chunk_size must be > 0".into()));
        }
        codec::check_version(self.protocol_version)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Parse and validate a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`InboundConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            max_message_len: Self::DEFAULT_MAX_MESSAGE_LEN,
            read_chunk_size: Self::DEFAULT_READ_CHUNK_SIZE,
            protocol_version: CURRENT_VERSION,
        }
    }
}
