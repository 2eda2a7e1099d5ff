//! Configuration and environment selection.
use crate::digest::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;

/// DIAN environment the document is issued for.
///
/// The environment is part of every fingerprint: production documents hash
/// the flag `1`, documents sent to the habilitación (test) set hash `2`.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use factura_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("test")?;
/// assert_eq!(env, EnvironmentType::Test);
/// assert_eq!(env.flag(), '2');
/// # Ok::<(), factura_core::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    Production,
    Test,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.to_ascii_lowercase().as_str() {
            "production" | "1" => Ok(EnvironmentType::Production),
            "test" | "habilitacion" | "2" => Ok(EnvironmentType::Test),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Production => "production",
            EnvironmentType::Test => "test",
        }
    }

    /// Value appended to the fingerprint input (`ProfileExecutionID`).
    pub fn flag(&self) -> char {
        match self {
            EnvironmentType::Production => '1',
            EnvironmentType::Test => '2',
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Issuer profile: environment, digest strength and the secrets DIAN hands
/// out when a software is registered.
///
/// # Examples
/// ```rust
/// use factura_core::config::{Config, EnvironmentType};
/// use factura_core::digest::DigestAlgorithm;
///
/// let config = Config::new(EnvironmentType::Production)
///     .with_technical_key("fc8eac422eba16e22ffd8c6f94b3f40a6e38162c");
/// assert_eq!(config.digest_algorithm(), DigestAlgorithm::Sha256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    env: EnvironmentType,
    #[serde(default)]
    digest_algorithm: DigestAlgorithm,
    #[serde(default)]
    technical_key: Option<String>,
    #[serde(default)]
    software_pin: Option<String>,
    #[serde(default)]
    software_id: Option<String>,
    #[serde(default = "default_claimed_role")]
    claimed_role: String,
}

fn default_claimed_role() -> String {
    crate::signature::DEFAULT_CLAIMED_ROLE.to_string()
}

impl Config {
    pub fn new(env: EnvironmentType) -> Self {
        Self {
            env,
            digest_algorithm: DigestAlgorithm::default(),
            technical_key: None,
            software_pin: None,
            software_id: None,
            claimed_role: default_claimed_role(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    pub fn with_technical_key(mut self, key: impl Into<String>) -> Self {
        self.technical_key = Some(key.into());
        self
    }

    pub fn with_software(mut self, id: impl Into<String>, pin: impl Into<String>) -> Self {
        self.software_id = Some(id.into());
        self.software_pin = Some(pin.into());
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    pub fn technical_key(&self) -> Option<&str> {
        self.technical_key.as_deref()
    }

    pub fn software_pin(&self) -> Option<&str> {
        self.software_pin.as_deref()
    }

    pub fn software_id(&self) -> Option<&str> {
        self.software_id.as_deref()
    }

    pub fn claimed_role(&self) -> &str {
        &self.claimed_role
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(EnvironmentType::Test)
    }
}
