//! Configuration types.
//!
//! Loaded once at startup from a TOML file (`$CONF_PATH`, default
//! `config/config.toml`). Every problem found here is fatal: the listener is
//! never started with a junction it could not render. An empty junction list
//! is valid; the binary warns about it once logging is up.
//!
//! ```toml
//! log-level = "info"
//! port = 8025
//!
//! [[junctions]]
//! name = "ops"
//! apprise = "tgram://bottoken/chatid"
//! to = { emails = ["ops@example.com"], require-all = false }
//! from = { ip = "10.0.0.9" }
//! title = "[{{ .From }}] {{ .Subject }}"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::junctions::{FromCondition, Junction, JunctionSet, ToCondition};
use crate::template::Template;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Default SMTP port.
pub const DEFAULT_PORT: u16 = 8025;

/// Default maximum accepted message size (25 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 25 * 1024 * 1024;

// ── File format ─────────────────────────────────────────────────────

/// Configuration file as written by the operator.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub log_level: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub max_message_size: Option<usize>,
    pub apprise_path: Option<PathBuf>,
    pub apprise_timeout_secs: Option<u64>,
    pub overflow: Option<String>,
    #[serde(default)]
    pub junctions: Vec<JunctionConfig>,
}

/// One `[[junctions]]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JunctionConfig {
    pub name: Option<String>,
    pub apprise: Option<String>,
    #[serde(default)]
    pub to: ToConfig,
    #[serde(default)]
    pub from: FromConfig,
    pub title: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToConfig {
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub require_all: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FromConfig {
    pub email: Option<String>,
    pub ip: Option<String>,
}

// ── Validated configuration ─────────────────────────────────────────

/// Validated service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_level: String,
    /// Directory for a daily rolling log file, in addition to stdout.
    pub log_dir: Option<PathBuf>,
    /// Address the SMTP listener binds to.
    pub listen: SocketAddr,
    /// Name announced in the SMTP greeting.
    pub hostname: String,
    pub max_message_size: usize,
    pub apprise_path: PathBuf,
    pub apprise_timeout: Duration,
    /// Apprise `overflow` mode, `None` when disabled.
    pub overflow: Option<String>,
    pub junctions: JunctionSet,
}

impl AppConfig {
    /// Load from `$CONF_PATH` (or the default path) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONF_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_path(path)
    }

    /// Load a specific file and apply environment overrides.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file: FileConfig = toml::from_str(&text)?;
        file.apply_env_overrides()?;
        Self::from_file_config(file)
    }

    /// Parse and validate TOML text. No environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::from_file_config(toml::from_str(text)?)
    }

    /// Validate a parsed file, compiling every junction template.
    pub fn from_file_config(file: FileConfig) -> Result<Self, ConfigError> {
        let listen_ip: IpAddr = match file.listen.as_deref() {
            None | Some("") => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Some(addr) => addr.parse().map_err(|e| ConfigError::InvalidValue {
                key: "listen".into(),
                message: format!("{addr:?}: {e}"),
            })?,
        };
        let port = file.port.unwrap_or(DEFAULT_PORT);

        let max_message_size = file.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE);
        if max_message_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max-message-size".into(),
                message: "must be greater than zero".into(),
            });
        }

        let timeout_secs = file
            .apprise_timeout_secs
            .unwrap_or(crate::dispatch::apprise::DEFAULT_TIMEOUT.as_secs());
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "apprise-timeout-secs".into(),
                message: "must be greater than zero".into(),
            });
        }

        let overflow = match file.overflow {
            None => Some(crate::dispatch::apprise::DEFAULT_OVERFLOW.to_string()),
            Some(mode) if mode.is_empty() => None,
            Some(mode) => Some(mode),
        };

        let junctions = compile_junctions(file.junctions)?;

        Ok(Self {
            log_level: file
                .log_level
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "info".to_string()),
            log_dir: file.log_dir,
            listen: SocketAddr::new(listen_ip, port),
            hostname: file
                .hostname
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| "mail-junction".to_string()),
            max_message_size,
            apprise_path: file
                .apprise_path
                .unwrap_or_else(|| PathBuf::from("apprise")),
            apprise_timeout: Duration::from_secs(timeout_secs),
            overflow,
            junctions,
        })
    }
}

impl FileConfig {
    /// `MAIL_JUNCTION_PORT` and `MAIL_JUNCTION_LOG_LEVEL` override the file.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = std::env::var("MAIL_JUNCTION_PORT") {
            let port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "MAIL_JUNCTION_PORT".into(),
                message: format!("{port:?} is not a valid port"),
            })?;
            self.port = Some(port);
        }
        if let Ok(level) = std::env::var("MAIL_JUNCTION_LOG_LEVEL") {
            self.log_level = Some(level);
        }
        Ok(())
    }
}

/// Compile the configured junctions, keeping their order.
pub fn compile_junctions(configs: Vec<JunctionConfig>) -> Result<JunctionSet, ConfigError> {
    let mut junctions = Vec::with_capacity(configs.len());

    for (index, config) in configs.into_iter().enumerate() {
        let id = match config.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => index.to_string(),
        };

        let apprise = match config.apprise.as_deref() {
            Some(source) if !source.trim().is_empty() => compile(&id, "apprise", source)?,
            _ => return Err(ConfigError::MissingDestination { junction: id }),
        };

        let title = optional(&id, "title", config.title.as_deref())?;
        let body = optional(&id, "body", config.body.as_deref())?;

        junctions.push(Junction {
            name: config.name,
            apprise,
            to: ToCondition {
                emails: config.to.emails,
                require_all: config.to.require_all,
            },
            from: FromCondition {
                email: config.from.email.filter(|e| !e.is_empty()),
                ip: config.from.ip.filter(|ip| !ip.is_empty()),
            },
            title,
            body,
        });
    }

    Ok(JunctionSet::new(junctions))
}

fn compile(junction: &str, field: &'static str, source: &str) -> Result<Template, ConfigError> {
    Template::parse(source).map_err(|source| ConfigError::InvalidTemplate {
        junction: junction.to_string(),
        field,
        source,
    })
}

fn optional(
    junction: &str,
    field: &'static str,
    source: Option<&str>,
) -> Result<Option<Template>, ConfigError> {
    match source {
        Some(source) if !source.is_empty() => compile(junction, field, source).map(Some),
        _ => Ok(None),
    }
}
