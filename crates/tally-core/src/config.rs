//! tally.toml configuration parser.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{is_valid_metric_name, ConflictPolicy};

/// Prometheus client default histogram buckets.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

pub const DEFAULT_QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];

pub const DEFAULT_SUMMARY_WINDOW: usize = 1024;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:9091";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    pub server: ServerConfig,
    pub metrics: MetricsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prepended to every family name at render time.
    pub prefix: String,
    /// Series idle longer than this are dropped. Absent means never.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    /// How often the expiry sweep runs. Defaults to half the TTL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<String>,
    pub conflict_policy: ConflictPolicy,
    /// Histogram upper bounds, strictly increasing.
    pub buckets: Vec<f64>,
    /// Quantiles reported for summaries.
    pub quantiles: Vec<f64>,
    /// Samples retained per summary series.
    pub summary_window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            ttl: None,
            sweep_interval: None,
            conflict_policy: ConflictPolicy::default(),
            buckets: DEFAULT_BUCKETS.to_vec(),
            quantiles: DEFAULT_QUANTILES.to_vec(),
            summary_window: DEFAULT_SUMMARY_WINDOW,
        }
    }
}

/// Basic auth settings. Exactly one password source must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

/// Resolved Basic auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl TallyConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .listen
            .parse()
            .map_err(|e| ConfigError::Invalid {
                field: "server.listen",
                reason: format!("{:?}: {e}", self.server.listen),
            })
    }

    /// Parsed TTL, `None` when expiry is disabled.
    pub fn ttl(&self) -> Result<Option<Duration>, ConfigError> {
        self.metrics.ttl.as_deref().map(parse_duration).transpose()
    }

    /// Sweep interval: explicit value, or half the TTL (at least one second).
    pub fn sweep_interval(&self) -> Result<Option<Duration>, ConfigError> {
        let Some(ttl) = self.ttl()? else {
            return Ok(None);
        };
        match self.metrics.sweep_interval.as_deref() {
            Some(s) => parse_duration(s).map(Some),
            None => Ok(Some((ttl / 2).max(Duration::from_secs(1)))),
        }
    }

    /// Resolve auth credentials, reading password files and env vars.
    pub fn credentials(&self) -> Result<Option<Credentials>, ConfigError> {
        self.auth.as_ref().map(AuthConfig::resolve).transpose()
    }

    /// Check everything that can be checked without binding a socket.
    ///
    /// Called at startup so a broken config fails before traffic is accepted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        let prefix = &self.metrics.prefix;
        if !prefix.is_empty() && !is_valid_metric_name(prefix) {
            return Err(ConfigError::Invalid {
                field: "metrics.prefix",
                reason: format!("{prefix:?} is not a valid metric name prefix"),
            });
        }
        let ttl = self.ttl()?;
        if ttl == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                field: "metrics.ttl",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.sweep_interval()? == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid {
                field: "metrics.sweep_interval",
                reason: "must be greater than zero".to_string(),
            });
        }

        let buckets = &self.metrics.buckets;
        if buckets.is_empty() || buckets.iter().any(|b| !b.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "metrics.buckets",
                reason: "need at least one finite bound".to_string(),
            });
        }
        if buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::Invalid {
                field: "metrics.buckets",
                reason: "bounds must be strictly increasing".to_string(),
            });
        }

        if self
            .metrics
            .quantiles
            .iter()
            .any(|q| !(0.0..=1.0).contains(q))
        {
            return Err(ConfigError::Invalid {
                field: "metrics.quantiles",
                reason: "quantiles must lie in [0, 1]".to_string(),
            });
        }
        if self.metrics.summary_window == 0 {
            return Err(ConfigError::Invalid {
                field: "metrics.summary_window",
                reason: "must be at least 1".to_string(),
            });
        }

        self.credentials()?;
        Ok(())
    }
}

impl AuthConfig {
    pub fn resolve(&self) -> Result<Credentials, ConfigError> {
        if self.username.is_empty() {
            return Err(ConfigError::Auth("username is empty".to_string()));
        }
        if self.username.contains(':') {
            return Err(ConfigError::Auth("username must not contain ':'".to_string()));
        }

        let password = match (&self.password, &self.password_file, &self.password_env) {
            (Some(p), None, None) => p.clone(),
            (None, Some(path), None) => std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Auth(format!("cannot read {}: {e}", path.display())))?
                .trim_end_matches(['\r', '\n'])
                .to_string(),
            (None, None, Some(var)) => std::env::var(var)
                .map_err(|e| ConfigError::Auth(format!("env var {var}: {e}")))?,
            (None, None, None) => {
                return Err(ConfigError::Auth(
                    "one of password, password_file or password_env is required".to_string(),
                ));
            }
            _ => {
                return Err(ConfigError::Auth(
                    "password, password_file and password_env are mutually exclusive".to_string(),
                ));
            }
        };

        if password.is_empty() {
            return Err(ConfigError::Auth("password is empty".to_string()));
        }

        Ok(Credentials {
            username: self.username.clone(),
            password,
        })
    }
}

/// Parse `250ms`, `30s`, `5m`, `1h`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::Duration(s.to_string());

    let (number, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let n: u64 = number.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => n.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid),
        "h" => n.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}
