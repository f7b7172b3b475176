//! Process configuration: roles, identity material locations and the
//! optional `config.toml` schema.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the configuration directory.
pub const CONF_DIR_ENV: &str = "TETHER_CONF_DIR";

/// Default relay port for producer connections.
pub const DEFAULT_PRODUCER_PORT: u16 = 8890;

/// Default relay port for consumer connections.
pub const DEFAULT_CONSUMER_PORT: u16 = 8891;

/// Identity the relay certificate is checked against in relaxed mode.
pub const DEFAULT_EXPECTED_IDENTITY: &str = "1.1.1.1";

/// File name of the shared root certificate.
pub const CA_CERT_FILE: &str = "ca_cert";

/// The part a process plays in the relay topology. Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sends events to the relay.
    Producer,
    /// Receives events from the relay and runs actions.
    Consumer,
    /// Bridges producer and consumer connections.
    Relay,
}

impl Role {
    /// Lowercase role name, also used as the identity file prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
            Role::Relay => "relay",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a dialing endpoint checks the relay certificate's identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityCheck {
    /// The certificate must match the dialed host name or address.
    #[default]
    Strict,
    /// The certificate must match the pre-shared expected identity instead.
    /// Reduced assurance; opt-in only.
    Relaxed,
}

/// Paths of the PEM files one endpoint needs to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPaths {
    /// Shared root certificate used to verify the other party.
    pub ca_cert: PathBuf,
    /// This endpoint's certificate chain.
    pub cert: PathBuf,
    /// This endpoint's private key.
    pub key: PathBuf,
}

impl IdentityPaths {
    /// Standard file layout for `role` inside a configuration directory.
    pub fn in_dir(conf_dir: &Path, role: Role) -> Self {
        Self {
            ca_cert: conf_dir.join(CA_CERT_FILE),
            cert: conf_dir.join(format!("{}_cert", role.as_str())),
            key: conf_dir.join(format!("{}_key", role.as_str())),
        }
    }
}

/// Contents of `config.toml`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Host name or address of the relay (producer and consumer).
    pub relay_host: Option<String>,
    /// Address the relay listens on.
    pub listen_addr: IpAddr,
    /// Relay port for producer connections.
    pub producer_port: u16,
    /// Relay port for consumer connections.
    pub consumer_port: u16,
    /// Relay certificate identity check mode.
    pub identity_check: IdentityCheck,
    /// Identity used when `identity_check` is relaxed.
    pub expected_identity: String,
    /// Directory holding executable hooks. Defaults to `<conf_dir>/hooks`.
    pub hooks_dir: Option<PathBuf>,
    /// Relay only: name producer certificates must be valid for.
    pub producer_identity: Option<String>,
    /// Relay only: name consumer certificates must be valid for.
    pub consumer_identity: Option<String>,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            relay_host: None,
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            producer_port: DEFAULT_PRODUCER_PORT,
            consumer_port: DEFAULT_CONSUMER_PORT,
            identity_check: IdentityCheck::Strict,
            expected_identity: DEFAULT_EXPECTED_IDENTITY.to_string(),
            hooks_dir: None,
            producer_identity: None,
            consumer_identity: None,
        }
    }
}

impl TetherConfig {
    /// Parse a `config.toml` document.
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Hooks directory, falling back to `<conf_dir>/hooks`.
    pub fn hooks_dir(&self, conf_dir: &Path) -> PathBuf {
        self.hooks_dir
            .clone()
            .unwrap_or_else(|| conf_dir.join("hooks"))
    }
}

/// Resolve the configuration directory.
///
/// Order: `$TETHER_CONF_DIR`, then the platform config dir + `tether`,
/// then `./.tether`.
pub fn default_conf_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONF_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|d| d.join("tether"))
        .unwrap_or_else(|| PathBuf::from(".tether"))
}
