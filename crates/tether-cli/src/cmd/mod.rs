//! Command implementations by role.

pub mod consume;
pub mod produce;
pub mod relay;

use std::path::Path;
use tether_types::config::{IdentityPaths, Role, TetherConfig};
use tether_types::error::TetherError;
use tether_wire::{Identity, PeerVerification, SecureDialer};

/// Relay host for the dialing roles; required.
pub(crate) fn relay_host(config: &TetherConfig) -> Result<String, TetherError> {
    config
        .relay_host
        .clone()
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| {
            TetherError::Config(
                "relay host not set (use --relay or relay_host in config.toml)".into(),
            )
        })
}

/// Load `role`'s identity from `conf_dir` and build a dialer for it.
pub(crate) fn dialer(
    conf_dir: &Path,
    role: Role,
    config: &TetherConfig,
) -> Result<SecureDialer, TetherError> {
    let identity = Identity::load(&IdentityPaths::in_dir(conf_dir, role))?;
    let verification =
        PeerVerification::from_check(config.identity_check, &config.expected_identity);
    Ok(SecureDialer::new(role, &identity, verification)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_host_required() {
        let mut config = TetherConfig::default();
        assert!(matches!(relay_host(&config), Err(TetherError::Config(_))));
        config.relay_host = Some("  ".into());
        assert!(relay_host(&config).is_err());
        config.relay_host = Some("relay.example.net".into());
        assert_eq!(relay_host(&config).unwrap(), "relay.example.net");
    }

    #[test]
    fn test_missing_identity_is_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = dialer(dir.path(), Role::Producer, &TetherConfig::default()).unwrap_err();
        assert!(matches!(err, TetherError::Auth(_)), "{err:?}");
    }
}
