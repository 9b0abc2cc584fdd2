//! Client configuration.

use std::time::Duration;

use serde::Deserialize;

/// What the session layer does with a connection once the last user
/// releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Close as soon as the connection is released.
    Immediate,
    /// Keep the connection open for a linger period; a new request for
    /// the same host within it reuses the connection.
    Debounced { linger_secs: u64 },
    /// Never close released connections; they live until the process
    /// exits or the peer drops them.
    Never,
}

impl DisconnectPolicy {
    pub(crate) fn linger(&self) -> Option<Duration> {
        match self {
            DisconnectPolicy::Debounced { linger_secs } => {
                Some(Duration::from_secs(*linger_secs))
            }
            _ => None,
        }
    }
}

impl Default for DisconnectPolicy {
    fn default() -> Self {
        DisconnectPolicy::Debounced { linger_secs: 5 }
    }
}

/// Settings for the client runtime.
///
/// Deserializable so deployments can load it from a config file:
///
/// ```json
/// {
///   "connect_timeout_secs": 10,
///   "disconnect_policy": { "debounced": { "linger_secs": 5 } }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a connect attempt may take before it is abandoned.
    pub connect_timeout_secs: u64,

    /// What happens to a connection after its last release.
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            disconnect_policy: DisconnectPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout_secs, 10);
        assert_eq!(
            config.disconnect_policy,
            DisconnectPolicy::Debounced { linger_secs: 5 }
        );
    }

    #[test]
    fn test_deserialize_partial_config_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{ "connect_timeout_secs": 3 }"#).unwrap();
        assert_eq!(config.connect_timeout_secs, 3);
        assert_eq!(
            config.disconnect_policy,
            DisconnectPolicy::Debounced { linger_secs: 5 }
        );
    }

    #[test]
    fn test_deserialize_policies() {
        let immediate: DisconnectPolicy =
            serde_json::from_str(r#""immediate""#).unwrap();
        assert_eq!(immediate, DisconnectPolicy::Immediate);

        let never: DisconnectPolicy =
            serde_json::from_str(r#""never""#).unwrap();
        assert_eq!(never, DisconnectPolicy::Never);

        let debounced: DisconnectPolicy =
            serde_json::from_str(r#"{ "debounced": { "linger_secs": 9 } }"#)
                .unwrap();
        assert_eq!(debounced, DisconnectPolicy::Debounced { linger_secs: 9 });
        assert_eq!(debounced.linger(), Some(Duration::from_secs(9)));
    }
}
