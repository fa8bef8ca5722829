use std::time::Duration;

/// Default well-known control port; the fan-out channel uses port + 1.
pub const DEFAULT_PORT: u16 = 52002;

/// Default bind address. Peers connect to loopback when this is
/// unspecified.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";

/// Default node id carried in outbound payloads.
pub const DEFAULT_ID: &str = "crier";

/// Full node configuration. Role instances are constructed from a
/// snapshot of this at start time, so changes only affect roles started
/// afterwards.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// May this process become the broadcaster.
    pub server: bool,
    /// Node id stamped into outbound payloads as `sender`.
    pub id: String,
    /// Bind/connect address for both channels.
    pub address: String,
    /// Control channel port; the fan-out channel binds port + 1.
    pub port: u16,
    /// Loop and socket timing knobs.
    pub timing: Timing,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server: true,
            id: DEFAULT_ID.to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            timing: Timing::default(),
        }
    }
}

impl NodeConfig {
    /// Merge the provided options into this configuration.
    pub fn apply(&mut self, options: NodeOptions) {
        if let Some(server) = options.server {
            self.server = server;
        }
        if let Some(id) = options.id {
            self.id = id;
        }
        if let Some(address) = options.address {
            self.address = address;
        }
        if let Some(port) = options.port {
            self.port = port;
        }
    }
}

/// Timing knobs for the cooperative loops and control round trips.
///
/// Both background loops block at most `poll_interval` per iteration, so
/// shutdown latency is bounded by it.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Blocking-receive bound inside the serve and receive loops.
    pub poll_interval: Duration,
    /// How long `send` waits for the broadcaster's acknowledgment.
    pub reply_timeout: Duration,
    /// Round-trip budget for a liveness probe.
    pub probe_timeout: Duration,
    /// Outbound connection establishment budget.
    pub connect_timeout: Duration,
    /// Pause before the receive loop retries a lost fan-out connection.
    pub reconnect_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            reply_timeout: Duration::from_millis(100),
            probe_timeout: Duration::from_millis(25),
            connect_timeout: Duration::from_millis(250),
            reconnect_delay: Duration::from_millis(50),
        }
    }
}

/// A partial configuration merged into [`NodeConfig`] via
/// [`NodeConfig::apply`]; unset fields keep their current values.
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub server: Option<bool>,
    pub id: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow or forbid this process from becoming the broadcaster.
    pub fn server(mut self, server: bool) -> Self {
        self.server = Some(server);
        self
    }

    /// Set the node id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the bind/connect address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the control channel port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NodeConfig::default();
        assert!(config.server);
        assert_eq!(config.id, "crier");
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.port, 52002);
    }

    #[test]
    fn apply_merges_only_set_fields() {
        let mut config = NodeConfig::default();
        config.apply(NodeOptions::new().server(false).port(60123));

        assert!(!config.server);
        assert_eq!(config.port, 60123);
        assert_eq!(config.id, "crier");
        assert_eq!(config.address, "0.0.0.0");
    }
}
