use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crier_bus::{EventBus, SenderFilter, SubscriberRef, SubscriptionHandle};
use crier_frame::Payload;
use tracing::{info, warn};

use crate::broadcaster::Broadcaster;
use crate::config::{NodeConfig, NodeOptions};
use crate::error::Result;
use crate::peer::Peer;

#[derive(Default)]
struct Roles {
    broadcaster: Option<Broadcaster>,
    peer: Option<Peer>,
}

/// Coordinates one broadcaster role and one peer role for this process.
///
/// Election is implicit and lazy: the first public call probes the
/// configured port and, when this process is `server`-eligible and no
/// broadcaster answers, races to bind it. Losing the race just means
/// staying a plain peer.
///
/// All methods take `&self`; a `Node` can be shared across threads or
/// held in a process-global.
pub struct Node {
    config: Mutex<NodeConfig>,
    bus: Arc<EventBus>,
    roles: Mutex<Roles>,
    // Serializes try_start so concurrent callers cannot double-construct
    // roles. Never held while `roles` operations block on the network.
    start_lock: Mutex<()>,
}

impl Node {
    pub fn new() -> Self {
        Self::with_config(NodeConfig::default())
    }

    pub fn with_config(config: NodeConfig) -> Self {
        Self {
            config: Mutex::new(config),
            bus: Arc::new(EventBus::new()),
            roles: Mutex::new(Roles::default()),
            start_lock: Mutex::new(()),
        }
    }

    /// Merge options into the current configuration.
    ///
    /// Role instances are constructed from a config snapshot at start
    /// time, so this must run before the first `send`/`connect`/
    /// `wait_for` to take effect.
    pub fn configure(&self, options: NodeOptions) {
        self.config.lock().expect("config poisoned").apply(options);
    }

    /// The local event bus shared by this node's roles.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// True iff this process's broadcaster role is running.
    pub fn is_server(&self) -> bool {
        self.roles
            .lock()
            .expect("roles poisoned")
            .broadcaster
            .as_ref()
            .is_some_and(Broadcaster::is_running)
    }

    /// Explicitly start this process's broadcaster, with optional
    /// address/port overrides. Logs a warning and returns Ok when one is
    /// already running.
    pub fn start_server(&self, address: Option<&str>, port: Option<u16>) -> Result<()> {
        let config = self.config.lock().expect("config poisoned").clone();
        let address = address.unwrap_or(&config.address);
        let port = port.unwrap_or(config.port);

        let mut roles = self.roles.lock().expect("roles poisoned");
        if roles.broadcaster.as_ref().is_some_and(Broadcaster::is_running) {
            warn!("broadcaster is already running");
            return Ok(());
        }

        let broadcaster = Broadcaster::new(config.timing.poll_interval);
        broadcaster.start(address, port)?;
        roles.broadcaster = Some(broadcaster);
        Ok(())
    }

    /// Ensure both roles are in the right state for this process.
    ///
    /// Called lazily by every public operation. When the peer is already
    /// started this is a cheap no-op. Otherwise: probe for an existing
    /// broadcaster, start our own if eligible and none answered (a lost
    /// bind race is logged and absorbed; the loser continues peer-only),
    /// then start the peer and wait for a broadcaster to acknowledge.
    pub fn try_start(&self) {
        let _guard = self.start_lock.lock().expect("start lock poisoned");

        if self
            .roles
            .lock()
            .expect("roles poisoned")
            .peer
            .as_ref()
            .is_some_and(Peer::is_started)
        {
            return;
        }

        let config = self.config.lock().expect("config poisoned").clone();

        let peer = match Peer::new(
            Arc::clone(&self.bus),
            &config.address,
            config.port,
            config.timing.clone(),
        ) {
            Ok(peer) => peer,
            Err(err) => {
                warn!(%err, "peer construction failed");
                return;
            }
        };

        let mut elected = None;
        if config.server && !peer.probe(config.timing.probe_timeout) {
            info!(port = config.port, "no broadcaster detected; starting one");
            let broadcaster = Broadcaster::new(config.timing.poll_interval);
            match broadcaster.start(&config.address, config.port) {
                Ok(()) => elected = Some(broadcaster),
                // Lost the bind race to a concurrently starting process;
                // continue as a plain peer.
                Err(err) => warn!(%err, "broadcaster bind failed; continuing as peer"),
            }
        }

        if let Err(err) = peer.start(&config.id, true) {
            warn!(%err, "peer start failed");
        }

        let mut roles = self.roles.lock().expect("roles poisoned");
        if let Some(broadcaster) = elected {
            roles.broadcaster = Some(broadcaster);
        }
        roles.peer = Some(peer);
    }

    /// Send an event to whichever process currently runs the broadcaster.
    ///
    /// `Ok(true)` iff the broadcaster acknowledged; delivery failures are
    /// logged and yield `Ok(false)`; only encode errors surface as `Err`.
    pub fn send(&self, topic: &str, payload: Payload) -> Result<bool> {
        self.try_start();
        match self.peer() {
            Some(peer) => peer.send(topic, payload),
            None => Ok(false),
        }
    }

    /// Register a callback for `topic` with default options (any sender,
    /// strong ownership).
    pub fn connect<F>(&self, topic: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.on(topic).connect(callback)
    }

    /// Registration builder: configure the sender filter and ownership,
    /// then supply the callback to complete registration.
    pub fn on(&self, topic: &str) -> ConnectBuilder<'_> {
        ConnectBuilder {
            node: self,
            topic: topic.to_string(),
            filter: SenderFilter::Any,
        }
    }

    /// Remove a subscription. Idempotent.
    pub fn disconnect(&self, handle: SubscriptionHandle) {
        self.bus.unsubscribe(handle);
    }

    /// Block until an event on `topic` arrives or the timeout elapses.
    ///
    /// Registers a one-shot subscription, optionally sends an outbound
    /// message to trigger the expected reply, and returns the captured
    /// payload, or `None` on timeout. The subscription is cleaned up on
    /// every exit path.
    pub fn wait_for(&self, topic: &str, options: WaitOptions) -> Result<Option<Payload>> {
        self.try_start();

        let (tx, rx) = mpsc::channel();
        let handle = self.bus.subscribe(
            topic,
            options.sender,
            SubscriberRef::strong(move |payload: &Payload| {
                let _ = tx.send(payload.clone());
            }),
        );
        if let Some(peer) = self.peer() {
            peer.subscribe(topic);
        }

        if let Some((out_topic, out_payload)) = options.send {
            if let Err(err) = self.send(&out_topic, out_payload) {
                self.bus.unsubscribe(handle);
                return Err(err);
            }
        }

        let received = rx.recv_timeout(options.timeout).ok();
        self.bus.unsubscribe(handle);
        Ok(received)
    }

    /// Stop both roles. Stopped instances are dropped; a later call
    /// starts from freshly constructed ones.
    pub fn stop(&self) {
        self.stop_roles(true, true);
    }

    /// Stop only the peer role.
    pub fn stop_client(&self) {
        self.stop_roles(true, false);
    }

    /// Stop only the broadcaster role.
    pub fn stop_server(&self) {
        self.stop_roles(false, true);
    }

    fn stop_roles(&self, stop_client: bool, stop_server: bool) {
        let (peer, broadcaster) = {
            let mut roles = self.roles.lock().expect("roles poisoned");
            (
                if stop_client { roles.peer.take() } else { None },
                if stop_server {
                    roles.broadcaster.take()
                } else {
                    None
                },
            )
        };

        if let Some(peer) = peer {
            peer.stop();
        }
        if let Some(broadcaster) = broadcaster {
            broadcaster.stop();
        }
    }

    fn peer(&self) -> Option<Peer> {
        self.roles.lock().expect("roles poisoned").peer.clone()
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Options for [`Node::wait_for`].
#[derive(Clone)]
pub struct WaitOptions {
    /// Only accept events from this sender.
    pub sender: SenderFilter,
    /// How long to wait before giving up.
    pub timeout: Duration,
    /// Outbound (topic, payload) sent after the subscription is
    /// registered, to trigger the expected reply.
    pub send: Option<(String, Payload)>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            sender: SenderFilter::Any,
            timeout: Duration::from_secs(1),
            send: None,
        }
    }
}

impl WaitOptions {
    pub fn sender(mut self, id: impl Into<String>) -> Self {
        self.sender = SenderFilter::exact(id);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn send(mut self, topic: impl Into<String>, payload: Payload) -> Self {
        self.send = Some((topic.into(), payload));
        self
    }
}

/// Builder returned by [`Node::on`]; completes registration when given
/// the callback.
pub struct ConnectBuilder<'a> {
    node: &'a Node,
    topic: String,
    filter: SenderFilter,
}

impl ConnectBuilder<'_> {
    /// Only deliver events whose payload `sender` equals `id`.
    pub fn sender(mut self, id: impl Into<String>) -> Self {
        self.filter = SenderFilter::exact(id);
        self
    }

    /// Complete registration with a callback the bus keeps alive.
    pub fn connect<F>(self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.register(SubscriberRef::strong(callback))
    }

    /// Complete registration with a caller-owned callback; the
    /// subscription dies with the caller's `Arc`.
    pub fn connect_weak<F>(self, callback: &Arc<F>) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.register(SubscriberRef::weak(callback))
    }

    fn register(self, subscriber: SubscriberRef) -> SubscriptionHandle {
        self.node.try_start();
        if let Some(peer) = self.node.peer() {
            peer.subscribe(&self.topic);
        }
        self.node.bus.subscribe(&self.topic, self.filter, subscriber)
    }
}
