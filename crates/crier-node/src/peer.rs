use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use crier_bus::{EventBus, SenderFilter, SubscriberRef};
use crier_frame::{
    decode_event, encode_event, FrameConfig, FrameError, FrameReader, FrameWriter, Payload,
    SENDER_KEY,
};
use crier_transport::TransportError;
use tracing::{debug, error, info, warn};

use crate::config::Timing;
use crate::control::{ACK, CHECK_TOPIC, CONNECT_TOPIC, SUBSCRIBE_OP};
use crate::error::{NodeError, Result};
use crate::link::ControlLink;

/// Bounded retry budget for `wait_for_server`.
const WAIT_FOR_SERVER_ATTEMPTS: usize = 10;

/// Peer lifecycle. A stopped instance is replaced, never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerState {
    Idle = 0,
    Connecting = 1,
    Listening = 2,
    Stopping = 3,
}

impl PeerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Listening,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }
}

struct PeerShared {
    state: AtomicU8,
    stop: AtomicBool,
    id: Mutex<String>,
    control_addr: SocketAddr,
    fanout_addr: SocketAddr,
    timing: Timing,
    link: Mutex<ControlLink>,
    prefixes: Mutex<Vec<Vec<u8>>>,
    sub_writer: Mutex<Option<FrameWriter<TcpStream>>>,
    bus: Arc<EventBus>,
}

/// A process's client side: sends over the control connection, receives
/// over the fan-out subscription, and feeds received events to the local
/// bus.
///
/// Cheap to clone; clones share the same instance.
#[derive(Clone)]
pub struct Peer {
    shared: Arc<PeerShared>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Peer {
    /// Create a peer targeting `address:port` (control) and
    /// `address:port+1` (fan-out). The receive loop is not started yet.
    pub fn new(bus: Arc<EventBus>, address: &str, port: u16, timing: Timing) -> Result<Self> {
        let fanout_port = port.checked_add(1).ok_or(NodeError::PortOverflow(port))?;
        let control_addr = crier_transport::connect_addr(address, port)?;
        let fanout_addr = crier_transport::connect_addr(address, fanout_port)?;

        let link = ControlLink::new(control_addr, timing.connect_timeout, timing.reply_timeout);

        Ok(Self {
            shared: Arc::new(PeerShared {
                state: AtomicU8::new(PeerState::Idle as u8),
                stop: AtomicBool::new(false),
                id: Mutex::new(crate::config::DEFAULT_ID.to_string()),
                control_addr,
                fanout_addr,
                timing,
                link: Mutex::new(link),
                prefixes: Mutex::new(vec![crate::control::INTERNAL_PREFIX.as_bytes().to_vec()]),
                sub_writer: Mutex::new(None),
                bus,
            }),
            thread: Arc::new(Mutex::new(None)),
        })
    }

    pub fn state(&self) -> PeerState {
        PeerState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Whether `start` has been called and `stop` has not completed.
    pub fn is_started(&self) -> bool {
        self.state() != PeerState::Idle
    }

    /// Whether the fan-out subscription is currently live.
    pub fn is_listening(&self) -> bool {
        self.state() == PeerState::Listening
    }

    pub fn id(&self) -> String {
        self.shared.id.lock().expect("id poisoned").clone()
    }

    /// One-shot liveness probe: a `__check` round trip on a throwaway
    /// control connection. True only if the acknowledgment arrived within
    /// `timeout`. Works with or without the receive loop running.
    pub fn probe(&self, timeout: std::time::Duration) -> bool {
        let stream = match crier_transport::connect(self.shared.control_addr, timeout) {
            Ok(stream) => stream,
            Err(_) => return false,
        };
        let read_stream = match stream.try_clone() {
            Ok(stream) => stream,
            Err(_) => return false,
        };

        let config = FrameConfig {
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
            ..FrameConfig::default()
        };
        let Ok(mut writer) = FrameWriter::with_config_tcp(stream, config.clone()) else {
            return false;
        };
        let Ok(mut reader) = FrameReader::with_config_tcp(read_stream, config) else {
            return false;
        };

        if writer.send(CHECK_TOPIC.as_bytes()).is_err() {
            return false;
        }
        matches!(reader.read_frame(), Ok(reply) if reply.as_ref() == ACK)
    }

    /// Spawn the receive loop, optionally wait until a broadcaster
    /// acknowledges, then announce this peer.
    pub fn start(&self, id: &str, wait: bool) -> Result<()> {
        if self
            .shared
            .state
            .compare_exchange(
                PeerState::Idle as u8,
                PeerState::Connecting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(NodeError::AlreadyRunning);
        }

        *self.shared.id.lock().expect("id poisoned") = id.to_string();
        self.shared.link.lock().expect("link poisoned").reset();

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("crier-peer".to_string())
            .spawn(move || receive_loop(&shared))
            .expect("spawning the receive loop");
        *self.thread.lock().expect("thread slot poisoned") = Some(handle);

        if wait {
            self.wait_for_server();
        }

        // Courtesy announcement; failure is logged, not fatal.
        let mut announce = Payload::new();
        announce.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        match self.send(CONNECT_TOPIC, announce) {
            Ok(true) => {}
            Ok(false) => debug!("connect announcement unacknowledged"),
            Err(err) => debug!(%err, "connect announcement failed"),
        }

        Ok(())
    }

    /// Probe until a broadcaster acknowledges or the retry budget runs
    /// out. Confirmation is the `__check` event coming back through the
    /// fan-out channel, proving the full send → rebroadcast → receive
    /// path.
    pub fn wait_for_server(&self) -> bool {
        let (tx, rx) = mpsc::channel();
        let handle = self.shared.bus.subscribe(
            CHECK_TOPIC,
            SenderFilter::Any,
            SubscriberRef::strong(move |_| {
                let _ = tx.send(());
            }),
        );

        let mut acknowledged = false;
        for _ in 0..WAIT_FOR_SERVER_ATTEMPTS {
            let _ = self.send(CHECK_TOPIC, Payload::new());
            if rx.recv_timeout(self.shared.timing.probe_timeout).is_ok() {
                acknowledged = true;
                break;
            }
        }

        self.shared.bus.unsubscribe(handle);
        if !acknowledged {
            warn!("no broadcaster acknowledged within the retry budget");
        }
        acknowledged
    }

    /// Encode and send an event over the control connection; block for
    /// the single acknowledgment.
    ///
    /// Returns `Ok(true)` iff the broadcaster acknowledged. Reply
    /// timeouts and transport failures are logged at error level and
    /// yield `Ok(false)`; only encode failures surface as `Err`.
    pub fn send(&self, topic: &str, mut payload: Payload) -> Result<bool> {
        if !payload.contains_key(SENDER_KEY) {
            payload.insert(
                SENDER_KEY.to_string(),
                serde_json::Value::String(self.id()),
            );
        }
        let body = encode_event(topic, &payload)?;

        let mut link = self.shared.link.lock().expect("link poisoned");
        match link.request(&body) {
            Ok(reply) => Ok(reply.as_ref() == ACK),
            Err(NodeError::ReplyTimeout(timeout)) => {
                error!(topic, ?timeout, "no acknowledgment from broadcaster");
                Ok(false)
            }
            Err(err) => {
                error!(topic, %err, "could not send message");
                Ok(false)
            }
        }
    }

    /// Add a transport-level topic-prefix filter to the fan-out
    /// subscription.
    ///
    /// An optimization only; the local bus filter is authoritative. When
    /// the fan-out connection is live the option frame goes out
    /// immediately; either way the full prefix set is replayed on every
    /// (re)connect.
    pub fn subscribe(&self, prefix: &str) {
        let bytes = prefix.as_bytes().to_vec();
        {
            let mut prefixes = self.shared.prefixes.lock().expect("prefixes poisoned");
            if prefixes.contains(&bytes) {
                return;
            }
            prefixes.push(bytes.clone());
        }

        let mut writer = self.shared.sub_writer.lock().expect("writer poisoned");
        if let Some(writer) = writer.as_mut() {
            if writer.send(&option_frame(&bytes)).is_err() {
                debug!(prefix, "subscription update deferred to reconnect");
            }
        }
    }

    /// Signal the receive loop and wait for it to exit. No-op when Idle.
    pub fn stop(&self) {
        if self.state() == PeerState::Idle {
            return;
        }

        self.shared
            .state
            .store(PeerState::Stopping as u8, Ordering::SeqCst);
        self.shared.stop.store(true, Ordering::SeqCst);

        let handle = self.thread.lock().expect("thread slot poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.shared
            .state
            .store(PeerState::Idle as u8, Ordering::SeqCst);
    }
}

fn option_frame(prefix: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + prefix.len());
    frame.push(SUBSCRIBE_OP);
    frame.extend_from_slice(prefix);
    frame
}

/// The receive loop: keep a fan-out subscription alive (reconnecting
/// across broadcaster restarts), decode incoming frames, and hand them to
/// the bus. The bounded-timeout read is the cooperative cancellation
/// point.
fn receive_loop(shared: &Arc<PeerShared>) {
    let mut reader: Option<FrameReader<TcpStream>> = None;

    while !shared.stop.load(Ordering::SeqCst) {
        let Some(active) = reader.as_mut() else {
            match connect_fanout(shared) {
                Ok(connected) => {
                    reader = Some(connected);
                    shared
                        .state
                        .store(PeerState::Listening as u8, Ordering::SeqCst);
                    info!(addr = %shared.fanout_addr, "fan-out subscription live");
                }
                Err(_) => std::thread::sleep(shared.timing.reconnect_delay),
            }
            continue;
        };

        match active.read_frame() {
            Ok(body) => dispatch(shared, &body),
            Err(FrameError::TimedOut) => {}
            Err(err) => {
                debug!(%err, "fan-out connection lost; reconnecting");
                reader = None;
                *shared.sub_writer.lock().expect("writer poisoned") = None;
                shared
                    .state
                    .store(PeerState::Connecting as u8, Ordering::SeqCst);
                std::thread::sleep(shared.timing.reconnect_delay);
            }
        }
    }

    *shared.sub_writer.lock().expect("writer poisoned") = None;
}

/// Connect the fan-out subscription and replay the full prefix set.
fn connect_fanout(shared: &Arc<PeerShared>) -> Result<FrameReader<TcpStream>> {
    let stream = crier_transport::connect(shared.fanout_addr, shared.timing.connect_timeout)?;
    let write_stream = stream.try_clone().map_err(TransportError::Io)?;

    let config = FrameConfig {
        read_timeout: Some(shared.timing.poll_interval),
        write_timeout: Some(shared.timing.reply_timeout),
        ..FrameConfig::default()
    };

    let mut writer = FrameWriter::with_config_tcp(write_stream, config.clone())?;
    let reader = FrameReader::with_config_tcp(stream, config)?;

    // The prefixes lock is held until the writer handle is published, so
    // a concurrent `subscribe` either lands in the replayed set or sends
    // through the live writer. Lock order (prefixes, then writer) matches
    // `subscribe`.
    let prefixes = shared.prefixes.lock().expect("prefixes poisoned");
    for prefix in prefixes.iter() {
        writer.send(&option_frame(prefix))?;
    }
    *shared.sub_writer.lock().expect("writer poisoned") = Some(writer);
    drop(prefixes);

    Ok(reader)
}

/// Decode a received frame and publish it locally. Undecodable frames
/// are dropped; the loop never dies on them.
fn dispatch(shared: &Arc<PeerShared>, body: &[u8]) {
    match decode_event(body) {
        Ok((topic, mut payload)) => {
            if !payload.contains_key(SENDER_KEY) {
                let id = shared.id.lock().expect("id poisoned").clone();
                payload.insert(SENDER_KEY.to_string(), serde_json::Value::String(id));
            }
            shared.bus.publish(&topic, &payload);
        }
        Err(err) => warn!(%err, "dropping undecodable frame"),
    }
}
