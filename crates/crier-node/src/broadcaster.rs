use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crier_frame::{FrameConfig, FrameReader, FrameWriter};
use crier_transport::TcpEndpoint;
use tracing::{debug, info, warn};

use crate::control::{ACK, SERVER_DISCONNECT_TOPIC, SUBSCRIBE_OP, UNSUBSCRIBE_OP};
use crate::error::{NodeError, Result};

/// Broadcaster lifecycle. A stopped instance is replaced, never
/// restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BroadcasterState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl BroadcasterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
    poll_interval: Duration,
}

/// The single process per port that answers control requests and
/// republishes them on the fan-out channel.
///
/// A dumb rebroadcaster: no payload inspection, no topic filtering.
/// All filtering happens at subscribers. Cheap to clone; clones share
/// the same instance.
#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Broadcaster {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(BroadcasterState::Stopped as u8),
                stop: AtomicBool::new(false),
                poll_interval,
            }),
            thread: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> BroadcasterState {
        BroadcasterState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == BroadcasterState::Running
    }

    /// Bind the control listener at `address:port` and the fan-out
    /// listener at `address:port+1`, then enter the serve loop on a
    /// background thread.
    ///
    /// A bind failure leaves the role Stopped and is returned to the
    /// caller; during election it means another process won the race.
    pub fn start(&self, address: &str, port: u16) -> Result<()> {
        if self
            .shared
            .state
            .compare_exchange(
                BroadcasterState::Stopped as u8,
                BroadcasterState::Starting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(NodeError::AlreadyRunning);
        }

        let fanout_port = match port.checked_add(1) {
            Some(p) => p,
            None => {
                self.shared
                    .state
                    .store(BroadcasterState::Stopped as u8, Ordering::SeqCst);
                return Err(NodeError::PortOverflow(port));
            }
        };

        let bound = crier_transport::bind_addr(address, port)
            .and_then(TcpEndpoint::bind)
            .and_then(|control| {
                let fanout =
                    TcpEndpoint::bind(crier_transport::bind_addr(address, fanout_port)?)?;
                Ok((control, fanout))
            });

        let (control, fanout) = match bound {
            Ok(endpoints) => endpoints,
            Err(err) => {
                self.shared
                    .state
                    .store(BroadcasterState::Stopped as u8, Ordering::SeqCst);
                return Err(err.into());
            }
        };

        info!(address, port, "broadcaster starting");

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("crier-broadcaster".to_string())
            .spawn(move || serve(&shared, control, fanout))
            .expect("spawning the serve thread");

        *self.thread.lock().expect("thread slot poisoned") = Some(handle);
        self.shared
            .state
            .store(BroadcasterState::Running as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Signal the serve loop and block until it has exited and released
    /// its sockets. No-op when already Stopped.
    pub fn stop(&self) {
        if self.state() == BroadcasterState::Stopped {
            return;
        }

        self.shared
            .state
            .store(BroadcasterState::Stopping as u8, Ordering::SeqCst);
        self.shared.stop.store(true, Ordering::SeqCst);

        let handle = self.thread.lock().expect("thread slot poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.shared
            .state
            .store(BroadcasterState::Stopped as u8, Ordering::SeqCst);
    }
}

struct ControlConn {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
}

struct FanoutConn {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
    prefixes: Vec<Vec<u8>>,
}

impl FanoutConn {
    fn matches(&self, body: &[u8]) -> bool {
        self.prefixes.iter().any(|prefix| body.starts_with(prefix))
    }

    fn apply_option(&mut self, body: &[u8]) {
        match body.split_first() {
            Some((&SUBSCRIBE_OP, prefix)) => {
                let prefix = prefix.to_vec();
                if !self.prefixes.contains(&prefix) {
                    self.prefixes.push(prefix);
                }
            }
            Some((&UNSUBSCRIBE_OP, prefix)) => {
                if let Some(index) = self.prefixes.iter().position(|p| p == prefix) {
                    self.prefixes.remove(index);
                }
            }
            _ => debug!("ignoring unknown fan-out option frame"),
        }
    }
}

fn split_conn(stream: TcpStream) -> std::io::Result<(FrameReader<TcpStream>, FrameWriter<TcpStream>)> {
    let write_stream = stream.try_clone()?;
    let config = FrameConfig::default();
    Ok((
        FrameReader::with_config(stream, config.clone()),
        FrameWriter::with_config(write_stream, config),
    ))
}

/// The serve loop: strict request/reply on the control channel (the ack
/// goes out before anything else), verbatim republish on the fan-out
/// channel, subscription option frames from subscribers. Cooperative
/// cancellation via the stop flag, checked every iteration.
fn serve(shared: &Shared, control: TcpEndpoint, fanout: TcpEndpoint) {
    let mut clients: Vec<ControlConn> = Vec::new();
    let mut subscribers: Vec<FanoutConn> = Vec::new();

    while !shared.stop.load(Ordering::SeqCst) {
        let mut busy = false;

        while let Ok(Some(stream)) = control.try_accept() {
            match split_conn(stream) {
                Ok((reader, writer)) => {
                    clients.push(ControlConn { reader, writer });
                    busy = true;
                }
                Err(err) => warn!(%err, "control connection setup failed"),
            }
        }

        while let Ok(Some(stream)) = fanout.try_accept() {
            match split_conn(stream) {
                Ok((reader, writer)) => {
                    subscribers.push(FanoutConn {
                        reader,
                        writer,
                        prefixes: Vec::new(),
                    });
                    busy = true;
                }
                Err(err) => warn!(%err, "fan-out connection setup failed"),
            }
        }

        // Apply pending subscription updates before rebroadcasting, so a
        // prefix registered just ahead of a send is already in effect.
        subscribers.retain_mut(|sub| loop {
            match sub.reader.try_read_frame() {
                Ok(Some(body)) => {
                    busy = true;
                    sub.apply_option(&body);
                }
                Ok(None) => return true,
                Err(_) => return false,
            }
        });

        let mut received: Vec<Bytes> = Vec::new();
        clients.retain_mut(|conn| loop {
            match conn.reader.try_read_frame() {
                Ok(Some(body)) => {
                    // Reply first: the sender blocks waiting for exactly
                    // one ack.
                    if conn.writer.send(ACK).is_err() {
                        return false;
                    }
                    received.push(body);
                }
                Ok(None) => return true,
                Err(_) => return false,
            }
        });

        for body in &received {
            busy = true;
            rebroadcast(&mut subscribers, body);
        }

        if !busy {
            std::thread::sleep(shared.poll_interval);
        }
    }

    // Best-effort shutdown notice before the sockets go away.
    rebroadcast(&mut subscribers, SERVER_DISCONNECT_TOPIC.as_bytes());
    debug!("serve loop exited");
}

fn rebroadcast(subscribers: &mut Vec<FanoutConn>, body: &[u8]) {
    subscribers.retain_mut(|sub| {
        if !sub.matches(body) {
            return true;
        }
        sub.writer.send(body).is_ok()
    });
}

#[cfg(test)]
mod tests {
    use std::net::{SocketAddr, TcpListener};
    use std::time::Duration;

    use crier_frame::FrameConfig;

    use super::*;
    use crate::control::INTERNAL_PREFIX;

    fn free_port_pair() -> u16 {
        loop {
            let probe = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            let port = probe.local_addr().unwrap().port();
            if port == u16::MAX {
                continue;
            }
            if TcpListener::bind(("127.0.0.1", port + 1)).is_ok() {
                drop(probe);
                return port;
            }
        }
    }

    fn framed_client(addr: SocketAddr) -> (FrameReader<TcpStream>, FrameWriter<TcpStream>) {
        let stream = crier_transport::connect(addr, Duration::from_millis(500)).unwrap();
        let config = FrameConfig {
            read_timeout: Some(Duration::from_millis(500)),
            write_timeout: Some(Duration::from_millis(500)),
            ..FrameConfig::default()
        };
        let read_stream = stream.try_clone().unwrap();
        (
            FrameReader::with_config_tcp(read_stream, config.clone()).unwrap(),
            FrameWriter::with_config_tcp(stream, config).unwrap(),
        )
    }

    #[test]
    fn acks_every_control_request() {
        let port = free_port_pair();
        let broadcaster = Broadcaster::new(Duration::from_millis(5));
        broadcaster.start("127.0.0.1", port).unwrap();

        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let (mut reader, mut writer) = framed_client(addr);

        writer.send(b"__check").unwrap();
        assert_eq!(reader.read_frame().unwrap().as_ref(), ACK);

        writer.send(b"evt {\"n\":1}").unwrap();
        assert_eq!(reader.read_frame().unwrap().as_ref(), ACK);

        broadcaster.stop();
    }

    #[test]
    fn rebroadcasts_to_matching_subscribers_verbatim() {
        let port = free_port_pair();
        let broadcaster = Broadcaster::new(Duration::from_millis(5));
        broadcaster.start("127.0.0.1", port).unwrap();

        let control_addr = SocketAddr::from(([127, 0, 0, 1], port));
        let fanout_addr = SocketAddr::from(([127, 0, 0, 1], port + 1));

        let (mut sub_reader, mut sub_writer) = framed_client(fanout_addr);
        let mut subscribe = vec![SUBSCRIBE_OP];
        subscribe.extend_from_slice(b"evt");
        sub_writer.send(&subscribe).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let (mut ctl_reader, mut ctl_writer) = framed_client(control_addr);
        ctl_writer.send(b"evt {\"n\":7}").unwrap();
        assert_eq!(ctl_reader.read_frame().unwrap().as_ref(), ACK);

        let body = sub_reader.read_frame().unwrap();
        assert_eq!(body.as_ref(), b"evt {\"n\":7}");

        broadcaster.stop();
    }

    #[test]
    fn non_matching_prefix_is_filtered() {
        let port = free_port_pair();
        let broadcaster = Broadcaster::new(Duration::from_millis(5));
        broadcaster.start("127.0.0.1", port).unwrap();

        let control_addr = SocketAddr::from(([127, 0, 0, 1], port));
        let fanout_addr = SocketAddr::from(([127, 0, 0, 1], port + 1));

        let (mut sub_reader, mut sub_writer) = framed_client(fanout_addr);
        let mut subscribe = vec![SUBSCRIBE_OP];
        subscribe.extend_from_slice(b"other");
        sub_writer.send(&subscribe).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let (mut ctl_reader, mut ctl_writer) = framed_client(control_addr);
        ctl_writer.send(b"evt {}").unwrap();
        assert_eq!(ctl_reader.read_frame().unwrap().as_ref(), ACK);

        assert!(sub_reader.read_frame().is_err());

        broadcaster.stop();
    }

    #[test]
    fn stop_sends_shutdown_notice_to_internal_subscribers() {
        let port = free_port_pair();
        let broadcaster = Broadcaster::new(Duration::from_millis(5));
        broadcaster.start("127.0.0.1", port).unwrap();

        let fanout_addr = SocketAddr::from(([127, 0, 0, 1], port + 1));
        let (mut sub_reader, mut sub_writer) = framed_client(fanout_addr);
        let mut subscribe = vec![SUBSCRIBE_OP];
        subscribe.extend_from_slice(INTERNAL_PREFIX.as_bytes());
        sub_writer.send(&subscribe).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        broadcaster.stop();

        let body = sub_reader.read_frame().unwrap();
        assert_eq!(body.as_ref(), SERVER_DISCONNECT_TOPIC.as_bytes());
    }

    #[test]
    fn bind_conflict_leaves_role_stopped() {
        let port = free_port_pair();
        let first = Broadcaster::new(Duration::from_millis(5));
        first.start("127.0.0.1", port).unwrap();

        let second = Broadcaster::new(Duration::from_millis(5));
        let err = second.start("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, NodeError::Transport(_)));
        assert_eq!(second.state(), BroadcasterState::Stopped);

        first.stop();
        assert_eq!(first.state(), BroadcasterState::Stopped);
    }

    #[test]
    fn stop_when_stopped_is_noop() {
        let broadcaster = Broadcaster::new(Duration::from_millis(5));
        broadcaster.stop();
        broadcaster.stop();
        assert_eq!(broadcaster.state(), BroadcasterState::Stopped);
    }

    #[test]
    fn start_twice_is_already_running() {
        let port = free_port_pair();
        let broadcaster = Broadcaster::new(Duration::from_millis(5));
        broadcaster.start("127.0.0.1", port).unwrap();

        let err = broadcaster.start("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, NodeError::AlreadyRunning));

        broadcaster.stop();
    }
}
