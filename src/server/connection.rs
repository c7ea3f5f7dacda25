//! # Connection Lifecycle
//!
//! One accepted socket becomes one [`Connection`]: a handshake, a read
//! loop, a writer task draining the outbound queue, and a keep-alive task.
//!
//! ## States
//! `Connecting -> Handshaking -> Open -> Closing -> Closed`. The hello must
//! arrive and validate before the connection reaches Open; a handshake
//! failure never produces a disconnect event because the connection never
//! existed as far as the server is concerned.
//!
//! ## Read loop
//! The loop owns the read half exclusively. Synchronized packets are
//! handled inline here, which is what gives them their ordering guarantee.
//! A framing or decode error is the only thing that forcibly closes the
//! connection; malformed-but-decodable packets are logged and survived.
//!
//! ## Writes
//! All outbound traffic funnels through one queue drained by the writer
//! task, so concurrent senders can never interleave frames. The keep-alive
//! task queues a ping when nothing has been written for the configured
//! interval.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::core::codec::{self, Frame, FrameCodec};
use crate::error::{ProtocolError, Result};
use crate::protocol::channel::{Channel, ChannelContext, FrameSender};
use crate::protocol::extension::ExtensionHub;
use crate::protocol::packet::{PacketData, RESERVED_CHANNEL_ID, SYSTEM_CHANNEL_ID};
use crate::room::PlayerBinding;
use crate::channels::system::{ClientboundHandshakeAck, ServerboundHandshake};
use crate::protocol::packet::SfsPacket;

/// Typed per-connection key/value store.
///
/// Values are keyed by their type; handlers use it to attach session
/// state such as [`PlayerBinding`] without the core knowing the shape.
#[derive(Default)]
pub struct SessionMemory {
    entries: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any previous value of the same type.
    pub fn set<T: Any + Send + Sync>(&self, value: T) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Fetches the stored value of type `T`, if any.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let value = entries.get(&TypeId::of::<T>())?.clone();
        value.downcast::<T>().ok()
    }

    /// Removes the stored value of type `T`. Returns whether one existed.
    pub fn remove<T: Any + Send + Sync>(&self) -> bool {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(&TypeId::of::<T>()).is_some()
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Open,
    Closing,
    Closed,
}

/// Shared handle to one live client connection.
pub struct Connection {
    id: i32,
    session_token: String,
    remote: SocketAddr,
    outbound: FrameSender,
    channels: Vec<Arc<Channel>>,
    extensions: Vec<Arc<ExtensionHub>>,
    memory: Arc<SessionMemory>,
    state: Mutex<ConnectionState>,
    connected: AtomicBool,
}

impl Connection {
    /// Server-assigned numeric id, unique among live connections.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Session token issued in the handshake acknowledgement.
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = next;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The bound channel instance with the given id.
    pub fn channel(&self, id: i32) -> Option<&Arc<Channel>> {
        self.channels.iter().find(|c| c.id() == id)
    }

    /// The system channel. Always present.
    pub fn system_channel(&self) -> Result<&Arc<Channel>> {
        self.channel(SYSTEM_CHANNEL_ID)
            .ok_or(ProtocolError::ChannelUnbound)
    }

    /// Extension hubs bound to this connection.
    pub fn extensions(&self) -> &[Arc<ExtensionHub>] {
        &self.extensions
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    /// The player this connection authenticated as, once a login handler
    /// has stored a [`PlayerBinding`].
    pub fn player(&self) -> Option<Arc<PlayerBinding>> {
        self.memory.get::<PlayerBinding>()
    }

    /// Queues one raw frame.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Begins a graceful close: queues the disconnect frame and marks the
    /// connection closing. Idempotent.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.set_state(ConnectionState::Closing);
            let _ = self.outbound.send(Frame::Disconnect);
        }
    }

    /// Socketless connection wired straight to a frame receiver.
    #[cfg(test)]
    pub(crate) fn for_tests(
        id: i32,
        channels: Vec<Arc<Channel>>,
        extensions: Vec<Arc<ExtensionHub>>,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection {
            id,
            session_token: Uuid::new_v4().to_string(),
            remote: SocketAddr::from(([127, 0, 0, 1], 0)),
            outbound: tx.clone(),
            channels,
            extensions,
            memory: Arc::new(SessionMemory::new()),
            state: Mutex::new(ConnectionState::Open),
            connected: AtomicBool::new(true),
        });
        for channel in &connection.channels {
            let context = ChannelContext {
                remote: connection.remote.to_string(),
                memory: Arc::clone(&connection.memory),
                extensions: connection.extensions.clone(),
                response_timeout: crate::config::RESPONSE_TIMEOUT,
            };
            channel.bind(tx.clone(), context);
        }
        for hub in &connection.extensions {
            hub.bind(tx.clone());
        }
        (connection, rx)
    }
}

/// Everything the server hands over for one accepted socket.
pub(crate) struct ConnectionParams {
    pub id: i32,
    pub config: Arc<ServerConfig>,
    pub channels: Vec<Arc<Channel>>,
    pub extensions: Vec<Arc<ExtensionHub>>,
}

/// Owns the read half and background tasks of one connection; consumed
/// by [`ConnectionDriver::run`].
pub(crate) struct ConnectionDriver {
    connection: Arc<Connection>,
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer_task: JoinHandle<()>,
    keep_alive_task: JoinHandle<()>,
}

/// Performs the handshake and wires up a fresh connection.
///
/// On success the connection is Open: channels are bound, the
/// acknowledgement is queued, and the returned driver is ready to run the
/// read loop. A failure here means the client never connected.
pub(crate) async fn establish(
    stream: TcpStream,
    remote: SocketAddr,
    params: ConnectionParams,
) -> Result<(Arc<Connection>, ConnectionDriver)> {
    let config = params.config;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, FrameCodec::new(config.max_frame_size));
    let writer = FramedWrite::new(write_half, FrameCodec::new(config.max_frame_size));

    let hello = read_hello(&mut reader, config.handshake_timeout).await?;
    debug!(
        peer = %remote,
        api = %hello.api_version,
        client = %hello.client_type,
        "Handshake hello received"
    );

    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let last_write = Arc::new(Mutex::new(Instant::now()));

    let connection = Arc::new(Connection {
        id: params.id,
        session_token: Uuid::new_v4().to_string(),
        remote,
        outbound: outbound.clone(),
        channels: params.channels,
        extensions: params.extensions,
        memory: Arc::new(SessionMemory::new()),
        state: Mutex::new(ConnectionState::Handshaking),
        connected: AtomicBool::new(true),
    });

    for channel in &connection.channels {
        let context = ChannelContext {
            remote: remote.to_string(),
            memory: Arc::clone(&connection.memory),
            extensions: connection.extensions.clone(),
            response_timeout: config.response_timeout,
        };
        if channel.bind(outbound.clone(), context).is_none() {
            return Err(ProtocolError::HandshakeError(format!(
                "channel {} was already bound",
                channel.name()
            )));
        }
    }
    for hub in &connection.extensions {
        if hub.bind(outbound.clone()).is_none() {
            return Err(ProtocolError::HandshakeError(format!(
                "extension hub {} was already bound",
                hub.name()
            )));
        }
    }

    let ack = ClientboundHandshakeAck {
        session_token: connection.session_token.clone(),
        compression_threshold: config.compression_threshold,
        max_message_size: config.max_frame_size as i32,
    };
    connection.system_channel()?.send(&ack)?;
    connection.set_state(ConnectionState::Open);

    let writer_task = spawn_writer(writer, outbound_rx, Arc::clone(&last_write));
    let keep_alive_task = spawn_keep_alive(
        outbound,
        Arc::clone(&last_write),
        config.keep_alive_interval,
    );

    info!(peer = %remote, id = params.id, "Connection established");
    Ok((
        Arc::clone(&connection),
        ConnectionDriver {
            connection,
            reader,
            writer_task,
            keep_alive_task,
        },
    ))
}

/// Drains the outbound queue into the socket. `SinkExt::send` flushes per
/// frame, so a queued frame is on the wire before the next is taken.
fn spawn_writer(
    mut writer: FramedWrite<tokio::net::tcp::OwnedWriteHalf, FrameCodec>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    last_write: Arc<Mutex<Instant>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = matches!(frame, Frame::Disconnect);
            if let Err(e) = writer.send(frame).await {
                debug!(error = %e, "Write failed, stopping writer");
                break;
            }
            {
                let mut last = match last_write.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *last = Instant::now();
            }
            if closing {
                break;
            }
        }
    })
}

fn spawn_keep_alive(
    outbound: FrameSender,
    last_write: Arc<Mutex<Instant>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let idle = {
                let last = match last_write.lock() {
                    Ok(guard) => *guard,
                    Err(poisoned) => *poisoned.into_inner(),
                };
                last.elapsed()
            };
            if idle >= interval && outbound.send(Frame::Ping).is_err() {
                break;
            }
        }
    })
}

async fn read_hello(
    reader: &mut FramedRead<OwnedReadHalf, FrameCodec>,
    timeout: Duration,
) -> Result<ServerboundHandshake> {
    let frame = tokio::time::timeout(timeout, reader.next())
        .await
        .map_err(|_| ProtocolError::HandshakeError("hello timed out".into()))?
        .ok_or_else(|| ProtocolError::HandshakeError("connection closed before hello".into()))??;

    let Frame::Data(body) = frame else {
        return Err(ProtocolError::HandshakeError(
            "expected hello data frame".into(),
        ));
    };

    // The hello still uses the legacy envelope object form.
    let envelope = codec::decode_object(&body)?;
    let data = PacketData::from_legacy_object(envelope)?;
    if data.channel_id != SYSTEM_CHANNEL_ID || data.packet_id != 0 {
        return Err(ProtocolError::HandshakeError(format!(
            "hello addressed channel {} packet {}",
            data.channel_id, data.packet_id
        )));
    }
    let prototype = ServerboundHandshake::default();
    if !prototype.matches(&data) {
        return Err(ProtocolError::HandshakeError(
            "hello payload is not well-formed".into(),
        ));
    }
    let mut hello = ServerboundHandshake::default();
    hello.parse(&data)?;
    if hello.api_version.is_empty() {
        return Err(ProtocolError::HandshakeError("empty api version".into()));
    }
    Ok(hello)
}

impl ConnectionDriver {
    /// Runs the read loop until the connection closes, then tears down the
    /// background tasks. This is the only place a connection is forcibly
    /// closed.
    pub(crate) async fn run(mut self) {
        let connection = Arc::clone(&self.connection);
        let peer = connection.remote();

        while let Some(item) = self.reader.next().await {
            match item {
                Ok(Frame::Ping) => {}
                Ok(Frame::Disconnect) => {
                    info!(peer = %peer, "Peer requested disconnect");
                    break;
                }
                Ok(Frame::Data(body)) => match PacketData::decode_frame_body(&body) {
                    Ok(data) if data.channel_id == RESERVED_CHANNEL_ID => {
                        // Reserved traffic mirrors the frame types; tolerate
                        // clients that send it as data.
                        if data.packet_id == 0 {
                            info!(peer = %peer, "Peer requested disconnect");
                            break;
                        }
                    }
                    Ok(data) => match connection.channel(data.channel_id) {
                        Some(channel) => channel.dispatch(data),
                        None => warn!(
                            peer = %peer,
                            channel_id = data.channel_id,
                            "Frame for unknown channel"
                        ),
                    },
                    Err(e) => {
                        error!(peer = %peer, error = %e, "Fatal decode error");
                        break;
                    }
                },
                Err(e) => {
                    error!(peer = %peer, error = %e, "Fatal framing error");
                    break;
                }
            }
        }

        connection.disconnect();
        self.keep_alive_task.abort();
        // Writer drains the disconnect frame, then exits.
        let _ = self.writer_task.await;
        connection.set_state(ConnectionState::Closed);
        info!(peer = %peer, id = connection.id(), "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_memory_is_typed() {
        let memory = SessionMemory::new();
        memory.set(PlayerBinding {
            player_id: "bob".into(),
            numeric_id: 7,
        });
        memory.set(42u64);

        let binding = memory.get::<PlayerBinding>().unwrap();
        assert_eq!(binding.player_id, "bob");
        assert_eq!(*memory.get::<u64>().unwrap(), 42);
        assert!(memory.get::<String>().is_none());
    }

    #[test]
    fn session_memory_replace_and_remove() {
        let memory = SessionMemory::new();
        memory.set(1u32);
        memory.set(2u32);
        assert_eq!(*memory.get::<u32>().unwrap(), 2);

        assert!(memory.remove::<u32>());
        assert!(!memory.remove::<u32>());
        assert!(memory.get::<u32>().is_none());
    }
}
