//! # Channel Dispatch Engine
//!
//! A [`Channel`] is one logical sub-protocol multiplexed over a connection:
//! it owns an ordered list of packet definitions, an ordered list of
//! handlers, and the pending one-shot correlation entries created by
//! [`Channel::send_and_wait`].
//!
//! ## Dispatch
//! Inbound packet data is matched against definitions in registration
//! order (id plus `matches` predicate, first match wins), parsed into a
//! typed packet, then handled either inline on the read task (synchronized
//! definitions) or on a spawned task. Handling offers the packet to pending
//! correlation entries first; otherwise handlers run in registration order
//! until one reports it handled the packet. Unregistered and unhandled
//! packets are logged and tolerated; they never close the connection.
//!
//! ## Binding
//! A channel instance binds to exactly one connection. Re-binding is
//! refused, which keeps registries immutable once traffic starts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::core::codec::Frame;
use crate::error::{ProtocolError, Result};
use crate::protocol::extension::ExtensionHub;
use crate::protocol::packet::{PacketData, SfsPacket};
use crate::server::connection::SessionMemory;

/// Default `send_and_wait` timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Outbound frame queue of one connection. Frames pushed here are written
/// by the connection's writer task in push order, never interleaved.
pub type FrameSender = mpsc::UnboundedSender<Frame>;

/// Per-connection state shared with handlers.
pub struct ChannelContext {
    /// Remote peer, for logging.
    pub remote: String,
    /// Typed per-connection key/value store.
    pub memory: Arc<SessionMemory>,
    /// Extension-message hubs bound to the same connection.
    pub extensions: Vec<Arc<ExtensionHub>>,
    /// Timeout used by [`Channel::send_and_wait_default`], taken from the
    /// server configuration at bind time.
    pub response_timeout: Duration,
}

/// Typed handler for packets of type `P`.
///
/// Closures with the signature `Fn(&P, &Channel) -> Result<bool>` implement
/// this trait directly. Returning `Ok(false)` passes the packet on to the
/// next handler in registration order.
pub trait PacketHandler<P: SfsPacket>: Send + Sync + 'static {
    /// Refinement predicate; a refusal passes the packet on without
    /// counting as handled.
    fn can_handle(&self, _packet: &P) -> bool {
        true
    }

    /// Handles the packet. `Ok(true)` stops the handler search.
    fn handle(&self, packet: &P, channel: &Channel) -> Result<bool>;
}

impl<P, F> PacketHandler<P> for F
where
    P: SfsPacket,
    F: Fn(&P, &Channel) -> Result<bool> + Send + Sync + 'static,
{
    fn handle(&self, packet: &P, channel: &Channel) -> Result<bool> {
        self(packet, channel)
    }
}

type ErasedHandler = Box<dyn Fn(&dyn SfsPacket, &Channel) -> Result<Option<bool>> + Send + Sync>;

/// Collects definitions and handlers during channel construction.
#[derive(Default)]
pub struct ChannelRegistry {
    definitions: Vec<Box<dyn SfsPacket>>,
    handlers: Vec<ErasedHandler>,
}

impl ChannelRegistry {
    /// Registers a packet definition prototype. Registration order is
    /// dispatch order for definitions sharing an id.
    pub fn define(&mut self, prototype: impl SfsPacket) -> &mut Self {
        self.definitions.push(Box::new(prototype));
        self
    }

    /// Registers a handler for packets of concrete type `P`. Packets of
    /// other types pass through without being offered to it.
    pub fn handle<P: SfsPacket>(&mut self, handler: impl PacketHandler<P>) -> &mut Self {
        self.handlers.push(Box::new(move |packet, channel| {
            match packet.downcast_ref::<P>() {
                Some(typed) if handler.can_handle(typed) => {
                    handler.handle(typed, channel).map(Some)
                }
                _ => Ok(None),
            }
        }));
        self
    }
}

/// Describes one channel type: its id, name, and registrations.
///
/// Specs are shared across connections and stamp out one [`Channel`]
/// instance per connection.
pub trait ChannelSpec: Send + Sync + 'static {
    fn channel_id(&self) -> i32;
    fn name(&self) -> &'static str;
    fn configure(&self, registry: &mut ChannelRegistry);
}

struct PendingResponse {
    token: u64,
    predicate: Box<dyn Fn(&dyn SfsPacket) -> bool + Send>,
    sender: oneshot::Sender<Box<dyn SfsPacket>>,
}

struct Binding {
    sender: FrameSender,
    context: ChannelContext,
}

/// One channel instance, bound to at most one connection.
pub struct Channel {
    id: i32,
    name: &'static str,
    definitions: Vec<Box<dyn SfsPacket>>,
    handlers: Vec<ErasedHandler>,
    pending: Mutex<Vec<PendingResponse>>,
    next_token: AtomicU64,
    binding: OnceLock<Binding>,
}

impl Channel {
    /// Builds a fresh instance from a spec.
    pub fn from_spec(spec: &dyn ChannelSpec) -> Arc<Self> {
        let mut registry = ChannelRegistry::default();
        spec.configure(&mut registry);
        Arc::new(Self {
            id: spec.channel_id(),
            name: spec.name(),
            definitions: registry.definitions,
            handlers: registry.handlers,
            pending: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            binding: OnceLock::new(),
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Binds this instance to a connection's outbound queue. Returns
    /// `None` if already bound; the original binding is unaffected.
    pub fn bind(&self, sender: FrameSender, context: ChannelContext) -> Option<()> {
        let mut accepted = false;
        let _ = self.binding.get_or_init(|| {
            accepted = true;
            Binding { sender, context }
        });
        accepted.then_some(())
    }

    pub fn is_bound(&self) -> bool {
        self.binding.get().is_some()
    }

    /// Per-connection context. Fails with [`ProtocolError::ChannelUnbound`]
    /// before [`Channel::bind`].
    pub fn context(&self) -> Result<&ChannelContext> {
        self.binding
            .get()
            .map(|b| &b.context)
            .ok_or(ProtocolError::ChannelUnbound)
    }

    fn remote(&self) -> &str {
        self.binding
            .get()
            .map_or("<unbound>", |b| b.context.remote.as_str())
    }

    /// Builds and queues one outbound packet.
    pub fn send(&self, packet: &dyn SfsPacket) -> Result<()> {
        let binding = self.binding.get().ok_or(ProtocolError::ChannelUnbound)?;
        let mut data = PacketData::new(self.id, packet.packet_id());
        packet.build(&mut data)?;
        let body = data.encode_frame_body()?;
        binding
            .sender
            .send(Frame::Data(body))
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Sends `packet` and waits for the first inbound packet of type `T`,
    /// or `None` on timeout. The pending entry is removed on completion
    /// and on timeout alike.
    ///
    /// Must not be called from a synchronized handler running on the
    /// connection's own read task, or the wait deadlocks against the loop
    /// that would deliver the response.
    pub async fn send_and_wait<T: SfsPacket>(
        &self,
        packet: &dyn SfsPacket,
        timeout: Duration,
    ) -> Result<Option<Box<T>>> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.lock_pending().push(PendingResponse {
            token,
            predicate: Box::new(|candidate| candidate.is::<T>()),
            sender: tx,
        });

        if let Err(e) = self.send(packet) {
            self.remove_pending(token);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(matched)) => Ok(matched.downcast::<T>()),
            Ok(Err(_)) | Err(_) => {
                self.remove_pending(token);
                Ok(None)
            }
        }
    }

    /// [`Channel::send_and_wait`] with the connection's configured
    /// response timeout, or [`DEFAULT_RESPONSE_TIMEOUT`] when unbound.
    pub async fn send_and_wait_default<T: SfsPacket>(
        &self,
        packet: &dyn SfsPacket,
    ) -> Result<Option<Box<T>>> {
        let timeout = self
            .binding
            .get()
            .map_or(DEFAULT_RESPONSE_TIMEOUT, |b| b.context.response_timeout);
        self.send_and_wait(packet, timeout).await
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<PendingResponse>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn remove_pending(&self, token: u64) {
        self.lock_pending().retain(|entry| entry.token != token);
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    /// Routes one decoded envelope through this channel.
    pub fn dispatch(self: &Arc<Self>, data: PacketData) {
        let Some(definition) = self
            .definitions
            .iter()
            .find(|d| d.packet_id() == data.packet_id && d.matches(&data))
        else {
            error!(
                channel = self.name,
                packet_id = data.packet_id,
                peer = self.remote(),
                "Unregistered packet"
            );
            return;
        };

        let mut packet = definition.create();
        if let Err(e) = packet.parse(&data) {
            error!(
                channel = self.name,
                packet_id = data.packet_id,
                peer = self.remote(),
                error = %e,
                "Failed to parse packet"
            );
            return;
        }

        if packet.synchronized() {
            self.complete_dispatch(packet);
        } else {
            let channel = Arc::clone(self);
            tokio::spawn(async move {
                channel.complete_dispatch(packet);
            });
        }
    }

    fn complete_dispatch(&self, packet: Box<dyn SfsPacket>) {
        let packet_id = packet.packet_id();
        match self.handle_packet(packet) {
            Ok(true) => {}
            Ok(false) => error!(
                channel = self.name,
                packet_id,
                peer = self.remote(),
                "Unhandled packet"
            ),
            Err(e) => error!(
                channel = self.name,
                packet_id,
                peer = self.remote(),
                error = %e,
                "Handler failed"
            ),
        }
    }

    /// Offers `packet` to pending correlations, then to handlers.
    fn handle_packet(&self, packet: Box<dyn SfsPacket>) -> Result<bool> {
        let claimed = {
            let mut pending = self.lock_pending();
            pending
                .iter()
                .position(|entry| (entry.predicate)(packet.as_ref()))
                .map(|pos| pending.remove(pos))
        };
        if let Some(entry) = claimed {
            if entry.sender.send(packet).is_err() {
                // Waiter already timed out between predicate check and send.
                debug!(channel = self.name, "Correlated response arrived late");
            }
            return Ok(true);
        }

        for handler in &self.handlers {
            match handler(packet.as_ref(), self) {
                Ok(Some(true)) => return Ok(true),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        channel = self.name,
                        peer = self.remote(),
                        error = %e,
                        "Handler returned error, continuing search"
                    );
                }
            }
        }
        Ok(false)
    }
}
