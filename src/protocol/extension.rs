//! # Extension Messages
//!
//! Custom, command-keyed messages tunneled through the extension channel.
//!
//! On the wire an extension message is an ordinary packet (channel 1,
//! packet id 13) whose payload carries the command string under `c`, the
//! message parameters under `p`, and a room id under `r` (`-1` when not
//! room-scoped). An [`ExtensionHub`] groups the message definitions and
//! handlers of one feature area; a connection can carry several hubs, and
//! every inbound extension message is offered to each of them.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::core::codec::Frame;
use crate::core::payload::Payload;
use crate::error::{ProtocolError, Result};
use crate::protocol::channel::FrameSender;
use crate::protocol::packet::{PacketData, EXTENSION_CHANNEL_ID};

/// Packet id shared by all extension messages in both directions.
pub const EXTENSION_MESSAGE_PACKET_ID: i32 = 13;

/// Payload key of the command string.
pub const COMMAND_KEY: &str = "c";

/// Payload key of the nested parameter object.
pub const PARAMS_KEY: &str = "p";

/// Payload key of the room scope id.
pub const ROOM_KEY: &str = "r";

/// Room id used for messages that are not room-scoped.
pub const NO_ROOM: i32 = -1;

/// A typed extension message definition and instance in one.
///
/// Mirrors [`crate::protocol::packet::SfsPacket`], but keyed by command
/// string instead of numeric id, and parsing/building only the parameter
/// object rather than the whole payload.
pub trait ExtensionMessage: Any + Send + Sync {
    /// Command string this definition claims.
    fn command(&self) -> &'static str;

    /// Refines command-based matching.
    fn matches(&self, params: &Payload) -> bool {
        let _ = params;
        true
    }

    /// Fills this instance from inbound parameters.
    fn parse(&mut self, params: &Payload) -> Result<()>;

    /// Writes this instance into outbound parameters.
    fn build(&self, params: &mut Payload) -> Result<()>;

    /// Stamps out a fresh instance for parsing.
    fn create(&self) -> Box<dyn ExtensionMessage>;
}

impl dyn ExtensionMessage {
    pub fn is<T: ExtensionMessage>(&self) -> bool {
        (self as &dyn Any).is::<T>()
    }

    pub fn downcast_ref<T: ExtensionMessage>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }

    pub fn downcast<T: ExtensionMessage>(self: Box<Self>) -> Option<Box<T>> {
        (self as Box<dyn Any>).downcast::<T>().ok()
    }
}

/// Typed handler for extension messages of type `M`.
pub trait MessageHandler<M: ExtensionMessage>: Send + Sync + 'static {
    fn can_handle(&self, _message: &M) -> bool {
        true
    }

    /// Handles the message. `Ok(true)` marks it handled within this hub.
    fn handle(&self, message: &M, hub: &ExtensionHub) -> Result<bool>;
}

impl<M, F> MessageHandler<M> for F
where
    M: ExtensionMessage,
    F: Fn(&M, &ExtensionHub) -> Result<bool> + Send + Sync + 'static,
{
    fn handle(&self, message: &M, hub: &ExtensionHub) -> Result<bool> {
        self(message, hub)
    }
}

type ErasedHandler =
    Box<dyn Fn(&dyn ExtensionMessage, &ExtensionHub) -> Result<Option<bool>> + Send + Sync>;

/// Collects message definitions and handlers during hub construction.
#[derive(Default)]
pub struct ExtensionRegistry {
    definitions: Vec<Box<dyn ExtensionMessage>>,
    handlers: Vec<ErasedHandler>,
}

impl ExtensionRegistry {
    pub fn define(&mut self, prototype: impl ExtensionMessage) -> &mut Self {
        self.definitions.push(Box::new(prototype));
        self
    }

    pub fn handle<M: ExtensionMessage>(&mut self, handler: impl MessageHandler<M>) -> &mut Self {
        self.handlers.push(Box::new(move |message, hub| {
            match message.downcast_ref::<M>() {
                Some(typed) if handler.can_handle(typed) => handler.handle(typed, hub).map(Some),
                _ => Ok(None),
            }
        }));
        self
    }
}

/// Describes one extension hub type, shared across connections.
pub trait ExtensionSpec: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn configure(&self, registry: &mut ExtensionRegistry);
}

struct PendingMessage {
    token: u64,
    predicate: Box<dyn Fn(&dyn ExtensionMessage) -> bool + Send>,
    sender: oneshot::Sender<Box<dyn ExtensionMessage>>,
}

/// One feature area's extension messages, bound to one connection.
pub struct ExtensionHub {
    name: &'static str,
    definitions: Vec<Box<dyn ExtensionMessage>>,
    handlers: Vec<ErasedHandler>,
    pending: Mutex<Vec<PendingMessage>>,
    next_token: AtomicU64,
    sender: OnceLock<FrameSender>,
}

impl ExtensionHub {
    pub fn from_spec(spec: &dyn ExtensionSpec) -> Arc<Self> {
        let mut registry = ExtensionRegistry::default();
        spec.configure(&mut registry);
        Arc::new(Self {
            name: spec.name(),
            definitions: registry.definitions,
            handlers: registry.handlers,
            pending: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            sender: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Binds this hub to a connection's outbound queue. Returns `None`
    /// if already bound.
    pub fn bind(&self, sender: FrameSender) -> Option<()> {
        let mut accepted = false;
        let _ = self.sender.get_or_init(|| {
            accepted = true;
            sender
        });
        accepted.then_some(())
    }

    /// Sends a message without room scope.
    pub fn send(&self, message: &dyn ExtensionMessage) -> Result<()> {
        self.send_to_room(message, NO_ROOM)
    }

    /// Sends a message scoped to `room_id`.
    pub fn send_to_room(&self, message: &dyn ExtensionMessage, room_id: i32) -> Result<()> {
        let sender = self.sender.get().ok_or(ProtocolError::ChannelUnbound)?;
        let mut params = Payload::new();
        message.build(&mut params)?;

        let mut data = PacketData::new(EXTENSION_CHANNEL_ID, EXTENSION_MESSAGE_PACKET_ID);
        data.payload
            .set_string(COMMAND_KEY, message.command())
            .set_int(ROOM_KEY, room_id);
        data.payload.set_payload(PARAMS_KEY, params);

        let body = data.encode_frame_body()?;
        sender
            .send(Frame::Data(body))
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Sends `message` and waits for the first inbound message of type `T`,
    /// or `None` on timeout.
    pub async fn send_and_wait<T: ExtensionMessage>(
        &self,
        message: &dyn ExtensionMessage,
        timeout: Duration,
    ) -> Result<Option<Box<T>>> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.lock_pending().push(PendingMessage {
            token,
            predicate: Box::new(|candidate| candidate.is::<T>()),
            sender: tx,
        });

        if let Err(e) = self.send(message) {
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

    fn lock_pending(&self) -> MutexGuard<'_, Vec<PendingMessage>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn remove_pending(&self, token: u64) {
        self.lock_pending().retain(|entry| entry.token != token);
    }

    /// Offers one inbound extension message to this hub. Returns whether
    /// a definition matched and a correlation or handler consumed it.
    pub fn dispatch(&self, command: &str, params: &Payload) -> Result<bool> {
        let Some(definition) = self
            .definitions
            .iter()
            .find(|d| d.command() == command && d.matches(params))
        else {
            return Ok(false);
        };

        let mut message = definition.create();
        message.parse(params)?;

        let claimed = {
            let mut pending = self.lock_pending();
            pending
                .iter()
                .position(|entry| (entry.predicate)(message.as_ref()))
                .map(|pos| pending.remove(pos))
        };
        if let Some(entry) = claimed {
            if entry.sender.send(message).is_err() {
                debug!(hub = self.name, "Correlated extension response arrived late");
            }
            return Ok(true);
        }

        for handler in &self.handlers {
            if let Some(true) = handler(message.as_ref(), self)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
