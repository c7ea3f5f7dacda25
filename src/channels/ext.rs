//! # Extension Channel
//!
//! Channel 1: unwraps the extension-message envelope (packet id 13) and
//! offers the command plus parameter object to every hub bound to the
//! connection. A message no hub consumes is reported back to the channel
//! as unhandled.

use tracing::warn;

use crate::core::payload::Payload;
use crate::error::Result;
use crate::protocol::channel::{Channel, ChannelRegistry, ChannelSpec};
use crate::protocol::extension::{COMMAND_KEY, NO_ROOM, PARAMS_KEY, ROOM_KEY};
use crate::protocol::packet::{PacketData, SfsPacket, EXTENSION_CHANNEL_ID};

/// The raw extension envelope as received from a client.
#[derive(Debug, Clone, Default)]
pub struct ServerboundExtensionMessage {
    pub command: String,
    pub room_id: i32,
    pub params: Payload,
}

impl SfsPacket for ServerboundExtensionMessage {
    fn packet_id(&self) -> i32 {
        crate::protocol::extension::EXTENSION_MESSAGE_PACKET_ID
    }

    fn parse(&mut self, data: &PacketData) -> Result<()> {
        self.command = data.payload.get_string(COMMAND_KEY)?.to_owned();
        self.room_id = if data.payload.has(ROOM_KEY) {
            data.payload.get_int(ROOM_KEY)?
        } else {
            NO_ROOM
        };
        self.params = data.payload.get_payload(PARAMS_KEY)?;
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload
            .set_string(COMMAND_KEY, self.command.clone())
            .set_int(ROOM_KEY, self.room_id);
        data.payload.set_payload(PARAMS_KEY, self.params.clone());
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ServerboundExtensionMessage>::default()
    }
}

/// Spec for channel 1.
#[derive(Default)]
pub struct ExtensionChannelSpec;

impl ExtensionChannelSpec {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelSpec for ExtensionChannelSpec {
    fn channel_id(&self) -> i32 {
        EXTENSION_CHANNEL_ID
    }

    fn name(&self) -> &'static str {
        "extension"
    }

    fn configure(&self, registry: &mut ChannelRegistry) {
        registry
            .define(ServerboundExtensionMessage::default())
            .handle::<ServerboundExtensionMessage>(
                |message: &ServerboundExtensionMessage, channel: &Channel| {
                    let context = channel.context()?;
                    let mut handled = false;
                    for hub in &context.extensions {
                        match hub.dispatch(&message.command, &message.params) {
                            Ok(consumed) => handled |= consumed,
                            Err(e) => warn!(
                                hub = hub.name(),
                                command = %message.command,
                                error = %e,
                                "Extension hub failed to process message"
                            ),
                        }
                    }
                    Ok(handled)
                },
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::protocol::channel::ChannelContext;
    use crate::protocol::extension::{
        ExtensionHub, ExtensionMessage, ExtensionRegistry, ExtensionSpec,
        EXTENSION_MESSAGE_PACKET_ID,
    };
    use crate::server::connection::SessionMemory;

    #[derive(Default)]
    struct Ping2 {
        nonce: i32,
    }

    impl ExtensionMessage for Ping2 {
        fn command(&self) -> &'static str {
            "ping2"
        }

        fn parse(&mut self, params: &Payload) -> Result<()> {
            self.nonce = params.get_int("n")?;
            Ok(())
        }

        fn build(&self, params: &mut Payload) -> Result<()> {
            params.set_int("n", self.nonce);
            Ok(())
        }

        fn create(&self) -> Box<dyn ExtensionMessage> {
            Box::<Ping2>::default()
        }
    }

    struct PingSpec {
        nonces: Arc<AtomicI32>,
    }

    impl ExtensionSpec for PingSpec {
        fn name(&self) -> &'static str {
            "ping"
        }

        fn configure(&self, registry: &mut ExtensionRegistry) {
            let nonces = Arc::clone(&self.nonces);
            registry
                .define(Ping2::default())
                .handle::<Ping2>(move |m: &Ping2, _: &ExtensionHub| {
                    nonces.store(m.nonce, Ordering::SeqCst);
                    Ok(true)
                });
        }
    }

    #[tokio::test]
    async fn envelope_reaches_registered_hub() {
        let nonces = Arc::new(AtomicI32::new(0));
        let hub = ExtensionHub::from_spec(&PingSpec {
            nonces: Arc::clone(&nonces),
        });

        let channel = Channel::from_spec(&ExtensionChannelSpec::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        channel.bind(
            tx,
            ChannelContext {
                remote: "test:0".into(),
                memory: Arc::new(SessionMemory::new()),
                extensions: vec![hub],
                response_timeout: std::time::Duration::from_millis(250),
            },
        );

        let mut data = PacketData::new(EXTENSION_CHANNEL_ID, EXTENSION_MESSAGE_PACKET_ID);
        data.payload
            .set_string(COMMAND_KEY, "ping2")
            .set_int(ROOM_KEY, NO_ROOM);
        let mut params = Payload::new();
        params.set_int("n", 314);
        data.payload.set_payload(PARAMS_KEY, params);

        channel.dispatch(data);
        // The envelope definition is asynchronous; let the spawned task run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(nonces.load(Ordering::SeqCst), 314);
    }
}
