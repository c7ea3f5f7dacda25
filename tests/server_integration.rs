//! End-to-end tests over real TCP sockets: handshake, dispatch, extension
//! round trips, keep-alive, and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use smartfox_protocol::channels::system::{
    packet_id, ClientboundLoginResponse, ServerboundLogin, SystemChannelSpec,
};
use smartfox_protocol::config::ServerConfig;
use smartfox_protocol::core::codec::{encode_object, Frame, FrameCodec};
use smartfox_protocol::core::payload::Payload;
use smartfox_protocol::error::Result;
use smartfox_protocol::protocol::channel::Channel;
use smartfox_protocol::protocol::extension::{
    ExtensionHub, ExtensionMessage, ExtensionRegistry, ExtensionSpec,
};
use smartfox_protocol::protocol::packet::{PacketData, EXTENSION_CHANNEL_ID, SYSTEM_CHANNEL_ID};
use smartfox_protocol::room::RoomSnapshot;
use smartfox_protocol::server::server::{Server, ServerEvent};
use smartfox_protocol::ZoneView;

struct EmptyZone;

impl ZoneView for EmptyZone {
    fn is_subscribed(&self, _player_id: &str, _group: &str) -> bool {
        false
    }

    fn rooms_of(&self, _player_id: &str) -> Vec<RoomSnapshot> {
        Vec::new()
    }
}

async fn start(server: Server) -> (Arc<Server>, SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(server);
    let serving = Arc::clone(&server);
    let task = tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });
    (server, addr, task)
}

struct TestClient {
    framed: Framed<TcpStream, FrameCodec>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(stream, FrameCodec::default()),
        }
    }

    /// Sends the legacy hello and returns the acknowledgement packet.
    async fn handshake(&mut self) -> PacketData {
        let mut hello = PacketData::new(SYSTEM_CHANNEL_ID, packet_id::HANDSHAKE);
        hello
            .payload
            .set_string("api", "1.7.8")
            .set_string("cl", "TestHarness");
        let body = encode_object(&hello.to_legacy_object()).unwrap();
        self.framed.send(Frame::Data(body)).await.unwrap();
        self.recv_packet().await
    }

    async fn send_packet(&mut self, data: &PacketData) {
        let body = data.encode_frame_body().unwrap();
        self.framed.send(Frame::Data(body)).await.unwrap();
    }

    async fn recv_frame(&mut self) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("framing error")
    }

    /// Next data frame as a packet, skipping keep-alive pings.
    async fn recv_packet(&mut self) -> PacketData {
        loop {
            match self.recv_frame().await {
                Frame::Ping => continue,
                Frame::Disconnect => panic!("unexpected disconnect frame"),
                Frame::Data(body) => return PacketData::decode_frame_body(&body).unwrap(),
            }
        }
    }

    /// Waits for the socket to close without a disconnect frame.
    async fn expect_closed(&mut self) {
        let next = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timed out waiting for close");
        assert!(next.is_none(), "expected the socket to close, got {next:?}");
    }
}

#[tokio::test]
async fn handshake_returns_session_ack() {
    let server = Server::new(ServerConfig::default(), Arc::new(EmptyZone));
    let (server, addr, task) = start(server).await;
    let mut events = server.subscribe();

    let mut client = TestClient::connect(addr).await;
    let ack = client.handshake().await;

    assert_eq!(ack.channel_id, SYSTEM_CHANNEL_ID);
    assert_eq!(ack.packet_id, packet_id::HANDSHAKE);
    assert!(!ack.payload.get_string("tk").unwrap().is_empty());
    assert_eq!(ack.payload.get_int("ct").unwrap(), 2048);
    assert_eq!(
        ack.payload.get_int("ms").unwrap(),
        ServerConfig::default().max_frame_size as i32
    );

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, ServerEvent::Connected(_)));

    drop(client);
    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn login_handler_round_trip() {
    let mut server = Server::new(ServerConfig::default(), Arc::new(EmptyZone));
    server.register_channel(SystemChannelSpec::new().with(|registry| {
        registry.handle(|login: &ServerboundLogin, channel: &Channel| {
            channel.send(&ClientboundLoginResponse {
                numeric_id: 42,
                user_name: login.user_name.clone(),
                zone: login.zone.clone(),
            })?;
            Ok(true)
        });
    }));
    let (server, addr, task) = start(server).await;

    let mut client = TestClient::connect(addr).await;
    client.handshake().await;

    let mut login = PacketData::new(SYSTEM_CHANNEL_ID, packet_id::LOGIN);
    login
        .payload
        .set_string("un", "alice")
        .set_string("pw", "secret")
        .set_string("zn", "arena");
    client.send_packet(&login).await;

    let response = client.recv_packet().await;
    assert_eq!(response.packet_id, packet_id::LOGIN);
    assert_eq!(response.payload.get_int("id").unwrap(), 42);
    assert_eq!(response.payload.get_string("un").unwrap(), "alice");
    assert_eq!(response.payload.get_string("zn").unwrap(), "arena");

    drop(client);
    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn malformed_hello_is_rejected_without_events() {
    let server = Server::new(ServerConfig::default(), Arc::new(EmptyZone));
    let (server, addr, task) = start(server).await;
    let mut events = server.subscribe();

    let mut client = TestClient::connect(addr).await;
    client
        .framed
        .send(Frame::Data(bytes::Bytes::from_static(&[0xDE, 0xAD, 0xBE])))
        .await
        .unwrap();

    client.expect_closed().await;
    assert!(events.try_recv().is_err());
    assert!(server.connections().is_empty());

    server.shutdown();
    task.await.unwrap();
}

#[derive(Default, Clone)]
struct EchoMessage {
    text: String,
}

impl ExtensionMessage for EchoMessage {
    fn command(&self) -> &'static str {
        "echo"
    }

    fn parse(&mut self, params: &Payload) -> Result<()> {
        self.text = params.get_string("t")?.to_owned();
        Ok(())
    }

    fn build(&self, params: &mut Payload) -> Result<()> {
        params.set_string("t", self.text.clone());
        Ok(())
    }

    fn create(&self) -> Box<dyn ExtensionMessage> {
        Box::new(Self::default())
    }
}

struct EchoExtension;

impl ExtensionSpec for EchoExtension {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn configure(&self, registry: &mut ExtensionRegistry) {
        registry.define(EchoMessage::default());
        registry.handle(|message: &EchoMessage, hub: &ExtensionHub| {
            hub.send(&EchoMessage {
                text: message.text.chars().rev().collect(),
            })?;
            Ok(true)
        });
    }
}

#[tokio::test]
async fn extension_message_round_trip() {
    let mut server = Server::new(ServerConfig::default(), Arc::new(EmptyZone));
    server.register_extension(EchoExtension);
    let (server, addr, task) = start(server).await;

    let mut client = TestClient::connect(addr).await;
    client.handshake().await;

    let mut request = PacketData::new(EXTENSION_CHANNEL_ID, 13);
    let mut params = Payload::new();
    params.set_string("t", "stressed");
    request
        .payload
        .set_string("c", "echo")
        .set_payload("p", params);
    client.send_packet(&request).await;

    let reply = client.recv_packet().await;
    assert_eq!(reply.channel_id, EXTENSION_CHANNEL_ID);
    assert_eq!(reply.packet_id, 13);
    assert_eq!(reply.payload.get_string("c").unwrap(), "echo");
    let reply_params = reply.payload.get_payload("p").unwrap();
    assert_eq!(reply_params.get_string("t").unwrap(), "desserts");

    drop(client);
    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn idle_connection_receives_keep_alive_ping() {
    let config = ServerConfig::default_with_overrides(|c| {
        c.keep_alive_interval = Duration::from_millis(200);
    });
    let server = Server::new(config, Arc::new(EmptyZone));
    let (server, addr, task) = start(server).await;

    let mut client = TestClient::connect(addr).await;
    client.handshake().await;

    // The 1s ticker fires after the ack write went idle past the interval.
    let frame = client.recv_frame().await;
    assert!(matches!(frame, Frame::Ping));

    drop(client);
    server.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn shutdown_disconnects_clients_gracefully() {
    let server = Server::new(ServerConfig::default(), Arc::new(EmptyZone));
    let (server, addr, task) = start(server).await;

    let mut client = TestClient::connect(addr).await;
    client.handshake().await;
    assert_eq!(server.connections().len(), 1);

    server.shutdown();

    loop {
        match client.recv_frame().await {
            Frame::Ping => continue,
            Frame::Disconnect => break,
            other => panic!("expected a disconnect frame, got {other:?}"),
        }
    }
    // Closing our side lets the read loop wind down before the drain
    // deadline.
    drop(client);

    tokio::time::timeout(Duration::from_secs(15), task)
        .await
        .unwrap()
        .unwrap();
    assert!(server.connections().is_empty());
}
