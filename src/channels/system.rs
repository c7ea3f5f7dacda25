//! # System Channel
//!
//! Channel 0: session establishment and room traffic. Serverbound packets
//! parse client requests; clientbound packets build the updates the
//! broadcast coordinator and login/room handlers send back.
//!
//! Business handlers (login validation, room admission) belong to the
//! embedding application and are attached through
//! [`SystemChannelSpec::with`]; this module only fixes the packet schema.

use crate::core::payload::Payload;
use crate::core::value::SfsValue;
use crate::error::Result;
use crate::protocol::channel::{ChannelRegistry, ChannelSpec};
use crate::protocol::packet::{PacketData, SfsPacket, SYSTEM_CHANNEL_ID};
use crate::room::{RoomSnapshot, UserSnapshot, VariableSnapshot};

/// Packet ids on the system channel.
pub mod packet_id {
    pub const HANDSHAKE: i32 = 0;
    pub const LOGIN: i32 = 1;
    pub const LOGOUT: i32 = 2;
    pub const JOIN_ROOM: i32 = 4;
    pub const MESSAGE: i32 = 7;
    pub const SET_ROOM_VARIABLE: i32 = 11;
    pub const SET_USER_VARIABLE: i32 = 12;
    pub const GROUP_SUBSCRIBE: i32 = 15;
    pub const GROUP_UNSUBSCRIBE: i32 = 16;
    pub const USER_ENTER_ROOM: i32 = 1000;
    pub const USER_COUNT_CHANGE: i32 = 1001;
    pub const USER_EXIT_ROOM: i32 = 1002;
    pub const ROOM_ADD: i32 = 1003;
    pub const ROOM_REMOVE: i32 = 1004;
}

type ConfigureHook = Box<dyn Fn(&mut ChannelRegistry) + Send + Sync>;

/// Spec for channel 0. Registers the full packet schema; the embedding
/// application attaches its handlers with [`SystemChannelSpec::with`].
#[derive(Default)]
pub struct SystemChannelSpec {
    hooks: Vec<ConfigureHook>,
}

impl SystemChannelSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends additional registrations, typically handlers for the
    /// serverbound definitions below.
    pub fn with(mut self, hook: impl Fn(&mut ChannelRegistry) + Send + Sync + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }
}

impl ChannelSpec for SystemChannelSpec {
    fn channel_id(&self) -> i32 {
        SYSTEM_CHANNEL_ID
    }

    fn name(&self) -> &'static str {
        "system"
    }

    fn configure(&self, registry: &mut ChannelRegistry) {
        registry
            .define(ServerboundHandshake::default())
            .define(ServerboundLogin::default())
            .define(ServerboundLogout)
            .define(ServerboundJoinRoom::default())
            .define(ServerboundMessage::default())
            .define(ServerboundSetRoomVariable::default())
            .define(ServerboundSetUserVariable::default())
            .define(ServerboundGroupSubscribe::default())
            .define(ServerboundGroupUnsubscribe::default());
        for hook in &self.hooks {
            hook(registry);
        }
    }
}

fn parse_variable_list(values: &[SfsValue]) -> Result<Vec<VariableSnapshot>> {
    values.iter().map(VariableSnapshot::from_wire).collect()
}

/// The hello sent by a client before steady-state framing starts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerboundHandshake {
    pub api_version: String,
    pub client_type: String,
}

impl SfsPacket for ServerboundHandshake {
    fn packet_id(&self) -> i32 {
        packet_id::HANDSHAKE
    }

    fn synchronized(&self) -> bool {
        true
    }

    fn matches(&self, data: &PacketData) -> bool {
        data.payload.has("api")
    }

    fn parse(&mut self, data: &PacketData) -> Result<()> {
        self.api_version = data.payload.get_string("api")?.to_owned();
        self.client_type = data.payload.get_string("cl")?.to_owned();
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload
            .set_string("api", self.api_version.clone())
            .set_string("cl", self.client_type.clone());
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ServerboundHandshake>::default()
    }
}

/// Handshake acknowledgement carrying the session token and negotiated
/// limits.
#[derive(Debug, Clone, Default)]
pub struct ClientboundHandshakeAck {
    pub session_token: String,
    pub compression_threshold: i32,
    pub max_message_size: i32,
}

impl SfsPacket for ClientboundHandshakeAck {
    fn packet_id(&self) -> i32 {
        packet_id::HANDSHAKE
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload
            .set_string("tk", self.session_token.clone())
            .set_int("ct", self.compression_threshold)
            .set_int("ms", self.max_message_size);
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundHandshakeAck>::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerboundLogin {
    pub user_name: String,
    pub password: String,
    pub zone: String,
}

impl SfsPacket for ServerboundLogin {
    fn packet_id(&self) -> i32 {
        packet_id::LOGIN
    }

    fn synchronized(&self) -> bool {
        true
    }

    fn parse(&mut self, data: &PacketData) -> Result<()> {
        self.user_name = data.payload.get_string("un")?.to_owned();
        self.password = data.payload.get_string("pw")?.to_owned();
        self.zone = data.payload.get_string("zn")?.to_owned();
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload
            .set_string("un", self.user_name.clone())
            .set_string("pw", self.password.clone())
            .set_string("zn", self.zone.clone());
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ServerboundLogin>::default()
    }
}

/// Login acknowledgement. Error responses reuse the same packet id with
/// an `ec` code set on the payload.
#[derive(Debug, Clone, Default)]
pub struct ClientboundLoginResponse {
    pub numeric_id: i32,
    pub user_name: String,
    pub zone: String,
}

impl SfsPacket for ClientboundLoginResponse {
    fn packet_id(&self) -> i32 {
        packet_id::LOGIN
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload
            .set_int("id", self.numeric_id)
            .set_string("un", self.user_name.clone())
            .set_string("zn", self.zone.clone());
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundLoginResponse>::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerboundLogout;

impl SfsPacket for ServerboundLogout {
    fn packet_id(&self) -> i32 {
        packet_id::LOGOUT
    }

    fn synchronized(&self) -> bool {
        true
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, _data: &mut PacketData) -> Result<()> {
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::new(ServerboundLogout)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerboundJoinRoom {
    pub room_id: i32,
    pub password: Option<String>,
}

impl SfsPacket for ServerboundJoinRoom {
    fn packet_id(&self) -> i32 {
        packet_id::JOIN_ROOM
    }

    fn synchronized(&self) -> bool {
        true
    }

    fn parse(&mut self, data: &PacketData) -> Result<()> {
        self.room_id = data.payload.get_int("r")?;
        self.password = if data.payload.has("pw") {
            Some(data.payload.get_string("pw")?.to_owned())
        } else {
            None
        };
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_int("r", self.room_id);
        if let Some(pw) = &self.password {
            data.payload.set_string("pw", pw.clone());
        }
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ServerboundJoinRoom>::default()
    }
}

/// Join confirmation unicast to the joining client: the room's wire form
/// plus its current user list.
#[derive(Debug, Clone, Default)]
pub struct ClientboundJoinRoom {
    pub room: RoomSnapshot,
    pub users: Vec<UserSnapshot>,
}

impl SfsPacket for ClientboundJoinRoom {
    fn packet_id(&self) -> i32 {
        packet_id::JOIN_ROOM
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_object_array("r", match self.room.to_object_array() {
            SfsValue::ObjectArray(fields) => fields,
            other => vec![other],
        });
        data.payload.set_object_array(
            "ul",
            self.users.iter().map(UserSnapshot::to_object_array).collect(),
        );
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundJoinRoom>::default()
    }
}

/// Public or room-scoped chat message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerboundMessage {
    pub kind: i8,
    pub room_id: i32,
    pub message: String,
}

impl SfsPacket for ServerboundMessage {
    fn packet_id(&self) -> i32 {
        packet_id::MESSAGE
    }

    fn parse(&mut self, data: &PacketData) -> Result<()> {
        self.kind = data.payload.get_byte("t")?;
        self.room_id = data.payload.get_int("r")?;
        self.message = data.payload.get_string("m")?.to_owned();
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload
            .set_byte("t", self.kind)
            .set_int("r", self.room_id)
            .set_string("m", self.message.clone());
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ServerboundMessage>::default()
    }
}

/// Chat message relayed to receivers. Public messages (`kind` 0) address
/// a room; the other kinds identify the sender by snapshot instead.
#[derive(Debug, Clone, Default)]
pub struct ClientboundMessage {
    pub kind: i8,
    pub room_id: i32,
    pub sender_numeric_id: i32,
    /// Sender snapshot sent with non-public kinds, when known.
    pub sender: Option<UserSnapshot>,
    pub message: String,
    /// Free-form parameters forwarded alongside the message text.
    pub parameters: Option<Payload>,
}

impl SfsPacket for ClientboundMessage {
    fn packet_id(&self) -> i32 {
        packet_id::MESSAGE
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_byte("t", self.kind);
        if self.kind == 0 {
            data.payload.set_int("r", self.room_id);
            data.payload.set_int("u", self.sender_numeric_id);
        } else {
            data.payload.set_int("u", self.sender_numeric_id);
            if let Some(sender) = &self.sender {
                data.payload.set_object_array("sd", match sender.to_object_array() {
                    SfsValue::ObjectArray(fields) => fields,
                    other => vec![other],
                });
            }
        }
        data.payload.set_string("m", self.message.clone());
        if let Some(params) = &self.parameters {
            data.payload.set_payload("p", params.clone());
        }
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundMessage>::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerboundSetRoomVariable {
    pub room_id: i32,
    pub variables: Vec<VariableSnapshot>,
}

impl SfsPacket for ServerboundSetRoomVariable {
    fn packet_id(&self) -> i32 {
        packet_id::SET_ROOM_VARIABLE
    }

    fn parse(&mut self, data: &PacketData) -> Result<()> {
        self.room_id = data.payload.get_int("r")?;
        self.variables = parse_variable_list(data.payload.get_object_array("vl")?)?;
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_int("r", self.room_id);
        data.payload.set_object_array(
            "vl",
            self.variables.iter().map(VariableSnapshot::to_object_array).collect(),
        );
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ServerboundSetRoomVariable>::default()
    }
}

/// Room-variable update broadcast by the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ClientboundSetRoomVariable {
    pub room_id: i32,
    pub variables: Vec<VariableSnapshot>,
}

impl SfsPacket for ClientboundSetRoomVariable {
    fn packet_id(&self) -> i32 {
        packet_id::SET_ROOM_VARIABLE
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_int("r", self.room_id);
        data.payload.set_object_array(
            "vl",
            self.variables.iter().map(VariableSnapshot::to_object_array).collect(),
        );
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundSetRoomVariable>::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerboundSetUserVariable {
    pub variables: Vec<VariableSnapshot>,
}

impl SfsPacket for ServerboundSetUserVariable {
    fn packet_id(&self) -> i32 {
        packet_id::SET_USER_VARIABLE
    }

    fn parse(&mut self, data: &PacketData) -> Result<()> {
        self.variables = parse_variable_list(data.payload.get_object_array("vl")?)?;
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_object_array(
            "vl",
            self.variables.iter().map(VariableSnapshot::to_object_array).collect(),
        );
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ServerboundSetUserVariable>::default()
    }
}

/// User-variable update broadcast to everyone sharing a room with the
/// owner.
#[derive(Debug, Clone, Default)]
pub struct ClientboundSetUserVariable {
    pub user_numeric_id: i32,
    pub variables: Vec<VariableSnapshot>,
}

impl SfsPacket for ClientboundSetUserVariable {
    fn packet_id(&self) -> i32 {
        packet_id::SET_USER_VARIABLE
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_int("u", self.user_numeric_id);
        data.payload.set_object_array(
            "vl",
            self.variables.iter().map(VariableSnapshot::to_object_array).collect(),
        );
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundSetUserVariable>::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerboundGroupSubscribe {
    pub group: String,
}

impl SfsPacket for ServerboundGroupSubscribe {
    fn packet_id(&self) -> i32 {
        packet_id::GROUP_SUBSCRIBE
    }

    fn synchronized(&self) -> bool {
        true
    }

    fn parse(&mut self, data: &PacketData) -> Result<()> {
        self.group = data.payload.get_string("g")?.to_owned();
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_string("g", self.group.clone());
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ServerboundGroupSubscribe>::default()
    }
}

/// Subscription confirmation carrying the group's current room list.
#[derive(Debug, Clone, Default)]
pub struct ClientboundGroupSubscribe {
    pub group: String,
    pub rooms: Vec<RoomSnapshot>,
}

impl SfsPacket for ClientboundGroupSubscribe {
    fn packet_id(&self) -> i32 {
        packet_id::GROUP_SUBSCRIBE
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_string("g", self.group.clone());
        data.payload.set_object_array(
            "rl",
            self.rooms.iter().map(RoomSnapshot::to_object_array).collect(),
        );
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundGroupSubscribe>::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerboundGroupUnsubscribe {
    pub group: String,
}

impl SfsPacket for ServerboundGroupUnsubscribe {
    fn packet_id(&self) -> i32 {
        packet_id::GROUP_UNSUBSCRIBE
    }

    fn synchronized(&self) -> bool {
        true
    }

    fn parse(&mut self, data: &PacketData) -> Result<()> {
        self.group = data.payload.get_string("g")?.to_owned();
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_string("g", self.group.clone());
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ServerboundGroupUnsubscribe>::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientboundGroupUnsubscribe {
    pub group: String,
}

impl SfsPacket for ClientboundGroupUnsubscribe {
    fn packet_id(&self) -> i32 {
        packet_id::GROUP_UNSUBSCRIBE
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_string("g", self.group.clone());
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundGroupUnsubscribe>::default()
    }
}

/// Another user entered a room the receiver observes.
#[derive(Debug, Clone, Default)]
pub struct ClientboundUserEnterRoom {
    pub room_id: i32,
    pub user: UserSnapshot,
}

impl SfsPacket for ClientboundUserEnterRoom {
    fn packet_id(&self) -> i32 {
        packet_id::USER_ENTER_ROOM
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_int("r", self.room_id);
        data.payload.set_object_array("u", match self.user.to_object_array() {
            SfsValue::ObjectArray(fields) => fields,
            other => vec![other],
        });
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundUserEnterRoom>::default()
    }
}

/// Updated occupancy of a room the receiver observes.
#[derive(Debug, Clone, Default)]
pub struct ClientboundUserCountChange {
    pub room_id: i32,
    pub user_count: i16,
    /// Present only for game rooms.
    pub spectator_count: Option<i16>,
}

impl SfsPacket for ClientboundUserCountChange {
    fn packet_id(&self) -> i32 {
        packet_id::USER_COUNT_CHANGE
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_int("r", self.room_id);
        data.payload.set_short("uc", self.user_count);
        if let Some(sc) = self.spectator_count {
            data.payload.set_short("sc", sc);
        }
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundUserCountChange>::default()
    }
}

/// Another user left a room the receiver observes.
#[derive(Debug, Clone, Default)]
pub struct ClientboundUserExitRoom {
    pub room_id: i32,
    pub user_numeric_id: i32,
}

impl SfsPacket for ClientboundUserExitRoom {
    fn packet_id(&self) -> i32 {
        packet_id::USER_EXIT_ROOM
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_int("r", self.room_id);
        data.payload.set_int("u", self.user_numeric_id);
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundUserExitRoom>::default()
    }
}

/// Zone-wide room discovery notice.
#[derive(Debug, Clone, Default)]
pub struct ClientboundRoomAdd {
    pub room: RoomSnapshot,
}

impl SfsPacket for ClientboundRoomAdd {
    fn packet_id(&self) -> i32 {
        packet_id::ROOM_ADD
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_object_array("r", match self.room.to_object_array() {
            SfsValue::ObjectArray(fields) => fields,
            other => vec![other],
        });
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundRoomAdd>::default()
    }
}

/// Zone-wide room removal notice.
#[derive(Debug, Clone, Default)]
pub struct ClientboundRoomRemove {
    pub room_id: i32,
}

impl SfsPacket for ClientboundRoomRemove {
    fn packet_id(&self) -> i32 {
        packet_id::ROOM_REMOVE
    }

    fn parse(&mut self, _data: &PacketData) -> Result<()> {
        Ok(())
    }

    fn build(&self, data: &mut PacketData) -> Result<()> {
        data.payload.set_int("r", self.room_id);
        Ok(())
    }

    fn create(&self) -> Box<dyn SfsPacket> {
        Box::<ClientboundRoomRemove>::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::PacketData;

    fn round_trip<P: SfsPacket + Default + PartialEq + std::fmt::Debug>(packet: &P) -> P {
        let mut data = PacketData::new(SYSTEM_CHANNEL_ID, packet.packet_id());
        packet.build(&mut data).unwrap();
        let mut parsed = P::default();
        parsed.parse(&data).unwrap();
        parsed
    }

    #[test]
    fn login_round_trip() {
        let login = ServerboundLogin {
            user_name: "bob".into(),
            password: "secret".into(),
            zone: "edge".into(),
        };
        assert_eq!(round_trip(&login), login);
    }

    #[test]
    fn join_room_password_is_optional() {
        let without = ServerboundJoinRoom {
            room_id: 5,
            password: None,
        };
        assert_eq!(round_trip(&without), without);

        let with = ServerboundJoinRoom {
            room_id: 5,
            password: Some("pw".into()),
        };
        assert_eq!(round_trip(&with), with);
    }

    #[test]
    fn set_room_variable_round_trip() {
        let packet = ServerboundSetRoomVariable {
            room_id: 3,
            variables: vec![VariableSnapshot::new("topic", SfsValue::String("hi".into()))],
        };
        assert_eq!(round_trip(&packet), packet);
    }

    #[test]
    fn handshake_matches_only_hello_payloads() {
        let proto = ServerboundHandshake::default();
        let mut hello = PacketData::new(SYSTEM_CHANNEL_ID, packet_id::HANDSHAKE);
        hello.payload.set_string("api", "1.2.0").set_string("cl", "unity");
        assert!(proto.matches(&hello));

        let other = PacketData::new(SYSTEM_CHANNEL_ID, packet_id::HANDSHAKE);
        assert!(!proto.matches(&other));
    }

    #[test]
    fn user_enter_room_prototype_stamps_fresh_instances() {
        let packet = ClientboundUserEnterRoom {
            room_id: 3,
            user: UserSnapshot {
                player_id: "bob".into(),
                numeric_id: 7,
                ..Default::default()
            },
        };
        let mut data = PacketData::new(SYSTEM_CHANNEL_ID, packet.packet_id());
        packet.build(&mut data).unwrap();
        assert_eq!(data.payload.get_int("r").unwrap(), 3);
        assert!(data.payload.has("u"));

        let proto = packet.create();
        assert_eq!(proto.packet_id(), packet_id::USER_ENTER_ROOM);
    }

    #[test]
    fn public_message_addresses_room() {
        let packet = ClientboundMessage {
            kind: 0,
            room_id: 4,
            sender_numeric_id: 7,
            sender: None,
            message: "hello".into(),
            parameters: None,
        };
        let mut data = PacketData::new(SYSTEM_CHANNEL_ID, packet.packet_id());
        packet.build(&mut data).unwrap();
        assert_eq!(data.payload.get_byte("t").unwrap(), 0);
        assert_eq!(data.payload.get_int("r").unwrap(), 4);
        assert_eq!(data.payload.get_int("u").unwrap(), 7);
        assert_eq!(data.payload.get_string("m").unwrap(), "hello");
        assert!(!data.payload.has("sd"));
        assert!(!data.payload.has("p"));
    }

    #[test]
    fn private_message_carries_sender_snapshot_and_params() {
        let mut params = Payload::default();
        params.set_int("ticket", 12);
        let packet = ClientboundMessage {
            kind: 1,
            room_id: 0,
            sender_numeric_id: 9,
            sender: Some(UserSnapshot {
                player_id: "alice".into(),
                numeric_id: 9,
                ..Default::default()
            }),
            message: "psst".into(),
            parameters: Some(params),
        };
        let mut data = PacketData::new(SYSTEM_CHANNEL_ID, packet.packet_id());
        packet.build(&mut data).unwrap();
        assert_eq!(data.payload.get_byte("t").unwrap(), 1);
        assert!(!data.payload.has("r"));
        assert_eq!(data.payload.get_int("u").unwrap(), 9);
        assert!(data.payload.has("sd"));
        let params = data.payload.get_payload("p").unwrap();
        assert_eq!(params.get_int("ticket").unwrap(), 12);
    }

    #[test]
    fn user_count_change_omits_spectators_for_lobbies() {
        let packet = ClientboundUserCountChange {
            room_id: 9,
            user_count: 4,
            spectator_count: None,
        };
        let mut data = PacketData::new(SYSTEM_CHANNEL_ID, packet.packet_id());
        packet.build(&mut data).unwrap();
        assert!(!data.payload.has("sc"));
        assert_eq!(data.payload.get_short("uc").unwrap(), 4);
    }
}
