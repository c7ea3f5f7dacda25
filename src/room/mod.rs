//! # Room Domain Views
//!
//! Read-only snapshots of the external room/zone model, the event stream
//! it feeds into the broadcast coordinator, and the wire forms compatible
//! clients expect for rooms, users, and variables.
//!
//! The core never owns room state. The embedding domain model raises
//! [`RoomEvent`]s and answers [`ZoneView`] queries; everything here is a
//! point-in-time copy taken under the domain model's own locks.

pub mod broadcast;

use crate::core::value::SfsValue;

/// Variable value type discriminants carried in the wire form.
mod var_type {
    pub const NULL: i8 = 0;
    pub const BOOL: i8 = 1;
    pub const INT: i8 = 2;
    pub const DOUBLE: i8 = 3;
    pub const STRING: i8 = 4;
    pub const OBJECT: i8 = 5;
    pub const ARRAY: i8 = 6;
}

/// One room or user variable at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSnapshot {
    pub name: String,
    pub value: SfsValue,
    /// Private room variables are never broadcast, not even to members.
    pub private: bool,
}

impl VariableSnapshot {
    pub fn new(name: impl Into<String>, value: SfsValue) -> Self {
        Self {
            name: name.into(),
            value,
            private: false,
        }
    }

    pub fn private(name: impl Into<String>, value: SfsValue) -> Self {
        Self {
            name: name.into(),
            value,
            private: true,
        }
    }

    fn type_tag(&self) -> i8 {
        match &self.value {
            SfsValue::Null => var_type::NULL,
            SfsValue::Bool(_) => var_type::BOOL,
            SfsValue::Byte(_) | SfsValue::Short(_) | SfsValue::Int(_) | SfsValue::Long(_) => {
                var_type::INT
            }
            SfsValue::Float(_) | SfsValue::Double(_) => var_type::DOUBLE,
            SfsValue::String(_) => var_type::STRING,
            SfsValue::Object(_) => var_type::OBJECT,
            _ => var_type::ARRAY,
        }
    }

    /// Wire form: `[name, type, value]`.
    pub fn to_object_array(&self) -> SfsValue {
        SfsValue::ObjectArray(vec![
            SfsValue::String(self.name.clone()),
            SfsValue::Byte(self.type_tag()),
            self.value.clone(),
        ])
    }

    /// Parses the `[name, type, value]` wire form. The type discriminant
    /// is advisory; the value keeps its own wire tag.
    pub fn from_wire(value: &SfsValue) -> crate::error::Result<Self> {
        let SfsValue::ObjectArray(fields) = value else {
            return Err(crate::error::ProtocolError::InvalidEnvelope(
                "variable is not an object array".into(),
            ));
        };
        let [SfsValue::String(name), SfsValue::Byte(_), value] = fields.as_slice() else {
            return Err(crate::error::ProtocolError::InvalidEnvelope(
                "malformed variable triple".into(),
            ));
        };
        Ok(Self {
            name: name.clone(),
            value: value.clone(),
            private: false,
        })
    }
}

/// One user as seen inside a room.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserSnapshot {
    /// Stable string identity, shared with [`PlayerBinding`].
    pub player_id: String,
    /// Session-scoped numeric id assigned at login.
    pub numeric_id: i32,
    pub privilege: i16,
    /// Seat index inside a game room, `-1` for spectators and lobbies.
    pub player_index: i16,
    pub variables: Vec<VariableSnapshot>,
}

impl UserSnapshot {
    /// Wire form: `[id, name, privilege, playerIndex, variables]`.
    pub fn to_object_array(&self) -> SfsValue {
        SfsValue::ObjectArray(vec![
            SfsValue::Int(self.numeric_id),
            SfsValue::String(self.player_id.clone()),
            SfsValue::Short(self.privilege),
            SfsValue::Short(self.player_index),
            SfsValue::ObjectArray(self.variables.iter().map(VariableSnapshot::to_object_array).collect()),
        ])
    }
}

/// One room at a point in time, including membership.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoomSnapshot {
    pub id: i32,
    pub name: String,
    pub group: String,
    pub is_game: bool,
    pub is_hidden: bool,
    pub is_password_protected: bool,
    pub max_users: i16,
    pub max_spectators: i16,
    pub players: Vec<UserSnapshot>,
    pub spectators: Vec<UserSnapshot>,
    pub variables: Vec<VariableSnapshot>,
}

impl RoomSnapshot {
    pub fn user_count(&self) -> i16 {
        self.players.len() as i16
    }

    pub fn spectator_count(&self) -> i16 {
        self.spectators.len() as i16
    }

    /// Whether `player_id` is a player or spectator of this room.
    pub fn contains(&self, player_id: &str) -> bool {
        self.members().any(|m| m.player_id == player_id)
    }

    /// All players and spectators.
    pub fn members(&self) -> impl Iterator<Item = &UserSnapshot> {
        self.players.iter().chain(self.spectators.iter())
    }

    /// Wire form. Non-private variables only; spectator counts are
    /// appended for game rooms.
    pub fn to_object_array(&self) -> SfsValue {
        let variables = self
            .variables
            .iter()
            .filter(|v| !v.private)
            .map(VariableSnapshot::to_object_array)
            .collect();
        let mut fields = vec![
            SfsValue::Int(self.id),
            SfsValue::String(self.name.clone()),
            SfsValue::String(self.group.clone()),
            SfsValue::Bool(self.is_game),
            SfsValue::Bool(self.is_hidden),
            SfsValue::Bool(self.is_password_protected),
            SfsValue::Short(self.user_count()),
            SfsValue::Short(self.max_users),
            SfsValue::ObjectArray(variables),
        ];
        if self.is_game {
            fields.push(SfsValue::Short(self.spectator_count()));
            fields.push(SfsValue::Short(self.max_spectators));
        }
        SfsValue::ObjectArray(fields)
    }
}

/// Read-only queries the broadcast coordinator asks of the external
/// room/zone model.
pub trait ZoneView: Send + Sync {
    /// Whether `player_id` is subscribed to room group `group`.
    fn is_subscribed(&self, player_id: &str, group: &str) -> bool;

    /// Snapshots of every room `player_id` currently occupies.
    fn rooms_of(&self, player_id: &str) -> Vec<RoomSnapshot>;
}

/// Identity of the player a connection authenticated as. Stored in the
/// connection's session memory at login.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerBinding {
    pub player_id: String,
    pub numeric_id: i32,
}

/// Domain events raised by the external room model and fanned out by the
/// broadcast coordinator.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// A user entered a room.
    UserJoined {
        room: RoomSnapshot,
        user: UserSnapshot,
    },
    /// A user left a room. `room` is the post-leave snapshot.
    UserLeft {
        room: RoomSnapshot,
        user: UserSnapshot,
    },
    /// Room variables were created or updated.
    RoomVariablesSet {
        room: RoomSnapshot,
        variables: Vec<VariableSnapshot>,
    },
    /// User variables were created or updated.
    UserVariablesSet {
        user: UserSnapshot,
        variables: Vec<VariableSnapshot>,
    },
    /// The named player subscribed to a group; confirmed by unicast with
    /// the group's current room list.
    GroupSubscribed {
        player_id: String,
        group: String,
        rooms: Vec<RoomSnapshot>,
    },
    /// The named player unsubscribed from a group; confirmed by unicast.
    GroupUnsubscribed { player_id: String, group: String },
    /// The named player's own join completed; confirmed by unicast with
    /// the room's user list.
    RoomJoined {
        player_id: String,
        room: RoomSnapshot,
    },
    /// Zone-wide: a room became visible to everyone.
    RoomCreated { room: RoomSnapshot },
    /// Zone-wide: a room disappeared.
    RoomRemoved { room_id: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, numeric: i32) -> UserSnapshot {
        UserSnapshot {
            player_id: id.into(),
            numeric_id: numeric,
            privilege: 0,
            player_index: -1,
            variables: Vec::new(),
        }
    }

    #[test]
    fn contains_covers_players_and_spectators() {
        let room = RoomSnapshot {
            id: 1,
            name: "arena".into(),
            group: "games".into(),
            players: vec![user("a", 1)],
            spectators: vec![user("b", 2)],
            ..Default::default()
        };
        assert!(room.contains("a"));
        assert!(room.contains("b"));
        assert!(!room.contains("c"));
    }

    #[test]
    fn room_wire_form_skips_private_variables() {
        let room = RoomSnapshot {
            id: 1,
            name: "lobby".into(),
            group: "default".into(),
            variables: vec![
                VariableSnapshot::new("topic", SfsValue::String("welcome".into())),
                VariableSnapshot::private("seed", SfsValue::Int(99)),
            ],
            ..Default::default()
        };
        let SfsValue::ObjectArray(fields) = room.to_object_array() else {
            panic!("expected object array");
        };
        assert_eq!(fields.len(), 9);
        let SfsValue::ObjectArray(vars) = &fields[8] else {
            panic!("expected variable list");
        };
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn game_room_wire_form_appends_spectator_counts() {
        let room = RoomSnapshot {
            id: 2,
            name: "match".into(),
            group: "games".into(),
            is_game: true,
            max_spectators: 10,
            spectators: vec![user("s", 5)],
            ..Default::default()
        };
        let SfsValue::ObjectArray(fields) = room.to_object_array() else {
            panic!("expected object array");
        };
        assert_eq!(fields.len(), 11);
        assert_eq!(fields[9], SfsValue::Short(1));
        assert_eq!(fields[10], SfsValue::Short(10));
    }

    #[test]
    fn variable_wire_round_trip() {
        let var = VariableSnapshot::new("score", SfsValue::Int(120));
        let parsed = VariableSnapshot::from_wire(&var.to_object_array()).unwrap();
        assert_eq!(parsed, var);
    }

    #[test]
    fn malformed_variable_rejected() {
        assert!(VariableSnapshot::from_wire(&SfsValue::Int(1)).is_err());
        assert!(VariableSnapshot::from_wire(&SfsValue::ObjectArray(vec![SfsValue::Int(1)])).is_err());
    }

    #[test]
    fn variable_type_tags() {
        assert_eq!(VariableSnapshot::new("n", SfsValue::Null).type_tag(), 0);
        assert_eq!(VariableSnapshot::new("b", SfsValue::Bool(true)).type_tag(), 1);
        assert_eq!(VariableSnapshot::new("i", SfsValue::Long(1)).type_tag(), 2);
        assert_eq!(VariableSnapshot::new("d", SfsValue::Float(1.0)).type_tag(), 3);
        assert_eq!(
            VariableSnapshot::new("s", SfsValue::String("x".into())).type_tag(),
            4
        );
        assert_eq!(
            VariableSnapshot::new("a", SfsValue::IntArray(vec![1])).type_tag(),
            6
        );
    }
}
