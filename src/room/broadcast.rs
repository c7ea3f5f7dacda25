//! # Room Broadcast Coordinator
//!
//! Turns domain events from the external room model into wire packets
//! delivered to the connections that should observe them.
//!
//! Fan-out is a linear scan of the live-connection set per event, with no
//! batching or coalescing. Sends are fire-and-forget: a failed send is
//! logged and the scan continues, because one dead client must not starve
//! the rest of an update. The coordinator runs on whatever task raises the
//! event and never blocks on network I/O (queueing a frame is all it does).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::channels::system::{
    ClientboundGroupSubscribe, ClientboundGroupUnsubscribe, ClientboundJoinRoom,
    ClientboundRoomAdd, ClientboundRoomRemove, ClientboundSetRoomVariable,
    ClientboundSetUserVariable, ClientboundUserCountChange, ClientboundUserEnterRoom,
    ClientboundUserExitRoom,
};
use crate::protocol::packet::SfsPacket;
use crate::room::{RoomEvent, RoomSnapshot, ZoneView};
use crate::server::connection::Connection;

/// The server's live-connection set, shared with the coordinator.
/// Mutated only on accept/disconnect; read here under the coarse lock.
pub type ConnectionMap = Arc<RwLock<HashMap<i32, Arc<Connection>>>>;

/// Converts [`RoomEvent`]s into packets fanned out to the right subset of
/// connections.
pub struct BroadcastCoordinator {
    connections: ConnectionMap,
    zone: Arc<dyn ZoneView>,
}

impl BroadcastCoordinator {
    pub fn new(connections: ConnectionMap, zone: Arc<dyn ZoneView>) -> Self {
        Self { connections, zone }
    }

    /// Handles one domain event.
    pub fn dispatch(&self, event: &RoomEvent) {
        match event {
            RoomEvent::UserJoined { room, user } => {
                let packet = ClientboundUserEnterRoom {
                    room_id: room.id,
                    user: user.clone(),
                };
                for conn in self.observers(room, Some(&user.player_id)) {
                    self.send(&conn, &packet);
                }
                self.broadcast_user_count(room, &user.player_id);
            }
            RoomEvent::UserLeft { room, user } => {
                let packet = ClientboundUserExitRoom {
                    room_id: room.id,
                    user_numeric_id: user.numeric_id,
                };
                for conn in self.observers(room, Some(&user.player_id)) {
                    self.send(&conn, &packet);
                }
                self.broadcast_user_count(room, &user.player_id);
            }
            RoomEvent::RoomVariablesSet { room, variables } => {
                let visible: Vec<_> = variables.iter().filter(|v| !v.private).cloned().collect();
                if visible.is_empty() {
                    return;
                }
                let packet = ClientboundSetRoomVariable {
                    room_id: room.id,
                    variables: visible,
                };
                for conn in self.observers(room, None) {
                    self.send(&conn, &packet);
                }
            }
            RoomEvent::UserVariablesSet { user, variables } => {
                let rooms = self.zone.rooms_of(&user.player_id);
                if rooms.is_empty() {
                    return;
                }
                let packet = ClientboundSetUserVariable {
                    user_numeric_id: user.numeric_id,
                    variables: variables.clone(),
                };
                for conn in self.live() {
                    let Some(player) = conn.player() else { continue };
                    if rooms.iter().any(|r| r.contains(&player.player_id)) {
                        self.send(&conn, &packet);
                    }
                }
            }
            RoomEvent::GroupSubscribed {
                player_id,
                group,
                rooms,
            } => {
                self.unicast(
                    player_id,
                    &ClientboundGroupSubscribe {
                        group: group.clone(),
                        rooms: rooms.clone(),
                    },
                );
            }
            RoomEvent::GroupUnsubscribed { player_id, group } => {
                self.unicast(
                    player_id,
                    &ClientboundGroupUnsubscribe {
                        group: group.clone(),
                    },
                );
            }
            RoomEvent::RoomJoined { player_id, room } => {
                self.unicast(
                    player_id,
                    &ClientboundJoinRoom {
                        users: room.members().cloned().collect(),
                        room: room.clone(),
                    },
                );
            }
            RoomEvent::RoomCreated { room } => {
                let packet = ClientboundRoomAdd { room: room.clone() };
                for conn in self.live() {
                    self.send(&conn, &packet);
                }
            }
            RoomEvent::RoomRemoved { room_id } => {
                let packet = ClientboundRoomRemove { room_id: *room_id };
                for conn in self.live() {
                    self.send(&conn, &packet);
                }
            }
        }
    }

    /// Occupancy update to everyone observing the room, the source always
    /// included. After a leave the source is no longer a member, so it
    /// gets the update even without a group subscription.
    fn broadcast_user_count(&self, room: &RoomSnapshot, source: &str) {
        let packet = ClientboundUserCountChange {
            room_id: room.id,
            user_count: room.user_count(),
            spectator_count: room.is_game.then(|| room.spectator_count()),
        };
        let mut reached_source = false;
        for conn in self.observers(room, None) {
            reached_source |= conn
                .player()
                .is_some_and(|player| player.player_id == source);
            self.send(&conn, &packet);
        }
        if reached_source {
            return;
        }
        let source_conn = self.live().into_iter().find(|conn| {
            conn.player()
                .is_some_and(|player| player.player_id == source)
        });
        if let Some(conn) = source_conn {
            self.send(&conn, &packet);
        }
    }

    /// Snapshot of the live-connection set.
    fn live(&self) -> Vec<Arc<Connection>> {
        let map = match self.connections.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.values().cloned().collect()
    }

    /// Connections observing `room`: group subscribers plus members,
    /// minus `exclude`.
    fn observers(&self, room: &RoomSnapshot, exclude: Option<&str>) -> Vec<Arc<Connection>> {
        self.live()
            .into_iter()
            .filter(|conn| {
                let Some(player) = conn.player() else {
                    return false;
                };
                if exclude == Some(player.player_id.as_str()) {
                    return false;
                }
                self.zone.is_subscribed(&player.player_id, &room.group)
                    || room.contains(&player.player_id)
            })
            .collect()
    }

    fn unicast(&self, player_id: &str, packet: &dyn SfsPacket) {
        let target = self.live().into_iter().find(|conn| {
            conn.player()
                .is_some_and(|player| player.player_id == player_id)
        });
        match target {
            Some(conn) => self.send(&conn, packet),
            None => warn!(player = player_id, "No connection for unicast target"),
        }
    }

    fn send(&self, conn: &Arc<Connection>, packet: &dyn SfsPacket) {
        let result = conn
            .system_channel()
            .and_then(|channel| channel.send(packet));
        if let Err(e) = result {
            warn!(
                peer = %conn.remote(),
                id = conn.id(),
                error = %e,
                "Broadcast send failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use tokio::sync::mpsc;

    use crate::channels::system::{packet_id, SystemChannelSpec};
    use crate::core::codec::Frame;
    use crate::core::value::SfsValue;
    use crate::protocol::channel::Channel;
    use crate::protocol::packet::PacketData;
    use crate::room::{PlayerBinding, UserSnapshot, VariableSnapshot};

    struct StaticZone {
        subscriptions: Vec<(String, String)>,
        rooms: Vec<RoomSnapshot>,
    }

    impl ZoneView for StaticZone {
        fn is_subscribed(&self, player_id: &str, group: &str) -> bool {
            self.subscriptions
                .iter()
                .any(|(p, g)| p == player_id && g == group)
        }

        fn rooms_of(&self, player_id: &str) -> Vec<RoomSnapshot> {
            self.rooms
                .iter()
                .filter(|r| r.contains(player_id))
                .cloned()
                .collect()
        }
    }

    fn user(id: &str, numeric: i32) -> UserSnapshot {
        UserSnapshot {
            player_id: id.into(),
            numeric_id: numeric,
            privilege: 0,
            player_index: -1,
            variables: Vec::new(),
        }
    }

    fn player_connection(
        id: i32,
        player: &str,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<Frame>) {
        let channel = Channel::from_spec(&SystemChannelSpec::new());
        let (conn, rx) = Connection::for_tests(id, vec![channel], Vec::new());
        conn.memory().set(PlayerBinding {
            player_id: player.into(),
            numeric_id: id,
        });
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<PacketData> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Frame::Data(body) = frame {
                out.push(PacketData::decode_frame_body(&body).unwrap());
            }
        }
        out
    }

    fn coordinator(
        conns: &[&Arc<Connection>],
        zone: StaticZone,
    ) -> BroadcastCoordinator {
        let map: HashMap<i32, Arc<Connection>> =
            conns.iter().map(|c| (c.id(), Arc::clone(c))).collect();
        BroadcastCoordinator::new(Arc::new(RwLock::new(map)), Arc::new(zone))
    }

    /// Room with players A and B; C subscribes to the group from outside.
    fn arena_with_a_b() -> RoomSnapshot {
        RoomSnapshot {
            id: 10,
            name: "arena".into(),
            group: "games".into(),
            players: vec![user("a", 1), user("b", 2)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn join_notice_reaches_member_and_subscriber_but_not_joiner() {
        let (conn_a, mut rx_a) = player_connection(1, "a");
        let (conn_b, mut rx_b) = player_connection(2, "b");
        let (conn_c, mut rx_c) = player_connection(3, "c");
        let zone = StaticZone {
            subscriptions: vec![("c".into(), "games".into())],
            rooms: Vec::new(),
        };
        let coordinator = coordinator(&[&conn_a, &conn_b, &conn_c], zone);

        let room = arena_with_a_b();
        coordinator.dispatch(&RoomEvent::UserJoined {
            user: user("a", 1),
            room,
        });

        // The joiner only gets the user-count update, not its own join notice.
        let to_a: HashSet<i32> = drain(&mut rx_a).iter().map(|d| d.packet_id).collect();
        assert_eq!(to_a, HashSet::from([packet_id::USER_COUNT_CHANGE]));

        for rx in [&mut rx_b, &mut rx_c] {
            let ids: HashSet<i32> = drain(rx).iter().map(|d| d.packet_id).collect();
            assert_eq!(
                ids,
                HashSet::from([packet_id::USER_ENTER_ROOM, packet_id::USER_COUNT_CHANGE])
            );
        }
    }

    #[tokio::test]
    async fn leave_notice_excludes_leaver() {
        let (conn_a, mut rx_a) = player_connection(1, "a");
        let (conn_b, mut rx_b) = player_connection(2, "b");
        let zone = StaticZone {
            subscriptions: vec![("a".into(), "games".into())],
            rooms: Vec::new(),
        };
        let coordinator = coordinator(&[&conn_a, &conn_b], zone);

        // Post-leave snapshot: only B remains.
        let room = RoomSnapshot {
            id: 10,
            name: "arena".into(),
            group: "games".into(),
            players: vec![user("b", 2)],
            ..Default::default()
        };
        coordinator.dispatch(&RoomEvent::UserLeft {
            room,
            user: user("a", 1),
        });

        let to_b = drain(&mut rx_b);
        assert!(to_b.iter().any(|d| d.packet_id == packet_id::USER_EXIT_ROOM));

        // A still subscribes to the group, so it sees the count update only.
        let to_a: HashSet<i32> = drain(&mut rx_a).iter().map(|d| d.packet_id).collect();
        assert_eq!(to_a, HashSet::from([packet_id::USER_COUNT_CHANGE]));
    }

    #[tokio::test]
    async fn leaver_without_subscription_still_gets_count_update() {
        let (conn_a, mut rx_a) = player_connection(1, "a");
        let (conn_b, mut rx_b) = player_connection(2, "b");
        let zone = StaticZone {
            subscriptions: Vec::new(),
            rooms: Vec::new(),
        };
        let coordinator = coordinator(&[&conn_a, &conn_b], zone);

        // Post-leave snapshot: only B remains, and A observes nothing.
        let room = RoomSnapshot {
            id: 10,
            name: "arena".into(),
            group: "games".into(),
            players: vec![user("b", 2)],
            ..Default::default()
        };
        coordinator.dispatch(&RoomEvent::UserLeft {
            room,
            user: user("a", 1),
        });

        // The leaver is the source: it gets the count update and only that.
        let to_a: Vec<i32> = drain(&mut rx_a).iter().map(|d| d.packet_id).collect();
        assert_eq!(to_a, vec![packet_id::USER_COUNT_CHANGE]);

        let to_b: HashSet<i32> = drain(&mut rx_b).iter().map(|d| d.packet_id).collect();
        assert_eq!(
            to_b,
            HashSet::from([packet_id::USER_EXIT_ROOM, packet_id::USER_COUNT_CHANGE])
        );
    }

    #[tokio::test]
    async fn room_variable_update_includes_source_and_subscribers() {
        let (conn_a, mut rx_a) = player_connection(1, "a");
        let (conn_b, mut rx_b) = player_connection(2, "b");
        let (conn_c, mut rx_c) = player_connection(3, "c");
        let zone = StaticZone {
            subscriptions: vec![("c".into(), "games".into())],
            rooms: Vec::new(),
        };
        let coordinator = coordinator(&[&conn_a, &conn_b, &conn_c], zone);

        coordinator.dispatch(&RoomEvent::RoomVariablesSet {
            room: arena_with_a_b(),
            variables: vec![VariableSnapshot::new("topic", SfsValue::String("gg".into()))],
        });

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            let got = drain(rx);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].packet_id, packet_id::SET_ROOM_VARIABLE);
        }
    }

    #[tokio::test]
    async fn private_room_variable_is_never_broadcast() {
        let (conn_a, mut rx_a) = player_connection(1, "a");
        let (conn_b, mut rx_b) = player_connection(2, "b");
        let zone = StaticZone {
            subscriptions: Vec::new(),
            rooms: Vec::new(),
        };
        let coordinator = coordinator(&[&conn_a, &conn_b], zone);

        coordinator.dispatch(&RoomEvent::RoomVariablesSet {
            room: arena_with_a_b(),
            variables: vec![VariableSnapshot::private("seed", SfsValue::Int(9))],
        });

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn user_variables_reach_room_mates_only() {
        let (conn_a, mut rx_a) = player_connection(1, "a");
        let (conn_b, mut rx_b) = player_connection(2, "b");
        let (conn_c, mut rx_c) = player_connection(3, "c");
        let zone = StaticZone {
            subscriptions: Vec::new(),
            rooms: vec![arena_with_a_b()],
        };
        let coordinator = coordinator(&[&conn_a, &conn_b, &conn_c], zone);

        coordinator.dispatch(&RoomEvent::UserVariablesSet {
            user: user("a", 1),
            variables: vec![VariableSnapshot::new("hp", SfsValue::Int(50))],
        });

        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn group_subscribe_is_unicast() {
        let (conn_a, mut rx_a) = player_connection(1, "a");
        let (conn_b, mut rx_b) = player_connection(2, "b");
        let zone = StaticZone {
            subscriptions: Vec::new(),
            rooms: Vec::new(),
        };
        let coordinator = coordinator(&[&conn_a, &conn_b], zone);

        coordinator.dispatch(&RoomEvent::GroupSubscribed {
            player_id: "a".into(),
            group: "games".into(),
            rooms: vec![arena_with_a_b()],
        });

        let to_a = drain(&mut rx_a);
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a[0].packet_id, packet_id::GROUP_SUBSCRIBE);
        assert_eq!(to_a[0].payload.get_string("g").unwrap(), "games");
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn room_discovery_reaches_everyone() {
        let (conn_a, mut rx_a) = player_connection(1, "a");
        let (conn_b, mut rx_b) = player_connection(2, "b");
        let zone = StaticZone {
            subscriptions: Vec::new(),
            rooms: Vec::new(),
        };
        let coordinator = coordinator(&[&conn_a, &conn_b], zone);

        coordinator.dispatch(&RoomEvent::RoomCreated {
            room: arena_with_a_b(),
        });
        coordinator.dispatch(&RoomEvent::RoomRemoved { room_id: 10 });

        for rx in [&mut rx_a, &mut rx_b] {
            let ids: Vec<i32> = drain(rx).iter().map(|d| d.packet_id).collect();
            assert_eq!(ids, vec![packet_id::ROOM_ADD, packet_id::ROOM_REMOVE]);
        }
    }
}
