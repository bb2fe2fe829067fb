//! Authoritative host role.

use super::{Board, BoardError, BoardState, KEY_BLOCK, LinkState, Origin, Replicator, Status};
use crate::config::HostConfig;
use crate::connection::{Connection, ConnectionId, PeerChannel, TransportError};
use crate::items::ItemKey;
use crate::protocol::Message;
use crate::relay::SharedRelay;
use std::collections::HashMap;

/// Applies every mutation, then broadcasts it to all joined connections
/// except the one it came from.
#[derive(Debug, Default)]
pub struct HostRole {
    /// Player name per joined connection.
    players: HashMap<ConnectionId, String>,
    /// Key ranges handed out so far. The host keeps range 0.
    key_blocks: ItemKey,
}

impl HostRole {
    /// Name of the player joined over `id`.
    pub fn player_of(&self, id: &ConnectionId) -> Option<&str> {
        self.players.get(id).map(String::as_str)
    }

    /// Connections that completed `join`.
    pub fn joined_connections(&self) -> impl Iterator<Item = &ConnectionId> {
        self.players.keys()
    }

    /// Start of the next unused key range.
    fn reserve_keys(&mut self) -> ItemKey {
        self.key_blocks += 1;
        self.key_blocks.saturating_mul(KEY_BLOCK)
    }

    /// Register a new connection. One it displaces ends its session, so a
    /// newcomer under the same id must join again.
    fn admit(&mut self, state: &mut BoardState, connection: Connection) {
        let id = connection.id().clone();
        if state.register(connection) {
            self.on_close(state, &id);
        }
    }

    fn password_matches(expected: Option<&str>, offered: Option<&str>) -> bool {
        match expected {
            None | Some("") => true,
            Some(expected) => offered == Some(expected),
        }
    }
}

impl Replicator for HostRole {
    fn role(&self) -> &'static str {
        "host"
    }

    fn accepts(&self, from: &ConnectionId) -> bool {
        self.players.contains_key(from)
    }

    fn propagate(&mut self, state: &mut BoardState, message: &Message, origin: &Origin) {
        let skip = origin.connection();
        for id in self.players.keys() {
            if Some(id) == skip {
                continue;
            }
            if let Err(e) = state.send_to(id, message) {
                log::warn!("Failed to broadcast {} to {}: {}", message.event_name(), id, e);
            }
        }
    }

    fn on_handshake(
        &mut self,
        state: &mut BoardState,
        from: &ConnectionId,
        message: Message,
    ) -> Result<(), BoardError> {
        let (password, player_name) = match message {
            Message::Join { password, player_name } => (password, player_name),
            other => {
                return Err(BoardError::Unexpected {
                    event: other.event_name(),
                    role: self.role(),
                });
            }
        };

        if !Self::password_matches(state.password.as_deref(), password.as_deref()) {
            log::warn!("Rejected join from {} ({}): wrong password", from, player_name);
            let sent = state.send_to(from, &Message::JoinResponse(None));
            state.drop_connection(from);
            return sent;
        }

        log::info!("{} joined over {}", player_name, from);
        state.add_player(&player_name);
        self.players.insert(from.clone(), player_name);
        let mut snapshot = state.join_snapshot();
        snapshot.next_key = self.reserve_keys();
        state.send_to(from, &Message::JoinResponse(Some(snapshot)))
    }

    fn on_open(&mut self, state: &mut BoardState, id: &ConnectionId) {
        log::debug!("Waiting for join from {}", id);
        state.set_status(Status::Connected);
    }

    fn on_close(&mut self, state: &mut BoardState, id: &ConnectionId) {
        let Some(name) = self.players.remove(id) else {
            return;
        };
        let still_present = name == state.player_name || self.players.values().any(|n| *n == name);
        if !still_present {
            state.remove_player(&name);
        }
        log::info!("{} left ({})", name, id);
    }

    fn on_route_open(&mut self, state: &mut BoardState, peer_id: &str) -> Result<(), BoardError> {
        let relay = state.relay.clone().ok_or(TransportError::NoRelay)?;
        let id = ConnectionId::from(peer_id);
        let mut connection = Connection::relayed(id.clone(), relay, state.id);
        connection.mark_open();
        state.set_status(Status::Connecting);
        self.admit(state, connection);
        log::info!("Relayed connection {} open", id);
        state.set_status(Status::Connected);
        Ok(())
    }
}

impl Board<HostRole> {
    /// Start hosting a board. The hosting player is on the roster from the
    /// start.
    pub fn host(config: HostConfig, relay: Option<SharedRelay>) -> Self {
        let mut state = BoardState::new(config.board_id, config.player_name, relay);
        state.name = config.name;
        state.password = config.password;
        state.settings = config.settings;
        state.player_names.insert(state.player_name.clone());
        state.link = LinkState::Connected;
        Self {
            state,
            role: HostRole::default(),
        }
    }

    /// Take an incoming direct channel. The connection counts as joined
    /// only after a valid `join`.
    pub fn accept(&mut self, id: ConnectionId, channel: Box<dyn PeerChannel>) {
        log::info!("Incoming connection {}", id);
        self.state.set_status(Status::Connecting);
        self.role.admit(&mut self.state, Connection::direct(id, channel));
    }

    /// Close a connection and drop its player.
    pub fn remove_player_connection(&mut self, id: &ConnectionId) {
        self.state.drop_connection(id);
        self.role.on_close(&mut self.state, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardEvent;
    use crate::connection::TransportEvent;
    use crate::items::NewItem;
    use crate::protocol::{self, JoinSnapshot};
    use crate::relay::{RelayNotice, RelayRequest};
    use crate::testing::{ChannelProbe, RecordingChannel, RecordingRelay, init_logging};
    use kurbo::{Point, Size};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn board_with_password(password: Option<&str>) -> Board<HostRole> {
        let mut config = HostConfig::new(9, "host");
        config.name = Some("Planning".into());
        config.password = password.map(String::from);
        Board::host(config, None)
    }

    fn connect(board: &mut Board<HostRole>, id: &str) -> ChannelProbe {
        let (channel, probe) = RecordingChannel::new();
        board.accept(id.into(), Box::new(channel));
        board.handle_transport(&id.into(), TransportEvent::Open);
        probe
    }

    fn join(board: &mut Board<HostRole>, id: &str, password: Option<&str>, name: &str) -> ChannelProbe {
        let probe = connect(board, id);
        let frame = protocol::encode(&Message::Join {
            password: password.map(String::from),
            player_name: name.into(),
        })
        .unwrap();
        board.handle_transport(&id.into(), TransportEvent::Data(frame));
        probe
    }

    fn join_reply(probe: &ChannelProbe) -> Option<JoinSnapshot> {
        let sent = probe.take_sent();
        assert_eq!(sent.len(), 1);
        match protocol::decode(&sent[0]).unwrap() {
            Message::JoinResponse(snapshot) => snapshot,
            other => panic!("expected joinResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_join_with_correct_password() {
        init_logging();
        let mut board = board_with_password(Some("s3cret"));
        board.add_item(NewItem::new("note", Point::ZERO, Size::new(10.0, 10.0))).unwrap();

        let probe = join(&mut board, "c1", Some("s3cret"), "ada");
        let snapshot = join_reply(&probe).expect("join accepted");

        assert_eq!(snapshot.name.as_deref(), Some("Planning"));
        assert!(snapshot.player_names.contains("ada"));
        assert!(snapshot.player_names.contains("host"));
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.next_key, KEY_BLOCK);
        assert_eq!(board.role().player_of(&"c1".into()), Some("ada"));
        assert!(!probe.is_closed());
    }

    #[test]
    fn test_join_with_wrong_password_closes() {
        let mut board = board_with_password(Some("s3cret"));
        let probe = join(&mut board, "c1", Some("guess"), "mallory");

        assert!(join_reply(&probe).is_none());
        assert!(probe.is_closed());
        assert!(!board.connections().contains(&"c1".into()));
        assert!(!board.player_names().contains("mallory"));
    }

    #[test]
    fn test_empty_password_admits_anyone() {
        let mut board = board_with_password(Some(""));
        let probe = join(&mut board, "c1", None, "bo");
        assert!(join_reply(&probe).is_some());
    }

    #[test]
    fn test_broadcast_excludes_originator() {
        let mut board = board_with_password(None);
        let a = join(&mut board, "c1", None, "ada");
        let b = join(&mut board, "c2", None, "bo");
        a.take_sent();
        b.take_sent();

        board.add_item(NewItem::new("note", Point::ZERO, Size::new(10.0, 10.0))).unwrap();
        assert_eq!(a.take_sent().len(), 1);
        assert_eq!(b.take_sent().len(), 1);

        board.handle_transport(
            &"c1".into(),
            TransportEvent::Data(r#"["moveItem",0,[5,null,null]]"#.into()),
        );
        assert!(a.take_sent().is_empty());
        assert_eq!(b.take_sent(), vec![r#"["moveItem",0,[5.0,null,null]]"#.to_string()]);
        assert_eq!(board.item(0).unwrap().transform.position.x, 5.0);
    }

    #[test]
    fn test_unjoined_connection_cannot_mutate_or_listen() {
        let mut board = board_with_password(Some("pw"));
        let lurker = connect(&mut board, "c1");
        board.add_item(NewItem::new("note", Point::ZERO, Size::new(10.0, 10.0))).unwrap();
        assert!(lurker.take_sent().is_empty());

        board.handle_transport(
            &"c1".into(),
            TransportEvent::Data(r#"["moveItem",0,[5,null,null]]"#.into()),
        );
        assert_eq!(board.item(0).unwrap().transform.position.x, 0.0);
    }

    #[test]
    fn test_close_removes_player() {
        let mut board = board_with_password(None);
        let left = Rc::new(RefCell::new(Vec::new()));
        let log = left.clone();
        board.on("playerLeft", move |e| {
            if let BoardEvent::PlayerLeft(name) = e {
                log.borrow_mut().push(name.clone());
            }
        });

        join(&mut board, "c1", None, "ada");
        join(&mut board, "c2", None, "bo");
        board.handle_transport(&"c1".into(), TransportEvent::Close);

        assert_eq!(*left.borrow(), vec!["ada".to_string()]);
        assert!(!board.player_names().contains("ada"));
        assert!(board.player_names().contains("bo"));
        assert!(!board.connections().contains(&"c1".into()));
    }

    #[test]
    fn test_shared_name_survives_one_close() {
        let mut board = board_with_password(None);
        join(&mut board, "c1", None, "ada");
        join(&mut board, "c2", None, "ada");

        board.remove_player_connection(&"c1".into());
        assert!(board.player_names().contains("ada"));

        board.remove_player_connection(&"c2".into());
        assert!(!board.player_names().contains("ada"));
    }

    #[test]
    fn test_each_join_gets_its_own_key_range() {
        let mut board = board_with_password(None);
        let a = join(&mut board, "c1", None, "ada");
        let b = join(&mut board, "c2", None, "bo");

        assert_eq!(join_reply(&a).unwrap().next_key, KEY_BLOCK);
        assert_eq!(join_reply(&b).unwrap().next_key, 2 * KEY_BLOCK);
        assert_eq!(board.next_key(), 0);
    }

    #[test]
    fn test_replaced_connection_must_join_again() {
        let mut board = board_with_password(Some("pw"));
        let first = join(&mut board, "c1", Some("pw"), "ada");
        assert!(join_reply(&first).is_some());

        let second = connect(&mut board, "c1");
        assert!(first.is_closed());
        assert_eq!(board.role().player_of(&"c1".into()), None);
        assert!(!board.player_names().contains("ada"));

        let key = board.add_item(NewItem::new("secret", Point::ZERO, Size::new(10.0, 10.0))).unwrap();
        assert!(second.take_sent().is_empty());

        board.handle_transport(
            &"c1".into(),
            TransportEvent::Data(r#"["moveItem",0,[99,null,null]]"#.into()),
        );
        assert_eq!(board.item(key).unwrap().transform.position.x, 0.0);
    }

    #[test]
    fn test_incoming_connections_report_status() {
        let relay = Rc::new(RefCell::new(RecordingRelay::default()));
        let mut board = Board::host(HostConfig::new(77, "host"), Some(relay));
        let statuses = Rc::new(RefCell::new(Vec::new()));
        let log = statuses.clone();
        board.on("connUpdate", move |e| {
            if let BoardEvent::ConnUpdate(s) = e {
                log.borrow_mut().push(s.to_string());
            }
        });

        let (channel, _probe) = RecordingChannel::new();
        board.accept("c1".into(), Box::new(channel));
        assert_eq!(board.link(), LinkState::Connecting);
        board.handle_transport(&"c1".into(), TransportEvent::Open);
        board.handle_relay(RelayNotice::RouteOpen { peer_id: "sock-3".into() });

        assert_eq!(
            *statuses.borrow(),
            vec!["Connecting", "Connected", "Connecting", "Connected"]
        );
        assert_eq!(board.link(), LinkState::Connected);
    }

    #[test]
    fn test_host_rejects_join_response() {
        let mut board = board_with_password(None);
        join(&mut board, "c1", None, "ada");
        let result = board.dispatch(&"c1".into(), r#"["joinResponse",false]"#);
        assert!(matches!(result, Err(BoardError::Unexpected { role: "host", .. })));
    }

    #[test]
    fn test_relayed_client() {
        let relay = Rc::new(RefCell::new(RecordingRelay::default()));
        let mut board = Board::host(HostConfig::new(77, "host"), Some(relay.clone()));

        board.handle_relay(RelayNotice::RouteOpen { peer_id: "sock-3".into() });
        board.handle_relay(RelayNotice::RouteData {
            sender_id: "sock-3".into(),
            payload: r#"["join",null,"cy"]"#.into(),
        });

        let requests = relay.borrow_mut().take();
        match requests.as_slice() {
            [RelayRequest::RouteData { board_id: 77, receiver_id, payload }] => {
                assert_eq!(receiver_id, "sock-3");
                assert!(payload.starts_with(r#"["joinResponse",true"#));
            }
            other => panic!("unexpected relay traffic: {other:?}"),
        }
        assert!(board.player_names().contains("cy"));

        board.handle_relay(RelayNotice::RouteClose { peer_id: "sock-3".into() });
        assert!(!board.player_names().contains("cy"));
        assert!(board.connections().is_empty());
    }

    #[test]
    fn test_route_open_without_relay_fails() {
        let mut board = board_with_password(None);
        board.handle_relay(RelayNotice::RouteOpen { peer_id: "sock-3".into() });
        assert!(board.connections().is_empty());
    }
}
