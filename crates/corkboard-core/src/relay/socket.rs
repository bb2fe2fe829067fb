//! Native WebSocket connection to the relay server.

use super::{RelayNotice, RelayRequest, RelayTransport};
use crate::connection::TransportError;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, connect};
use url::Url;

/// Events produced by the relay socket thread.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected,
    Disconnected,
    Notice(RelayNotice),
    Error { message: String },
}

/// Commands sent to the WebSocket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// Relay client for native platforms.
///
/// The socket runs on a background thread; inbound notices are collected
/// and handed out by [`NativeRelaySocket::poll_events`], so the board can
/// stay on a single thread.
pub struct NativeRelaySocket {
    connected: bool,
    cmd_tx: Option<Sender<WsCommand>>,
    event_rx: Option<Receiver<RelayEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl NativeRelaySocket {
    pub fn new() -> Self {
        Self {
            connected: false,
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }

    /// Connect to a relay at a `ws://` or `wss://` URL.
    pub fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        if self.cmd_tx.is_some() {
            return Err(TransportError::Relay("Already connected".to_string()));
        }

        let parsed_url = Url::parse(url).map_err(|e| TransportError::Relay(format!("Invalid URL: {}", e)))?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(TransportError::Relay(format!(
                "Invalid WebSocket URL scheme: {}",
                parsed_url.scheme()
            )));
        }

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<RelayEvent>();
        let url = url.to_string();

        let handle = thread::spawn(move || {
            log::info!("Relay thread: connecting to {}", url);

            let (mut socket, response) = match connect(&url) {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("Relay connection failed: {}", e);
                    let _ = event_tx.send(RelayEvent::Error {
                        message: format!("Connection failed: {}", e),
                    });
                    return;
                }
            };
            log::info!("Relay connected, status: {}", response.status());
            let _ = event_tx.send(RelayEvent::Connected);

            // Short read timeout so the loop can service outgoing commands.
            if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
                let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
            }

            loop {
                match cmd_rx.try_recv() {
                    Ok(WsCommand::Send(msg)) => {
                        log::debug!("Relay sending: {}", &msg[..msg.len().min(100)]);
                        if let Err(e) = socket.send(Message::Text(msg)) {
                            log::error!("Relay send error: {}", e);
                            break;
                        }
                    }
                    Ok(WsCommand::Close) => {
                        log::info!("Relay close requested");
                        let _ = socket.close(None);
                        break;
                    }
                    Err(TryRecvError::Disconnected) => {
                        log::info!("Relay command channel disconnected");
                        break;
                    }
                    Err(TryRecvError::Empty) => {}
                }

                match socket.read() {
                    Ok(Message::Text(txt)) => {
                        if let Some(event) = parse_notice(&txt) {
                            let _ = event_tx.send(event);
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = socket.send(Message::Pong(data));
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("Relay sent close frame");
                        break;
                    }
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(ref e))
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        log::error!("Relay read error: {}", e);
                        break;
                    }
                }
            }

            log::info!("Relay thread exiting");
            let _ = event_tx.send(RelayEvent::Disconnected);
        });

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
        self.connected = false;
    }

    /// Drain pending events without blocking.
    pub fn poll_events(&mut self) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        if let Some(ref rx) = self.event_rx {
            while let Ok(event) = rx.try_recv() {
                match &event {
                    RelayEvent::Connected => self.connected = true,
                    RelayEvent::Disconnected | RelayEvent::Error { .. } => self.connected = false,
                    RelayEvent::Notice(_) => {}
                }
                events.push(event);
            }
        }
        events
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Decode one text frame from the relay. Unknown frames are logged and
/// skipped.
fn parse_notice(text: &str) -> Option<RelayEvent> {
    match serde_json::from_str::<RelayNotice>(text) {
        Ok(notice) => Some(RelayEvent::Notice(notice)),
        Err(e) => {
            log::warn!("Failed to parse relay message ({}): {}", e, text);
            None
        }
    }
}

impl RelayTransport for NativeRelaySocket {
    fn send(&mut self, request: &RelayRequest) -> Result<(), TransportError> {
        let tx = self.cmd_tx.as_ref().ok_or(TransportError::Closed)?;
        let json = serde_json::to_string(request)?;
        tx.send(WsCommand::Send(json))
            .map_err(|e| TransportError::Relay(format!("Send failed: {}", e)))
    }
}

impl Default for NativeRelaySocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeRelaySocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;
    use crate::config::HostConfig;
    use crate::testing::init_logging;
    use std::cell::RefCell;
    use std::net::TcpListener;
    use std::rc::Rc;
    use std::time::Instant;

    #[test]
    fn test_parse_notice() {
        assert_eq!(
            parse_notice(r#"{"type":"route_close","peer_id":"sock-1"}"#),
            Some(RelayEvent::Notice(RelayNotice::RouteClose { peer_id: "sock-1".into() }))
        );
        assert_eq!(parse_notice(r#"{"type":"shrug"}"#), None);
        assert_eq!(parse_notice("not json"), None);
    }

    #[test]
    fn test_relayed_join_over_websocket() {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = channel::<String>();

        // Stand-in relay: opens a route, forwards a join, records the reply.
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            let notices = [
                RelayNotice::RouteOpen { peer_id: "sock-9".into() },
                RelayNotice::RouteData {
                    sender_id: "sock-9".into(),
                    payload: r#"["join",null,"cy"]"#.into(),
                },
            ];
            for notice in notices {
                let text = serde_json::to_string(&notice).unwrap();
                ws.send(Message::Text(text)).unwrap();
            }
            while let Ok(message) = ws.read() {
                match message {
                    Message::Text(text) => {
                        let _ = seen_tx.send(text);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        let socket = Rc::new(RefCell::new(NativeRelaySocket::new()));
        socket.borrow_mut().connect(&format!("ws://{}", addr)).unwrap();
        let mut board = Board::host(HostConfig::new(12, "host"), Some(socket.clone()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !board.player_names().contains("cy") && Instant::now() < deadline {
            let events = socket.borrow_mut().poll_events();
            for event in events {
                board.handle_relay_event(event);
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert!(socket.borrow().is_connected());
        assert!(board.player_names().contains("cy"));
        let reply = seen_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match serde_json::from_str::<RelayRequest>(&reply).unwrap() {
            RelayRequest::RouteData {
                board_id,
                receiver_id,
                payload,
            } => {
                assert_eq!(board_id, 12);
                assert_eq!(receiver_id, "sock-9");
                assert!(payload.starts_with(r#"["joinResponse",true"#));
            }
            other => panic!("unexpected relay request: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let mut socket = NativeRelaySocket::new();
        assert!(matches!(
            socket.connect("http://localhost:3000"),
            Err(TransportError::Relay(_))
        ));
        assert!(matches!(socket.connect("not a url"), Err(TransportError::Relay(_))));
    }

    #[test]
    fn test_send_before_connect_fails() {
        let mut socket = NativeRelaySocket::new();
        let result = socket.send(&RelayRequest::RequestRoute { board_id: 1 });
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(socket.poll_events().is_empty());
        assert!(!socket.is_connected());
    }
}
