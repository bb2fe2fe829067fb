//! Wire messages exchanged between a host and its clients.
//!
//! Every message is a frame `[eventName, ...args]`:
//!
//! ```json
//! ["join", "secret", "ada"]
//! ["joinResponse", true, "Sprint board", {"dataType":"Set","value":["ada","bo"]}, {...}, [...], 12]
//! ["moveItem", 7, [10, null, null]]
//! ```

use crate::codec::{self, TaggedMap, TaggedSet};
use crate::items::{ItemKey, ItemSnapshot, PartialPosition, PartialScale};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

/// Opaque board settings. Entry order is preserved on the wire.
pub type Settings = Map<String, Value>;

/// Errors produced while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    #[error("Frame is empty or has no event name")]
    MissingEventName,
    #[error("Invalid argument {index} for {event}: {source}")]
    InvalidArgument {
        event: &'static str,
        index: usize,
        source: serde_json::Error,
    },
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Full board state sent to a client whose join was accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSnapshot {
    pub name: Option<String>,
    pub player_names: HashSet<String>,
    pub settings: Settings,
    pub items: Vec<ItemSnapshot>,
    pub next_key: ItemKey,
}

/// A decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Join {
        password: Option<String>,
        player_name: String,
    },
    /// `None` means the join was rejected.
    JoinResponse(Option<JoinSnapshot>),
    AddItem(ItemSnapshot),
    MoveItem {
        key: ItemKey,
        position: PartialPosition,
    },
    ScaleItem {
        key: ItemKey,
        scale: PartialScale,
    },
    RotateItem {
        key: ItemKey,
        rotation: Option<f64>,
    },
    ParentItem {
        child: ItemKey,
        parent: ItemKey,
    },
    UnparentItem {
        child: ItemKey,
    },
}

impl Message {
    /// Event name used as the first element of the frame.
    pub fn event_name(&self) -> &'static str {
        match self {
            Message::Join { .. } => "join",
            Message::JoinResponse(_) => "joinResponse",
            Message::AddItem(_) => "addItem",
            Message::MoveItem { .. } => "moveItem",
            Message::ScaleItem { .. } => "scaleItem",
            Message::RotateItem { .. } => "rotateItem",
            Message::ParentItem { .. } => "parentItem",
            Message::UnparentItem { .. } => "unparentItem",
        }
    }

    /// Session handshake messages, as opposed to item mutations.
    pub fn is_handshake(&self) -> bool {
        matches!(self, Message::Join { .. } | Message::JoinResponse(_))
    }

    /// Build the `[eventName, ...args]` frame.
    pub fn to_frame(&self) -> Result<Vec<Value>, serde_json::Error> {
        let mut frame = vec![Value::from(self.event_name())];
        match self {
            Message::Join {
                password,
                player_name,
            } => {
                frame.push(serde_json::to_value(password)?);
                frame.push(Value::from(player_name.as_str()));
            }
            Message::JoinResponse(None) => frame.push(Value::Bool(false)),
            Message::JoinResponse(Some(snapshot)) => {
                frame.push(Value::Bool(true));
                frame.push(serde_json::to_value(&snapshot.name)?);
                frame.push(serde_json::to_value(TaggedSet(snapshot.player_names.clone()))?);
                frame.push(serde_json::to_value(TaggedMap(snapshot.settings.clone()))?);
                frame.push(serde_json::to_value(&snapshot.items)?);
                frame.push(Value::from(snapshot.next_key));
            }
            Message::AddItem(item) => frame.push(serde_json::to_value(item)?),
            Message::MoveItem { key, position } => {
                frame.push(Value::from(*key));
                frame.push(serde_json::to_value(position)?);
            }
            Message::ScaleItem { key, scale } => {
                frame.push(Value::from(*key));
                frame.push(serde_json::to_value(scale)?);
            }
            Message::RotateItem { key, rotation } => {
                frame.push(Value::from(*key));
                frame.push(serde_json::to_value(rotation)?);
            }
            Message::ParentItem { child, parent } => {
                frame.push(Value::from(*child));
                frame.push(Value::from(*parent));
            }
            Message::UnparentItem { child } => frame.push(Value::from(*child)),
        }
        Ok(frame)
    }

    /// Parse a frame. Missing trailing arguments read as `null`.
    pub fn from_frame(frame: Vec<Value>) -> Result<Message, ProtocolError> {
        let mut values = frame.into_iter();
        let name = match values.next() {
            Some(Value::String(name)) => name,
            _ => return Err(ProtocolError::MissingEventName),
        };
        let mut args = Args {
            values,
            event: "",
            index: 0,
        };

        let message = match name.as_str() {
            "join" => {
                args.event = "join";
                Message::Join {
                    password: args.next()?,
                    player_name: args.next()?,
                }
            }
            "joinResponse" => {
                args.event = "joinResponse";
                let success: Option<bool> = args.next()?;
                if success.unwrap_or(false) {
                    let name = args.next()?;
                    let TaggedSet(player_names) = args.next()?;
                    let TaggedMap(settings) = args.next()?;
                    let items: Option<Vec<ItemSnapshot>> = args.next()?;
                    let next_key: Option<ItemKey> = args.next()?;
                    Message::JoinResponse(Some(JoinSnapshot {
                        name,
                        player_names,
                        settings,
                        items: items.unwrap_or_default(),
                        next_key: next_key.unwrap_or(0),
                    }))
                } else {
                    Message::JoinResponse(None)
                }
            }
            "addItem" => {
                args.event = "addItem";
                Message::AddItem(args.next()?)
            }
            "moveItem" => {
                args.event = "moveItem";
                Message::MoveItem {
                    key: args.next()?,
                    position: args.next()?,
                }
            }
            "scaleItem" | "resizeItem" => {
                args.event = "scaleItem";
                Message::ScaleItem {
                    key: args.next()?,
                    scale: args.next()?,
                }
            }
            "rotateItem" => {
                args.event = "rotateItem";
                Message::RotateItem {
                    key: args.next()?,
                    rotation: args.next()?,
                }
            }
            "parentItem" => {
                args.event = "parentItem";
                Message::ParentItem {
                    child: args.next()?,
                    parent: args.next()?,
                }
            }
            "unparentItem" => {
                args.event = "unparentItem";
                Message::UnparentItem {
                    child: args.next()?,
                }
            }
            _ => return Err(ProtocolError::UnknownEvent(name)),
        };
        Ok(message)
    }
}

struct Args<I> {
    values: I,
    event: &'static str,
    index: usize,
}

impl<I: Iterator<Item = Value>> Args<I> {
    fn next<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        self.index += 1;
        let value = self.values.next().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|source| ProtocolError::InvalidArgument {
            event: self.event,
            index: self.index,
            source,
        })
    }
}

/// Encode a message as frame text.
pub fn encode(message: &Message) -> Result<String, serde_json::Error> {
    codec::encode_frame(&message.to_frame()?)
}

/// Decode frame text into a message.
pub fn decode(text: &str) -> Result<Message, ProtocolError> {
    Message::from_frame(codec::decode_frame(text)?)
}
