//! JSON frame encoding.
//!
//! Frames are JSON arrays. Plain JSON cannot tell a set from a list or keep
//! a mapping distinct from an object, so set and mapping values travel as
//! tagged objects:
//!
//! ```json
//! {"dataType": "Set", "value": ["ada", "bo"]}
//! {"dataType": "Map", "value": [["grid", true], ["zoom", 2]]}
//! ```
//!
//! Decoders also accept the plain array / object forms.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::hash::Hash;

const SET_TAG: &str = "Set";
const MAP_TAG: &str = "Map";

#[derive(Serialize)]
struct TaggedRef<'a, T: ?Sized> {
    #[serde(rename = "dataType")]
    data_type: &'static str,
    value: &'a T,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr<T, P> {
    Tagged {
        #[serde(rename = "dataType")]
        data_type: String,
        value: T,
    },
    Plain(P),
}

/// `#[serde(with = "tagged_set")]` for `HashSet<T>` fields.
pub mod tagged_set {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S, T>(set: &HashSet<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        let value: Vec<&T> = set.iter().collect();
        TaggedRef {
            data_type: SET_TAG,
            value: &value,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<HashSet<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Eq + Hash,
    {
        match Repr::<Vec<T>, Vec<T>>::deserialize(deserializer)? {
            Repr::Tagged { data_type, value } if data_type == SET_TAG => Ok(value.into_iter().collect()),
            Repr::Tagged { data_type, .. } => Err(D::Error::custom(format!(
                "expected a {SET_TAG}, found dataType {data_type}"
            ))),
            Repr::Plain(values) => Ok(values.into_iter().collect()),
        }
    }
}

/// `#[serde(with = "tagged_map")]` for ordered string-keyed mappings.
pub mod tagged_map {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S>(map: &Map<String, Value>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let entries: Vec<(&String, &Value)> = map.iter().collect();
        TaggedRef {
            data_type: MAP_TAG,
            value: &entries,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::<Vec<(String, Value)>, Option<Map<String, Value>>>::deserialize(deserializer)? {
            Repr::Tagged { data_type, value } if data_type == MAP_TAG => Ok(value.into_iter().collect()),
            Repr::Tagged { data_type, .. } => Err(D::Error::custom(format!(
                "expected a {MAP_TAG}, found dataType {data_type}"
            ))),
            Repr::Plain(map) => Ok(map.unwrap_or_default()),
        }
    }
}

/// Player roster as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedSet(#[serde(with = "tagged_set")] pub HashSet<String>);

/// Settings mapping as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaggedMap(#[serde(with = "tagged_map")] pub Map<String, Value>);

/// Serialize a frame to text.
pub fn encode_frame(frame: &[Value]) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Parse text into a frame.
pub fn decode_frame(text: &str) -> Result<Vec<Value>, serde_json::Error> {
    serde_json::from_str(text)
}
