//! Encoding and decoding of message bodies.
//!
//! Producers and consumers do not negotiate an encoding on the wire: both sides must be configured
//! with the same [`SerializerKind`], usually by name (see [`get_serializer`]).
use chrono::{DateTime, TimeZone};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, str::FromStr};

/// Configuration name of the JSON serializer.
pub const JSON: &str = "json";
/// Configuration name of the MessagePack serializer.
pub const MSGPACK: &str = "msgpack";

/// The built-in message body encodings.
///
/// Adding a codec means adding a variant here and an entry to the registration table used by
/// [`get_serializer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SerializerKind {
    /// UTF-8 JSON text, via `serde_json`.
    #[default]
    Json,
    /// MessagePack binary, via `rmp-serde`. Structs are encoded as maps keyed by field name.
    MsgPack,
}

// Name → serializer registration table.
const SERIALIZERS: &[(&str, SerializerKind)] = &[
    (JSON, SerializerKind::Json),
    (MSGPACK, SerializerKind::MsgPack),
];

/// Resolve a serializer from its configuration name.
pub fn get_serializer(name: &str) -> Result<SerializerKind, UnknownSerializer> {
    SERIALIZERS
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| UnknownSerializer(name.to_owned()))
}

impl FromStr for SerializerKind {
    type Err = UnknownSerializer;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        get_serializer(s)
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl SerializerKind {
    /// The name this serializer is registered under.
    pub fn name(self) -> &'static str {
        match self {
            Self::Json => JSON,
            Self::MsgPack => MSGPACK,
        }
    }

    /// Encode `value` into a message body.
    ///
    /// `None` (or any unit-like value) is a valid payload and encodes to the codec's null.
    pub fn serialize<T>(self, value: &T) -> Result<Vec<u8>, SerializeError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = match self {
            Self::Json => serde_json::to_vec(value).map_err(anyhow::Error::from),
            Self::MsgPack => rmp_serde::to_vec_named(value).map_err(anyhow::Error::from),
        };
        encoded.map_err(|source| SerializeError { kind: self, source })
    }

    /// Decode a message body.
    pub fn deserialize<T: DeserializeOwned>(self, data: &[u8]) -> Result<T, DeserializeError> {
        let decoded = match self {
            Self::Json => serde_json::from_slice(data).map_err(anyhow::Error::from),
            Self::MsgPack => rmp_serde::from_slice(data).map_err(anyhow::Error::from),
        };
        decoded.map_err(|source| DeserializeError { kind: self, source })
    }
}

/// The serializer name is not in the registration table.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown serializer: {0}")]
pub struct UnknownSerializer(pub String);

/// A value could not be encoded, whatever the codec.
#[derive(thiserror::Error, Debug)]
#[error("Failed to serialize the message body as {kind}")]
pub struct SerializeError {
    pub kind: SerializerKind,
    #[source]
    pub source: anyhow::Error,
}

/// A message body could not be decoded, whatever the codec.
#[derive(thiserror::Error, Debug)]
#[error("Failed to deserialize the message body as {kind}")]
pub struct DeserializeError {
    pub kind: SerializerKind,
    #[source]
    pub source: anyhow::Error,
}

/// Convert a point in time to the number of whole seconds since the Unix epoch.
///
/// Sub-second precision is dropped.
pub fn datetime_converter<Tz: TimeZone>(value: &DateTime<Tz>) -> f64 {
    value.timestamp() as f64
}

/// Serde adapter to encode a `DateTime` field as epoch seconds, in every codec.
///
/// ```rust
/// use carrot_cake_ext::serializer::{epoch_seconds, SerializerKind};
/// use chrono::{DateTime, TimeZone, Utc};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Event {
///     #[serde(with = "epoch_seconds")]
///     created_at: DateTime<Utc>,
/// }
///
/// let event = Event { created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap() };
/// let body = SerializerKind::Json.serialize(&event).unwrap();
/// assert_eq!(body, br#"{"created_at":1700000000.0}"#);
/// ```
pub mod epoch_seconds {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<Tz, S>(value: &DateTime<Tz>, serializer: S) -> Result<S::Ok, S::Error>
    where
        Tz: TimeZone,
        S: Serializer,
    {
        serializer.serialize_f64(super::datetime_converter(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Utc.timestamp_opt(seconds.trunc() as i64, 0)
            .single()
            .ok_or_else(|| de::Error::custom(format!("{seconds} is out of range for a timestamp")))
    }
}
