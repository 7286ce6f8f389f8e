//! Message serialisation.
//!
//! The publisher serialises each message exactly once before it reaches the
//! pool. JSON is the default wire format; MessagePack is available as a
//! compact alternative.

use std::{fmt, str::FromStr};

use rmp_serde::Serializer;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Opaque key/value record produced by callers.
pub type Message = serde_json::Map<String, serde_json::Value>;

/// Errors raised while encoding or decoding a message.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("json serialisation failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("msgpack serialisation failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack deserialisation failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Wire format used for published payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Human-readable JSON text.
    #[default]
    Json,
    /// MessagePack with struct fields encoded as maps.
    MsgPack,
}

impl Encoding {
    /// Serialise `message` into a payload.
    pub fn encode<T>(&self, message: &T) -> Result<Vec<u8>, EncodeError>
    where
        T: Serialize + ?Sized,
    {
        match self {
            Encoding::Json => Ok(serde_json::to_vec(message)?),
            Encoding::MsgPack => {
                let mut buf = Vec::with_capacity(128);
                message.serialize(&mut Serializer::new(&mut buf).with_struct_map())?;
                Ok(buf)
            }
        }
    }

    /// Deserialise a payload produced by [`Encoding::encode`].
    pub fn decode<T>(&self, payload: &[u8]) -> Result<T, EncodeError>
    where
        T: DeserializeOwned,
    {
        match self {
            Encoding::Json => Ok(serde_json::from_slice(payload)?),
            Encoding::MsgPack => Ok(rmp_serde::from_slice(payload)?),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Encoding::Json => "json",
            Encoding::MsgPack => "msgpack",
        })
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "msgpack" => Ok(Encoding::MsgPack),
            other => Err(format!(
                "unknown encoding '{other}'. Valid options are: json, msgpack"
            )),
        }
    }
}
