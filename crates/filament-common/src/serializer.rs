use crate::protocol::error::Result;
use crate::protocol::{CallRequest, CallResponse, Disconnect, Heartbeat};

/// Serializer for encoding/decoding wire packets.
///
/// Currently only JSON is supported, but the enum keeps the set closed while
/// allowing future formats (e.g. MessagePack, CBOR) to slot in.
///
/// # Example
///
/// ```
/// use filament_common::serializer::Serializer;
/// use filament_common::protocol::CallRequest;
/// use serde_json::json;
///
/// let serializer = Serializer::json();
/// let request = CallRequest::new("math", "add", json!({"a": 1, "b": 2}));
///
/// let encoded = serializer.encode_request(&request).unwrap();
/// let decoded = serializer.decode_request(&encoded).unwrap();
/// assert_eq!(request, decoded);
/// ```
pub enum Serializer {
    /// JSON serializer (currently the only supported format)
    Json(JsonSerializer),
}

impl Serializer {
    /// Creates the default (JSON) serializer.
    pub fn json() -> Self {
        Serializer::Json(JsonSerializer)
    }

    /// Adapter-type name, as used by the configuration resolver.
    pub fn name(&self) -> &'static str {
        match self {
            Serializer::Json(_) => "JSON",
        }
    }

    pub fn encode_request(&self, request: &CallRequest) -> Result<Vec<u8>> {
        match self {
            Serializer::Json(_) => JsonSerializer::encode(request),
        }
    }

    pub fn decode_request(&self, data: &[u8]) -> Result<CallRequest> {
        match self {
            Serializer::Json(_) => JsonSerializer::decode(data),
        }
    }

    pub fn encode_response(&self, response: &CallResponse) -> Result<Vec<u8>> {
        match self {
            Serializer::Json(_) => JsonSerializer::encode(response),
        }
    }

    pub fn decode_response(&self, data: &[u8]) -> Result<CallResponse> {
        match self {
            Serializer::Json(_) => JsonSerializer::decode(data),
        }
    }

    pub fn encode_heartbeat(&self, beat: &Heartbeat) -> Result<Vec<u8>> {
        match self {
            Serializer::Json(_) => JsonSerializer::encode(beat),
        }
    }

    pub fn decode_heartbeat(&self, data: &[u8]) -> Result<Heartbeat> {
        match self {
            Serializer::Json(_) => JsonSerializer::decode(data),
        }
    }

    pub fn encode_disconnect(&self, packet: &Disconnect) -> Result<Vec<u8>> {
        match self {
            Serializer::Json(_) => JsonSerializer::encode(packet),
        }
    }

    pub fn decode_disconnect(&self, data: &[u8]) -> Result<Disconnect> {
        match self {
            Serializer::Json(_) => JsonSerializer::decode(data),
        }
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Serializer::json()
    }
}

/// JSON wire encoding, backed by `serde_json`.
pub struct JsonSerializer;

impl JsonSerializer {
    fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}
