use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::{LuixError, Result};
use crate::protocol::{Request, Response};
use crate::url::{params, Url};

/// Payload serializer.
///
/// The serializer id is stamped into every frame header and every envelope,
/// so the receiving side always decodes with the serializer the sender used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Serializer {
    /// Compact binary encoding.
    #[default]
    Postcard,
    /// Portable, self-describing encoding. Required by generic calls.
    Json,
}

impl Serializer {
    pub const POSTCARD_ID: u8 = 1;
    pub const JSON_ID: u8 = 2;

    pub fn id(&self) -> u8 {
        match self {
            Serializer::Postcard => Self::POSTCARD_ID,
            Serializer::Json => Self::JSON_ID,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Serializer::Postcard => "postcard",
            Serializer::Json => "json",
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            Self::POSTCARD_ID => Ok(Serializer::Postcard),
            Self::JSON_ID => Ok(Serializer::Json),
            other => Err(LuixError::Codec(format!("Unknown serializer id {}", other))),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "postcard" => Ok(Serializer::Postcard),
            "json" => Ok(Serializer::Json),
            other => Err(LuixError::Configuration(format!(
                "Unknown serializer '{}'",
                other
            ))),
        }
    }

    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Serializer::Postcard => Ok(postcard::to_allocvec(value)?),
            Serializer::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Serializer::Postcard => Ok(postcard::from_bytes(data)?),
            Serializer::Json => Ok(serde_json::from_slice(data)?),
        }
    }
}

/// Codec for encoding/decoding request and response envelopes.
///
/// The codec is chosen out of band through the endpoint url: the `codec`
/// parameter must name the luix frame codec and the `serializer` parameter
/// picks the envelope encoding. There is no runtime negotiation.
///
/// # Example
///
/// ```
/// use luix_common::transport::Codec;
/// use luix_common::protocol::Request;
///
/// let codec = Codec::new();
/// let request = Request::new("com.acme.OrderService", "getOrder");
///
/// let encoded = codec.encode_request(&request).unwrap();
/// let decoded = codec.decode_request(&encoded).unwrap();
/// assert_eq!(request, decoded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Postcard(PostcardCodec),
    Json(JsonCodec),
}

impl Codec {
    /// Creates the default codec (postcard envelopes).
    pub fn new() -> Self {
        Codec::Postcard(PostcardCodec)
    }

    /// Resolves the codec named by the url parameters.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Configuration`] if the codec or serializer name is unknown.
    pub fn from_url(url: &Url) -> Result<Self> {
        let codec = url.parameter_or(params::CODEC, params::DEFAULT_CODEC);
        if codec != params::DEFAULT_CODEC {
            return Err(LuixError::Configuration(format!(
                "Unknown codec '{}' in {}",
                codec, url
            )));
        }
        let serializer =
            Serializer::from_name(url.parameter_or(params::SERIALIZER, params::DEFAULT_SERIALIZER))?;
        Ok(Self::for_serializer(serializer))
    }

    pub fn for_serializer(serializer: Serializer) -> Self {
        match serializer {
            Serializer::Postcard => Codec::Postcard(PostcardCodec),
            Serializer::Json => Codec::Json(JsonCodec),
        }
    }

    /// Resolves the codec for a serializer id read from a frame header.
    pub fn from_id(id: u8) -> Result<Self> {
        Ok(Self::for_serializer(Serializer::from_id(id)?))
    }

    pub fn serializer(&self) -> Serializer {
        match self {
            Codec::Postcard(_) => Serializer::Postcard,
            Codec::Json(_) => Serializer::Json,
        }
    }

    pub fn encode_request(&self, request: &Request) -> Result<Vec<u8>> {
        match self {
            Codec::Postcard(_) => PostcardCodec::encode_request(request),
            Codec::Json(_) => JsonCodec::encode_request(request),
        }
    }

    pub fn decode_request(&self, data: &[u8]) -> Result<Request> {
        match self {
            Codec::Postcard(_) => PostcardCodec::decode_request(data),
            Codec::Json(_) => JsonCodec::decode_request(data),
        }
    }

    pub fn encode_response(&self, response: &Response) -> Result<Vec<u8>> {
        match self {
            Codec::Postcard(_) => PostcardCodec::encode_response(response),
            Codec::Json(_) => JsonCodec::encode_response(response),
        }
    }

    pub fn decode_response(&self, data: &[u8]) -> Result<Response> {
        match self {
            Codec::Postcard(_) => PostcardCodec::decode_response(data),
            Codec::Json(_) => JsonCodec::decode_response(data),
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

/// Postcard codec for encoding/decoding envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostcardCodec;

impl PostcardCodec {
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(request)?)
    }

    pub fn decode_request(data: &[u8]) -> Result<Request> {
        Ok(postcard::from_bytes(data)?)
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(response)?)
    }

    pub fn decode_response(data: &[u8]) -> Result<Response> {
        Ok(postcard::from_bytes(data)?)
    }
}

/// JSON codec for encoding/decoding envelopes.
///
/// Slower and larger than postcard, but readable on the wire and tolerant of
/// field additions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    pub fn decode_request(data: &[u8]) -> Result<Request> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    pub fn decode_response(data: &[u8]) -> Result<Response> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        items: Vec<String>,
        total: i64,
    }

    fn sample_request() -> Request {
        Request::new("com.acme.OrderService", "placeOrder")
            .with_parameter_types(&["u64", "Vec<String>"])
            .with_payload(vec![1, 2, 3])
            .with_timeout(1500)
            .with_attachment("group", "orders")
    }

    #[test]
    fn test_postcard_codec_round_trip() {
        let request = sample_request();
        let encoded = PostcardCodec::encode_request(&request).unwrap();
        let decoded = PostcardCodec::decode_request(&encoded).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn test_json_codec_response_round_trip() {
        let response = Response::success(123, vec![9, 9], Serializer::Json);
        let encoded = JsonCodec::encode_response(&response).unwrap();
        let decoded = JsonCodec::decode_response(&encoded).unwrap();
        assert_eq!(response, decoded);
    }

    #[test]
    fn test_postcard_is_more_compact_than_json() {
        let request = sample_request();
        let postcard = PostcardCodec::encode_request(&request).unwrap();
        let json = JsonCodec::encode_request(&request).unwrap();
        assert!(postcard.len() < json.len());
    }

    #[test]
    fn test_codec_from_url() {
        let url = Url::parse("luix://h:1/svc?serializer=json").unwrap();
        assert_eq!(Codec::from_url(&url).unwrap(), Codec::Json(JsonCodec));

        let url = Url::parse("luix://h:1/svc").unwrap();
        assert_eq!(Codec::from_url(&url).unwrap().serializer(), Serializer::Postcard);
    }

    #[test]
    fn test_codec_from_url_rejects_unknown_names() {
        let url = Url::parse("luix://h:1/svc?codec=hessian").unwrap();
        assert!(matches!(Codec::from_url(&url), Err(LuixError::Configuration(_))));

        let url = Url::parse("luix://h:1/svc?serializer=kryo").unwrap();
        assert!(matches!(Codec::from_url(&url), Err(LuixError::Configuration(_))));
    }

    #[test]
    fn test_serializer_ids_round_trip() {
        for serializer in [Serializer::Postcard, Serializer::Json] {
            assert_eq!(Serializer::from_id(serializer.id()).unwrap(), serializer);
            assert_eq!(Serializer::from_name(serializer.name()).unwrap(), serializer);
        }
        assert!(Serializer::from_id(42).is_err());
    }

    #[test]
    fn test_serializers_encode_typed_payloads() {
        let order = Order {
            id: 7,
            items: vec!["book".into(), "pen".into()],
            total: -15,
        };
        for serializer in [Serializer::Postcard, Serializer::Json] {
            let bytes = serializer.serialize(&(order.id, &order.items, order.total)).unwrap();
            let (id, items, total): (u64, Vec<String>, i64) = serializer.deserialize(&bytes).unwrap();
            assert_eq!(Order { id, items, total }, order);
        }
    }

    #[test]
    fn test_decode_garbage_is_codec_error() {
        assert!(matches!(
            JsonCodec::decode_request(&[0xFF, 0x00]),
            Err(LuixError::Codec(_))
        ));
        assert!(PostcardCodec::decode_response(&[0xFF]).is_err());
    }
}
