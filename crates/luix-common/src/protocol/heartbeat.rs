//! Reserved health-check request.
//!
//! Both transport ends recognise it before any routing takes place, so health
//! checks never queue behind business traffic.

use crate::protocol::error::Result;
use crate::protocol::requests::Request;
use crate::protocol::responses::Response;
use crate::transport::codec::Serializer;

pub const HEARTBEAT_INTERFACE: &str = "luix.health.Checker";
pub const HEARTBEAT_METHOD: &str = "checkHealth";
pub const HEARTBEAT_RESPONSE: &str = "SUCCESS";

/// Builds a heartbeat request.
pub fn heartbeat_request() -> Request {
    Request::new(HEARTBEAT_INTERFACE, HEARTBEAT_METHOD)
}

pub fn is_heartbeat(request: &Request) -> bool {
    request.interface_name == HEARTBEAT_INTERFACE && request.method_name == HEARTBEAT_METHOD
}

/// Answers a heartbeat with the fixed success token.
pub fn heartbeat_response(request: &Request) -> Result<Response> {
    let serializer = request.serializer().unwrap_or_default();
    let payload = serializer.serialize(&HEARTBEAT_RESPONSE)?;
    Ok(Response::success(request.id, payload, serializer))
}

/// Checks that a response carries the heartbeat success token.
pub fn is_heartbeat_success(response: Response) -> bool {
    let serializer = match Serializer::from_id(response.serializer_id) {
        Ok(serializer) => serializer,
        Err(_) => return false,
    };
    match response.into_payload() {
        Ok(payload) => serializer
            .deserialize::<String>(&payload)
            .map(|token| token == HEARTBEAT_RESPONSE)
            .unwrap_or(false),
        Err(_) => false,
    }
}
