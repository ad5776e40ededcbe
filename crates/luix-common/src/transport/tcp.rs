use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};

use crate::protocol::error::{LuixError, Result};
use crate::protocol::heartbeat::is_heartbeat;
use crate::protocol::{Request, Response};
use crate::transport::codec::Codec;
use crate::transport::frame::{read_frame, write_frame, Frame};

/// Async TCP transport for luix.
///
/// Opens connections and performs one-shot request/response exchanges.
/// Long-lived, multiplexed connections are built on top of it by the client
/// crate.
///
/// # Example
///
/// ```no_run
/// use luix_common::transport::{Codec, TcpTransportAsync};
/// use luix_common::protocol::heartbeat::heartbeat_request;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransportAsync::new(Duration::from_secs(1), 10 * 1024 * 1024);
/// let mut stream = transport.connect("127.0.0.1:26010").await?;
///
/// let response = transport
///     .send_request(&mut stream, &Codec::new(), &heartbeat_request())
///     .await?;
/// assert!(response.is_success());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpTransportAsync {
    connect_timeout: Duration,
    max_content_length: usize,
}

impl TcpTransportAsync {
    pub fn new(connect_timeout: Duration, max_content_length: usize) -> Self {
        Self {
            connect_timeout,
            max_content_length,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn max_content_length(&self) -> usize {
        self.max_content_length
    }

    /// Connects to a remote endpoint.
    ///
    /// The address is resolved without blocking, then each resolved address is
    /// tried in turn, each within the connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Connection`] if the address cannot be resolved or
    /// every resolved address refuses or times out.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let socket_addrs = tokio::time::timeout(self.connect_timeout, lookup_host(addr))
            .await
            .map_err(|_| {
                LuixError::Connection(format!(
                    "Resolving '{}' timed out after {}ms",
                    addr,
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| LuixError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&socket_addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => {
                    last_err = Some(format!(
                        "timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ))
                }
            }
        }

        Err(LuixError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }

    /// Sends a request and waits for the next response on the stream.
    ///
    /// Only suitable for streams that carry one request at a time.
    pub async fn send_request(
        &self,
        stream: &mut TcpStream,
        codec: &Codec,
        request: &Request,
    ) -> Result<Response> {
        let frame = Frame::request(codec, request, is_heartbeat(request))?;
        write_frame(stream, &frame).await?;

        let frame = read_frame(stream, self.max_content_length)
            .await?
            .ok_or_else(|| LuixError::Connection("Connection closed before response".to_string()))?;
        let response = frame.decode_response()?;

        if response.request_id != request.id {
            return Err(LuixError::InvalidResponse(format!(
                "Response id {} does not match request id {}",
                response.request_id, request.id
            )));
        }
        Ok(response)
    }
}
