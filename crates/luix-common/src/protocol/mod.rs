pub mod error;
pub mod future;
pub mod heartbeat;
pub mod requests;
pub mod responses;

#[cfg(test)]
mod tests;

pub use error::{BusinessError, LuixError, Result};
pub use future::{FutureResponse, FutureState, ResponseResult};
pub use requests::{generate_request_id, Attachments, Request, RequestId};
pub use responses::{ErrorKind, RemoteError, Response};
