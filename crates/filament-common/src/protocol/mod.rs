pub mod error;
pub mod packets;
pub mod requests;
pub mod responses;


pub use error::{FilamentError, Result};
pub use packets::{Disconnect, Heartbeat, ServiceAdvert};
pub use requests::{CallParams, CallRequest, RequestId};
pub use responses::{CallResponse, CallResult};
