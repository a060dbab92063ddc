/// Typed requests and replies.
pub mod message;
/// The fixed-size datagram layout.
pub mod record;
/// Request retransmission.
pub mod retry;

pub use message::{Request, Response};
pub use record::{DecodeError, OpCode, WireRecord, RECORD_SIZE};
pub use retry::{round_trip, RetryPolicy};
