// Event bus: a partitioned append-only log with consumer groups,
// an async publisher with delivery acknowledgements, and the
// subscriber runtime that drives per-topic handlers.

mod log;
mod publisher;
mod subscriber;

pub use log::{EventLog, Record};
pub use publisher::Publisher;
pub use subscriber::{ConsumedRecord, HandlerError, HandlerResult, Subscriber};
