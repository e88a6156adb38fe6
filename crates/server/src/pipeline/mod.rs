// Side-effect pipelines: consumer-group subscribers reacting to
// domain events with further mutations and hub broadcasts.

mod chat;
mod task;

pub use chat::{ChatPipeline, CHAT_SUBSCRIBER_GROUP};
pub use task::{TaskPipeline, TASK_SUBSCRIBER_GROUP};
