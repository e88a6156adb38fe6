mod handler;
mod hub;

pub use handler::{router, WsState};
pub use hub::{
    Hub, PingTick, MAX_FRAME_BYTES, PING_INTERVAL, PONG_TIMEOUT, PRESENCE_INTERVAL,
    WRITER_CHANNEL_CAPACITY,
};
