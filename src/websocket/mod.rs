mod handler;
mod message;
mod transport;

pub use handler::{ws_handler, WsQuery};
pub use message::{reply_for, ClientMessage, ServerMessage};
pub use transport::{spawn_writer, OutboundFrame, WsTransport, CHANNEL_BUFFER_SIZE};
