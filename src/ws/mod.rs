//! WebSocket client: frame codec, handshake, connection driver and
//! application sessions

pub mod assembler;
pub mod client;
pub mod frame;
pub mod handshake;
pub mod session;

pub use assembler::{Message, MessageAssembler};
pub use client::{ConnectionState, WsClient, WsClientConfig, WsSender, WsStats};
pub use frame::{Frame, FrameDecoder, OpCode};
pub use session::{EventDispatcher, PlainSession, SessionHandler, SocketIoSession};
