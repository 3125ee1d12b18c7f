//! Network subsystem: secure transport, HTTP stream source

pub mod http;
pub mod source;
pub mod transport;

pub use http::Endpoint;
pub use source::{SourceState, StreamSource};
pub use transport::{Connector, NetConnector, NetStream, Transport};
