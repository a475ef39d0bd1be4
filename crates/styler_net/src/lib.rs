//!Network components for the styler client: the streaming channel to the
//!processing service and the one-shot HTTP request path.

///Streaming websocket channel
pub mod channel;

///One-shot style requests and the style catalog
pub mod http;

pub use channel::{StreamChannel, WsChannelOpener};
pub use http::{HttpStyleService, StyleEntry};
