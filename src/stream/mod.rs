/// Streaming-event demultiplexer.
///
/// A [`MarketStream`] runs atop one long-lived [`crate::core::kernel::WsSession`]
/// and republishes every inbound frame as a typed [`StreamEvent`]:
/// tag-discriminated market and user-data events, structurally classified
/// tagless shapes, combined-stream wrappers, and positional kline bars
/// decoded into exact decimals.
pub mod demux;
pub mod events;
pub mod kline;

pub use demux::{classify_frame, classify_value, combined_stream_url, raw_stream_url, MarketStream};
pub use events::StreamEvent;
pub use kline::KlineBar;
