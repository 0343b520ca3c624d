//! Streaming: metadata, wire packets and the receive/transmit streamers
//!
//! - [`RxStreamer`]: device → host samples, stream commands, receive errors
//! - [`TxStreamer`]: host → device samples, asynchronous device events
//! - [`wire`]: packet header and control payload codec
//! - [`convert`]: host sample types and over-the-wire formats

pub mod convert;
pub mod metadata;
pub mod rx;
pub mod stream_cmd;
pub mod tx;
pub mod wire;

pub use convert::{HostSample, OtwFormat};
pub use metadata::{
    AsyncEventCode, AsyncMetadata, EovPositions, RxErrorCode, RxMetadata, TxMetadata,
};
pub use rx::{RxStreamer, StreamState};
pub use stream_cmd::{StreamCmd, StreamMode};
pub use tx::TxStreamer;
