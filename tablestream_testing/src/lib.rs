//! Utilities for exercising the `tablestream` inbound pipeline in tests.
//!
//! Sessions built by [`RecordingProvider`] forward every delivery to a
//! [`Deliveries`] receiver, and the frame helpers turn messages into the
//! chunked byte stream a peer would send.
//!
//! ```rust
//! use tablestream::StreamMessage;
//! use tablestream_testing::{RecordingProvider, drive_messages, handler_for};
//!
//! # async fn example() {
//! let (provider, mut deliveries) = RecordingProvider::new();
//! let handler = handler_for(provider.shared(), 1);
//! drive_messages(&handler, &[StreamMessage::KeepAlive], 4).await.unwrap();
//! assert!(deliveries.try_next().is_none());
//! # }
//! ```

pub mod frames;
pub mod logging;
pub mod session;

pub use frames::{
    connection_peer,
    drive_bytes,
    drive_messages,
    encode_frames,
    frames_to_chunks,
    handler_for,
    test_peer,
};
pub use logging::{LoggerHandle, logger};
pub use session::{Deliveries, Delivery, RecordingProvider, RecordingSession};
