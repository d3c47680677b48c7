use async_trait::async_trait;

use crate::format::VideoFormat;
use crate::frame::VideoFrame;

/// An external frame sink: a display, a recorder, a streaming encoder.
/// Registered with [`Output`](crate::output::Output) under a port index
/// and driven once per tick.
#[async_trait]
pub trait FrameConsumer: Send + Sync {
    /// The consumer's own preferred port index, used when it is added
    /// without an explicit one.
    fn index(&self) -> i32;

    /// Called once at registration and again on every format change. A
    /// failure leaves the consumer unregistered, or evicts it.
    fn initialize(&self, format: &VideoFormat, channel_index: i32) -> anyhow::Result<()>;

    /// Delivers one frame. `Ok(false)` or `Err` means the consumer can no
    /// longer accept frames and is evicted.
    async fn send(&self, frame: VideoFrame) -> anyhow::Result<bool>;

    /// Cheap, non-blocking diagnostic snapshot.
    fn state(&self) -> serde_json::Value;

    /// Whether this consumer paces real-time delivery itself, e.g. by
    /// blocking on hardware vertical sync inside `send`. If any registered
    /// consumer does, the dispatcher performs no software pacing.
    fn has_synchronization_clock(&self) -> bool;
}
