//! Real-time video pipeline stage: decodes one elementary video stream on a
//! dedicated worker and fans each produced frame out to a dynamic set of
//! output consumers, pacing delivery to wall-clock frame rate when no
//! consumer paces itself.

pub mod codec;
pub mod consumer;
pub mod decoder;
pub mod format;
pub mod frame;
pub mod output;
pub mod packet;
