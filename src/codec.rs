use crate::frame::Picture;

/// Boundary to the external bitstream codec. One session decodes one
/// elementary video stream; the session owns the buffers behind the
/// pictures it returns and reuses them on the next call.
pub trait VideoCodec: Send {
    /// Long codec name, for logging.
    fn name(&self) -> &str;

    /// Stream width from the codec parameters.
    fn width(&self) -> u32;

    /// Stream height from the codec parameters.
    fn height(&self) -> u32;

    /// Stream frame rate.
    fn fps(&self) -> f64;

    /// Whether the codec holds frames internally (reference-frame delay)
    /// and must be drained with empty packets before a flush.
    fn has_delay(&self) -> bool;

    /// Submits one access unit. `Ok(None)` means the codec kept the data
    /// buffered and no picture is ready yet; that is not an error. A
    /// zero-length `data` is the drain packet. The returned picture is
    /// valid only until the next call on this session.
    fn decode(&mut self, data: &[u8]) -> anyhow::Result<Option<&Picture>>;

    /// Resets internal codec state, dropping any buffered pictures.
    fn flush(&mut self);
}
