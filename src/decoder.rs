use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::codec::VideoCodec;
use crate::frame::{Picture, VideoEvent, VideoEventReceiver, VideoEventSender, duplicate};
use crate::packet::{Packet, PacketReceiver, Ticket};

/// Owns one codec session for one elementary stream.
pub struct Decoder {
    codec: Box<dyn VideoCodec>,
    stream_index: usize,
    fps: f64,
    width: u32,
    height: u32,
}

impl Decoder {
    pub fn new(codec: Box<dyn VideoCodec>, stream_index: usize) -> anyhow::Result<Self> {
        if codec.width() == 0 || codec.height() == 0 {
            return Err(anyhow::anyhow!("missing codec parameters"));
        }
        log::debug!("[video_decoder] {}", codec.name());

        let fps = codec.fps();
        let width = codec.width();
        let height = codec.height();
        Ok(Self {
            codec,
            stream_index,
            fps,
            width,
            height,
        })
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn has_delay(&self) -> bool {
        self.codec.has_delay()
    }

    fn flush(&mut self) {
        self.codec.flush();
    }

    /// Submits one access unit; `None` when the codec kept it buffered.
    fn decode(&mut self, data: &[u8]) -> anyhow::Result<Option<&Picture>> {
        let picture = match self.codec.decode(data)? {
            Some(picture) => picture,
            None => return Ok(None),
        };

        if picture.repeat_field {
            log::warn!("[video_decoder] field repeat_pict not implemented");
        }

        Ok(Some(picture))
    }
}

/// Runs a [`Decoder`] on its own blocking task, fed by a stream-index
/// filter over the shared packet feed. Emits [`VideoEvent`]s and always
/// ends with exactly one `Eof`, after which the worker is terminated
/// permanently.
pub struct VideoDecodeTask {
    chan: VideoEventSender,
    progressive: Arc<AtomicBool>,
    join: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl VideoDecodeTask {
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(1024);

        Self {
            chan: sender,
            progressive: Arc::new(AtomicBool::new(true)),
            join: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> VideoEventReceiver {
        self.chan.subscribe()
    }

    /// Subscribes and adapts the event feed into a `Stream`.
    pub fn event_stream(&self) -> impl Stream<Item = VideoEvent> + Send + use<> {
        BroadcastStream::new(self.subscribe()).filter_map(|event| async move { event.ok() })
    }

    /// Whether the last decoded frame was progressive.
    pub fn is_progressive(&self) -> bool {
        self.progressive.load(Ordering::Relaxed)
    }

    pub async fn start(&self, decoder: Decoder, mut packet_receiver: PacketReceiver) {
        let sender = self.chan.clone();
        let progressive = self.progressive.clone();

        let handle = tokio::spawn(async move {
            let (packet_tx, packet_rx) = std::sync::mpsc::channel::<Packet>();
            let stream_index = decoder.stream_index();

            let worker = tokio::task::spawn_blocking(move || {
                Self::decoder_loop(decoder, packet_rx, sender, progressive)
            });

            loop {
                match packet_receiver.recv().await {
                    Ok(packet) => {
                        if packet.stream_index() != stream_index {
                            continue;
                        }
                        let eof = matches!(packet, Packet::Eof { .. });
                        let _ = packet_tx.send(packet);
                        if eof {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("[video_decoder] stream {}: lagged {} packets", stream_index, n);
                    }
                    // Upstream gone: the worker sees its channel close and
                    // finishes as if on eof.
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            drop(packet_tx);
            let _ = worker.await;
        });

        *self.join.lock().unwrap() = Some(handle);
    }

    /// Waits until the worker has observed eof (or hit a fatal decode
    /// error) and emitted its final event.
    pub async fn join(&self) {
        let handle = self.join.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn decoder_loop(
        mut decoder: Decoder,
        packet_rx: std::sync::mpsc::Receiver<Packet>,
        out: VideoEventSender,
        progressive: Arc<AtomicBool>,
    ) {
        if let Err(e) = Self::run(&mut decoder, &packet_rx, &out, &progressive) {
            log::error!(
                "[video_decoder] stream {}: {:#}",
                decoder.stream_index(),
                e
            );
        }

        // Exactly one final eof event, on every exit path.
        let _ = out.send(VideoEvent::Eof);
    }

    fn run(
        decoder: &mut Decoder,
        packet_rx: &std::sync::mpsc::Receiver<Packet>,
        out: &VideoEventSender,
        progressive: &AtomicBool,
    ) -> anyhow::Result<()> {
        while let Ok(packet) = packet_rx.recv() {
            match packet {
                Packet::Data { data, ticket, .. } => {
                    let picture = match decoder.decode(&data)? {
                        Some(picture) => picture,
                        // Partial consumption, the codec buffered the data.
                        None => continue,
                    };
                    progressive.store(!picture.interlaced, Ordering::Relaxed);
                    let frame = duplicate(picture)?;
                    let _ = out.send(VideoEvent::Frame(frame, ticket));
                }
                Packet::Loop { ticket, .. } => {
                    if decoder.has_delay() {
                        while let Some(picture) = decoder.decode(&[])? {
                            let frame = duplicate(picture)?;
                            let _ = out.send(VideoEvent::Frame(frame, ticket));
                        }
                    }
                    decoder.flush();
                    let _ = out.send(VideoEvent::Loop(Ticket::default()));
                }
                Packet::Eof { .. } => break,
            }
        }
        Ok(())
    }
}

impl Default for VideoDecodeTask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
