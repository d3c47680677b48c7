use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use super::Output;
use crate::consumer::FrameConsumer;
use crate::format::{PixelFormat, VideoFormat};
use crate::frame::{Picture, PicturePlane, VideoFrame, duplicate};

enum SendBehavior {
    Accept,
    Reject,
    Fail,
}

struct MockConsumer {
    index: i32,
    behavior: SendBehavior,
    sync_clock: bool,
    fail_first_init: bool,
    fail_reinit: bool,
    inits: Mutex<Vec<(VideoFormat, i32)>>,
    sent: AtomicUsize,
}

impl MockConsumer {
    fn new(index: i32) -> Self {
        Self {
            index,
            behavior: SendBehavior::Accept,
            sync_clock: false,
            fail_first_init: false,
            fail_reinit: false,
            inits: Mutex::new(Vec::new()),
            sent: AtomicUsize::new(0),
        }
    }

    fn behavior(mut self, behavior: SendBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn with_sync_clock(mut self) -> Self {
        self.sync_clock = true;
        self
    }

    fn failing_init(mut self) -> Self {
        self.fail_first_init = true;
        self
    }

    fn failing_reinit(mut self) -> Self {
        self.fail_reinit = true;
        self
    }

    fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl FrameConsumer for MockConsumer {
    fn index(&self) -> i32 {
        self.index
    }

    fn initialize(&self, format: &VideoFormat, channel_index: i32) -> anyhow::Result<()> {
        let mut inits = self.inits.lock().unwrap();
        inits.push((*format, channel_index));
        if self.fail_first_init {
            anyhow::bail!("consumer {} refused to initialize", self.index);
        }
        if self.fail_reinit && inits.len() > 1 {
            anyhow::bail!("consumer {} cannot switch formats", self.index);
        }
        Ok(())
    }

    async fn send(&self, _frame: VideoFrame) -> anyhow::Result<bool> {
        self.sent.fetch_add(1, Ordering::Relaxed);
        match self.behavior {
            SendBehavior::Accept => Ok(true),
            SendBehavior::Reject => Ok(false),
            SendBehavior::Fail => anyhow::bail!("consumer {} device lost", self.index),
        }
    }

    fn state(&self) -> serde_json::Value {
        json!({ "index": self.index, "sent": self.sent() })
    }

    fn has_synchronization_clock(&self) -> bool {
        self.sync_clock
    }
}

fn test_format() -> VideoFormat {
    VideoFormat::new(4, 2, 50.0, PixelFormat::Gray)
}

fn test_frame(width: u32, height: u32) -> VideoFrame {
    duplicate(&Picture {
        width,
        height,
        pixel_format: PixelFormat::Gray,
        interlaced: false,
        repeat_field: false,
        planes: vec![PicturePlane {
            data: vec![0; (width * height) as usize],
            linesize: width as usize,
        }],
    })
    .unwrap()
}

#[tokio::test]
async fn absent_frame_is_a_no_op() {
    let format = test_format();
    let output = Output::new(format, 0);
    let consumer = Arc::new(MockConsumer::new(1));
    output.add(1, consumer.clone()).unwrap();

    output.dispatch(None, &format).await;

    assert_eq!(consumer.sent(), 0);
    assert!(output.state().is_empty());
}

#[tokio::test]
async fn mismatched_frame_size_never_reaches_consumers() {
    let _ = env_logger::builder().is_test(true).try_init();

    let format = test_format();
    let output = Output::new(format, 0);
    let consumer = Arc::new(MockConsumer::new(1));
    output.add(1, consumer.clone()).unwrap();

    output.dispatch(Some(test_frame(8, 4)), &format).await;

    assert_eq!(consumer.sent(), 0);
}

#[tokio::test]
async fn format_change_reinitializes_consumers_before_delivery() {
    let format = test_format();
    let output = Output::new(format, 7);
    let good = Arc::new(MockConsumer::new(1));
    let bad = Arc::new(MockConsumer::new(2).failing_reinit());
    output.add(1, good.clone()).unwrap();
    output.add(2, bad.clone()).unwrap();

    // The reconfiguration tick delivers nothing; the frame still has the
    // previously configured size.
    let new_format = VideoFormat::new(8, 4, 25.0, PixelFormat::Gray);
    output.dispatch(Some(test_frame(4, 2)), &new_format).await;

    assert_eq!(good.sent(), 0);
    assert_eq!(bad.sent(), 0);
    {
        let inits = good.inits.lock().unwrap();
        assert_eq!(inits.len(), 2);
        assert_eq!(inits[0], (format, 7)); // registration: channel index
        assert_eq!(inits[1], (new_format, 1)); // format change: port index
    }

    // Only the survivor sees the next tick.
    output.dispatch(Some(test_frame(8, 4)), &new_format).await;
    assert_eq!(good.sent(), 1);
    assert_eq!(bad.sent(), 0);
}

#[tokio::test]
async fn rejecting_and_failing_consumers_are_evicted() {
    let _ = env_logger::builder().is_test(true).try_init();

    let format = test_format();
    let output = Output::new(format, 0);
    let accepting = Arc::new(MockConsumer::new(0));
    let rejecting = Arc::new(MockConsumer::new(1).behavior(SendBehavior::Reject));
    let failing = Arc::new(MockConsumer::new(2).behavior(SendBehavior::Fail));
    output.add(0, accepting.clone()).unwrap();
    output.add(1, rejecting.clone()).unwrap();
    output.add(2, failing.clone()).unwrap();

    output.dispatch(Some(test_frame(4, 2)), &format).await;

    // All three were sent to once, then two were evicted.
    assert_eq!(accepting.sent(), 1);
    assert_eq!(rejecting.sent(), 1);
    assert_eq!(failing.sent(), 1);

    let state = output.state();
    assert_eq!(state.len(), 1);
    assert_eq!(state["port/0"], json!({ "index": 0, "sent": 1 }));

    output.dispatch(Some(test_frame(4, 2)), &format).await;
    assert_eq!(accepting.sent(), 2);
    assert_eq!(rejecting.sent(), 1);
    assert_eq!(failing.sent(), 1);
}

#[tokio::test(start_paused = true)]
async fn paces_to_frame_rate_without_a_synchronization_clock() {
    let format = test_format(); // 50 fps
    let output = Output::new(format, 0);
    output.add(1, Arc::new(MockConsumer::new(1))).unwrap();

    let start = Instant::now();
    for _ in 0..3 {
        output.dispatch(Some(test_frame(4, 2)), &format).await;
    }

    // First tick only records the deadline; the next two wait a period
    // each: 1_000_000 / 50 = 20_000 us.
    assert!(start.elapsed() >= Duration::from_micros(40_000));
}

#[tokio::test(start_paused = true)]
async fn synchronized_consumer_disables_pacing() {
    let format = test_format();
    let output = Output::new(format, 0);
    output
        .add(1, Arc::new(MockConsumer::new(1).with_sync_clock()))
        .unwrap();

    let start = Instant::now();
    for _ in 0..3 {
        output.dispatch(Some(test_frame(4, 2)), &format).await;
    }

    assert!(start.elapsed() < Duration::from_micros(20_000));
}

#[tokio::test(start_paused = true)]
async fn paces_even_with_an_empty_registry() {
    let format = test_format();
    let output = Output::new(format, 0);

    let start = Instant::now();
    output.dispatch(Some(test_frame(4, 2)), &format).await;
    output.dispatch(Some(test_frame(4, 2)), &format).await;

    assert!(start.elapsed() >= Duration::from_micros(20_000));
}

#[tokio::test]
async fn add_replaces_the_existing_consumer_at_an_index() {
    let format = test_format();
    let output = Output::new(format, 0);
    let first = Arc::new(MockConsumer::new(5));
    let second = Arc::new(MockConsumer::new(5));
    output.add(5, first.clone()).unwrap();
    output.add(5, second.clone()).unwrap();

    output.dispatch(Some(test_frame(4, 2)), &format).await;

    assert_eq!(first.sent(), 0);
    assert_eq!(second.sent(), 1);
}

#[tokio::test]
async fn failed_initialize_is_not_registered() {
    let format = test_format();
    let output = Output::new(format, 0);
    let bad = Arc::new(MockConsumer::new(6).failing_init());

    assert!(output.add(6, bad.clone()).is_err());

    output.dispatch(Some(test_frame(4, 2)), &format).await;
    assert_eq!(bad.sent(), 0);
    assert!(output.state().is_empty());
}

#[tokio::test]
async fn add_consumer_uses_its_own_index_and_remove_unregisters() {
    let format = test_format();
    let output = Output::new(format, 0);
    let consumer = Arc::new(MockConsumer::new(3));
    output.add_consumer(consumer.clone()).unwrap();

    output.dispatch(Some(test_frame(4, 2)), &format).await;
    assert_eq!(consumer.sent(), 1);
    assert!(output.state().contains_key("port/3"));

    let dyn_consumer: Arc<dyn FrameConsumer> = consumer.clone();
    output.remove_consumer(&dyn_consumer);
    output.dispatch(Some(test_frame(4, 2)), &format).await;
    assert_eq!(consumer.sent(), 1);
    assert!(output.state().is_empty());
}
