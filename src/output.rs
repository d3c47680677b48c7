use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::time::{Instant, sleep_until};

use crate::consumer::FrameConsumer;
use crate::format::VideoFormat;
use crate::frame::VideoFrame;

/// Fans decoded frames out to a dynamic set of consumers, one tick per
/// frame. Re-initializes consumers on format change, evicts failing ones,
/// aggregates their diagnostic state and paces delivery to the frame rate
/// when no consumer synchronizes itself.
///
/// `add`/`remove` may be called from control threads at any time;
/// [`dispatch`](Output::dispatch) must be driven strictly sequentially
/// from a single real-time driver.
pub struct Output {
    channel_index: i32,
    format: Mutex<VideoFormat>,
    consumers: Mutex<HashMap<i32, Arc<dyn FrameConsumer>>>,
    state: Mutex<HashMap<String, serde_json::Value>>,
    deadline: Mutex<Option<Instant>>,
}

impl Output {
    pub fn new(format: VideoFormat, channel_index: i32) -> Self {
        Self {
            channel_index,
            format: Mutex::new(format),
            consumers: Mutex::new(HashMap::new()),
            state: Mutex::new(HashMap::new()),
            deadline: Mutex::new(None),
        }
    }

    /// Registers `consumer` at `index`, replacing any existing consumer
    /// there. Initialization runs outside the registry lock; on failure
    /// the consumer is not registered and the error is returned.
    pub fn add(&self, index: i32, consumer: Arc<dyn FrameConsumer>) -> anyhow::Result<()> {
        self.remove(index);

        let format = *self.format.lock().unwrap();
        consumer.initialize(&format, self.channel_index)?;

        self.consumers.lock().unwrap().insert(index, consumer);
        Ok(())
    }

    /// Registers `consumer` at its own preferred index.
    pub fn add_consumer(&self, consumer: Arc<dyn FrameConsumer>) -> anyhow::Result<()> {
        self.add(consumer.index(), consumer)
    }

    pub fn remove(&self, index: i32) {
        self.consumers.lock().unwrap().remove(&index);
    }

    pub fn remove_consumer(&self, consumer: &Arc<dyn FrameConsumer>) {
        self.remove(consumer.index());
    }

    /// The aggregated diagnostic state from the last tick, keyed
    /// `"port/<index>"`.
    pub fn state(&self) -> HashMap<String, serde_json::Value> {
        self.state.lock().unwrap().clone()
    }

    /// One output tick.
    pub async fn dispatch(&self, frame: Option<VideoFrame>, format: &VideoFormat) {
        let Some(frame) = frame else {
            return;
        };

        let configured = *self.format.lock().unwrap();
        if frame.size() != configured.size() {
            log::warn!(
                "{} invalid input frame size {}, expected {}",
                self.print(),
                frame.size(),
                configured.size()
            );
            return;
        }

        let deadline = self.deadline.lock().unwrap().take();

        if configured != *format {
            // The format-change tick is consumed by reconfiguration, not
            // delivery; consumers whose initialize fails are evicted.
            let mut consumers = self.consumers.lock().unwrap();
            consumers.retain(|index, consumer| match consumer.initialize(format, *index) {
                Ok(()) => true,
                Err(e) => {
                    log::error!(
                        "{} consumer {} initialize failed: {:#}",
                        self.print(),
                        index,
                        e
                    );
                    false
                }
            });
            drop(consumers);
            *self.format.lock().unwrap() = *format;
            return;
        }

        // Point-in-time snapshot; the registry lock is never held across
        // a consumer call.
        let snapshot: Vec<(i32, Arc<dyn FrameConsumer>)> = {
            let consumers = self.consumers.lock().unwrap();
            consumers
                .iter()
                .map(|(index, consumer)| (*index, consumer.clone()))
                .collect()
        };

        // All sends are issued before any result is awaited, so one slow
        // or failing consumer does not gate delivery to the others.
        let sends = snapshot.iter().map(|(index, consumer)| {
            let frame = frame.clone();
            async move { (*index, consumer.send(frame).await) }
        });
        for (index, result) in join_all(sends).await {
            match result {
                Ok(true) => {}
                Ok(false) => self.remove(index),
                Err(e) => {
                    log::error!("{} consumer {} send failed: {:#}", self.print(), index, e);
                    self.remove(index);
                }
            }
        }

        let survivors: Vec<(i32, Arc<dyn FrameConsumer>)> = {
            let consumers = self.consumers.lock().unwrap();
            consumers
                .iter()
                .map(|(index, consumer)| (*index, consumer.clone()))
                .collect()
        };

        let mut state = HashMap::new();
        for (index, consumer) in &survivors {
            state.insert(format!("port/{}", index), consumer.state());
        }
        *self.state.lock().unwrap() = state;

        // A consumer with its own synchronization clock blocks at the
        // real-time rate inside send; pacing here on top of that would
        // double-pace. Without one, this is the only rate governor.
        let needs_sync = survivors
            .iter()
            .all(|(_, consumer)| !consumer.has_synchronization_clock());

        if needs_sync {
            let base = match deadline {
                Some(deadline) => {
                    sleep_until(deadline).await;
                    deadline
                }
                None => Instant::now(),
            };
            let period = Duration::from_micros((1_000_000.0 / configured.fps) as u64);
            *self.deadline.lock().unwrap() = Some(base + period);
        }
    }

    fn print(&self) -> String {
        format!("output[{}]", self.channel_index)
    }
}

#[cfg(test)]
#[path = "output_test.rs"]
mod output_test;
