//! Run any channel output on a dedicated worker thread
//!
//! The dispatch thread hands frames over through a capacity-1 channel and
//! never blocks on transport I/O. If the worker has not picked up the pending
//! frame yet, the pending frame is evicted and replaced, so the worker always
//! transmits the newest snapshot and never works through a backlog.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::ChannelOutput;
use crate::error::{OutputError, Result};
use crate::frame::{ChannelRange, Frame};

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

pub struct ThreadedOutput {
    name: String,
    /// The driver until `init` hands it to the worker
    inner: Option<Box<dyn ChannelOutput>>,
    range: ChannelRange,
    channel_count: usize,
    description: String,
    sender: Option<Sender<Frame>>,
    /// Second handle on the queue, used only to evict a stale pending frame
    evict: Option<Receiver<Frame>>,
    frames_sent: Arc<AtomicU64>,
    frames_dropped: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    worker_handle: Option<thread::JoinHandle<()>>,
}

impl ThreadedOutput {
    pub fn new(inner: Box<dyn ChannelOutput>) -> Self {
        ThreadedOutput {
            name: inner.name().to_string(),
            range: ChannelRange::EMPTY,
            channel_count: inner.channel_count(),
            description: String::new(),
            inner: Some(inner),
            sender: None,
            evict: None,
            frames_sent: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            worker_handle: None,
        }
    }

    /// Frames the driver accepted; frames it dropped itself are not counted
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Frames replaced before the worker picked them up
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

impl ChannelOutput for ThreadedOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, config: &serde_json::Value) -> Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Err(OutputError::config(format!("{}: already initialized", self.name)));
        };

        if let Err(e) = inner.init(config) {
            self.inner = Some(inner);
            return Err(e);
        }

        self.range = inner.required_channel_range();
        self.channel_count = inner.channel_count();
        self.description = inner.dump_config();

        let (sender, receiver) = crossbeam_channel::bounded::<Frame>(1);
        self.running.store(true, Ordering::Relaxed);

        let worker_receiver = receiver.clone();
        let running = Arc::clone(&self.running);
        let frames_sent = Arc::clone(&self.frames_sent);
        let handle = thread::Builder::new()
            .name(format!("output-{}", self.name))
            .spawn(move || worker_thread(inner, worker_receiver, frames_sent, running))
            .map_err(|e| OutputError::open(format!("{} worker", self.name), e))?;

        self.evict = Some(receiver);
        self.sender = Some(sender);
        self.worker_handle = Some(handle);

        tracing::debug!("{} worker started", self.name);
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> usize {
        let Some(sender) = &self.sender else {
            return 0;
        };

        match sender.try_send(frame.clone()) {
            Ok(()) => self.channel_count,
            Err(TrySendError::Full(frame)) => {
                // Replace the stale pending frame with this one
                if let Some(evict) = &self.evict {
                    if evict.try_recv().is_ok() {
                        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                match sender.try_send(frame) {
                    Ok(()) => self.channel_count,
                    Err(_) => {
                        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        0
                    }
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("{} worker has exited, frame dropped", self.name);
                0
            }
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        // Stop accepting frames before the worker releases the transport
        self.sender = None;
        self.evict = None;

        if let Some(handle) = self.worker_handle.take() {
            if handle.join().is_err() {
                tracing::error!("{} worker panicked", self.name);
            }
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.close();
        }
    }

    fn required_channel_range(&self) -> ChannelRange {
        match &self.inner {
            Some(inner) => inner.required_channel_range(),
            None => self.range,
        }
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn dump_config(&self) -> String {
        let description = match &self.inner {
            Some(inner) => inner.dump_config(),
            None => self.description.clone(),
        };
        format!(
            "{}\n    threaded: {} frames sent, {} dropped",
            description,
            self.frames_sent(),
            self.frames_dropped()
        )
    }
}

impl Drop for ThreadedOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Worker loop - waits for the newest frame and hands it to the driver
fn worker_thread(
    mut output: Box<dyn ChannelOutput>,
    receiver: Receiver<Frame>,
    frames_sent: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(frame) => {
                if output.send_frame(&frame) > 0 {
                    frames_sent.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    output.close();
    tracing::debug!("{} worker stopped", output.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Records frames; optionally stalls on the first one until released
    struct Recorder {
        seen: Arc<Mutex<Vec<u8>>>,
        gate: Arc<Mutex<()>>,
        closed: Arc<AtomicBool>,
        fail_init: bool,
    }

    impl ChannelOutput for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn init(&mut self, _config: &serde_json::Value) -> Result<()> {
            if self.fail_init {
                return Err(OutputError::config("nope"));
            }
            Ok(())
        }
        fn send_frame(&mut self, frame: &Frame) -> usize {
            let _gate = self.gate.lock().unwrap();
            self.seen.lock().unwrap().push(frame.first().copied().unwrap_or(0));
            frame.len()
        }
        fn close(&mut self) {
            self.closed.store(true, Ordering::Relaxed);
        }
        fn required_channel_range(&self) -> ChannelRange {
            ChannelRange::span(0, 1)
        }
        fn channel_count(&self) -> usize {
            1
        }
        fn dump_config(&self) -> String {
            "recorder".to_string()
        }
    }

    fn recorder(fail_init: bool) -> (Recorder, Arc<Mutex<Vec<u8>>>, Arc<Mutex<()>>, Arc<AtomicBool>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Mutex::new(()));
        let closed = Arc::new(AtomicBool::new(false));
        let r = Recorder {
            seen: Arc::clone(&seen),
            gate: Arc::clone(&gate),
            closed: Arc::clone(&closed),
            fail_init,
        };
        (r, seen, gate, closed)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_latest_frame_wins() {
        let (r, seen, gate, closed) = recorder(false);
        let mut out = ThreadedOutput::new(Box::new(r));
        out.init(&serde_json::Value::Null).unwrap();

        // Stall the worker inside the driver on frame 1
        let held = gate.lock().unwrap();
        assert_eq!(out.send_frame(&Frame::from(vec![1])), 1);
        wait_for(|| out.evict.as_ref().unwrap().is_empty());

        // 2 is pending, 3 replaces it, 4 replaces 3
        for value in [2, 3, 4] {
            out.send_frame(&Frame::from(vec![value]));
        }
        drop(held);

        wait_for(|| seen.lock().unwrap().len() == 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 4]);
        assert_eq!(out.frames_dropped(), 2);

        out.close();
        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(out.frames_sent(), 2);
        assert!(out.dump_config().contains("2 frames sent"));
    }

    #[test]
    fn test_frames_the_driver_drops_are_not_counted_as_sent() {
        let (r, seen, _gate, _closed) = recorder(false);
        let mut out = ThreadedOutput::new(Box::new(r));
        out.init(&serde_json::Value::Null).unwrap();

        // An empty frame is handled as 0 channels by the driver
        out.send_frame(&Frame::from(Vec::<u8>::new()));
        wait_for(|| seen.lock().unwrap().len() == 1);
        out.send_frame(&Frame::from(vec![5]));
        wait_for(|| seen.lock().unwrap().len() == 2);

        out.close();
        assert_eq!(out.frames_sent(), 1);
        assert!(out.dump_config().contains("1 frames sent"));
    }

    #[test]
    fn test_failed_init_keeps_driver_and_close_is_safe() {
        let (r, _seen, _gate, closed) = recorder(true);
        let mut out = ThreadedOutput::new(Box::new(r));
        assert!(out.init(&serde_json::Value::Null).is_err());
        assert_eq!(out.send_frame(&Frame::from(vec![1])), 0);
        out.close();
        out.close();
        assert!(closed.load(Ordering::Relaxed));
    }

    #[test]
    fn test_close_twice_after_running() {
        let (r, seen, _gate, _closed) = recorder(false);
        let mut out = ThreadedOutput::new(Box::new(r));
        out.init(&serde_json::Value::Null).unwrap();
        out.send_frame(&Frame::from(vec![7]));
        wait_for(|| !seen.lock().unwrap().is_empty());
        out.close();
        out.close();
        assert_eq!(out.send_frame(&Frame::from(vec![8])), 0);
        assert_eq!(out.required_channel_range(), ChannelRange::span(0, 1));
    }
}
