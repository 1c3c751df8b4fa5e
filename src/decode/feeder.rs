//! Input feeder: drains the pending-packet queue into the accelerator.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::decode::buffer::{pack_pts, DecodeBuffer};
use crate::device::{DecoderDevice, DeviceStatus};
use crate::pipeline::SyncQueue;
use crate::DecoderConfig;

/// Producer-side valve and worker thread feeding the device.
///
/// `add_input` is called from the demux/producer thread; the worker thread
/// polls the pending queue and submits against the device's internal ready
/// list. Submission is at-least-once with no reordering: a `Busy` packet is
/// retried, never dropped.
pub struct InputFeeder {
    pending: Arc<SyncQueue<DecodeBuffer>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    limit: usize,
    watermark: u32,
    idle_sleep: Duration,
}

impl InputFeeder {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            pending: Arc::new(SyncQueue::new()),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            limit: config.input_queue_limit,
            watermark: config.device_ready_watermark,
            idle_sleep: Duration::from_millis(config.idle_sleep_ms),
        }
    }

    /// Spawn the worker thread against `device`.
    pub fn start(&mut self, device: Arc<dyn DecoderDevice>) -> io::Result<()> {
        let worker = FeederWorker {
            device,
            pending: Arc::clone(&self.pending),
            stop: Arc::clone(&self.stop),
            watermark: self.watermark,
            idle_sleep: self.idle_sleep,
        };
        let handle = thread::Builder::new()
            .name("helios-input".into())
            .spawn(move || worker.run())?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Queue one compressed packet. Rejects with no side effect while the
    /// backpressure valve is closed.
    pub fn add_input(&self, data: &[u8], pts: f64) -> bool {
        if self.pending.len() >= self.limit {
            return false;
        }
        let mut buffer = DecodeBuffer::from_slice(data);
        buffer.set_pts(pack_pts(pts));
        self.pending.push(buffer);
        true
    }

    /// Drop every pending packet. Safe alongside the running worker.
    pub fn flush(&self) {
        while self.pending.pop().is_some() {}
    }

    pub fn input_count(&self) -> usize {
        self.pending.len()
    }

    /// Signal the worker, join it, and drop whatever it left queued.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.flush();
    }
}

impl Drop for InputFeeder {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FeederWorker {
    device: Arc<dyn DecoderDevice>,
    pending: Arc<SyncQueue<DecodeBuffer>>,
    stop: Arc<AtomicBool>,
    watermark: u32,
    idle_sleep: Duration,
}

impl FeederWorker {
    fn run(self) {
        debug!("input feeder started");
        let mut in_flight: Option<DecodeBuffer> = None;

        while !self.stop.load(Ordering::Relaxed) {
            if in_flight.is_none() {
                in_flight = self.pending.pop();
            }
            let Some(buffer) = in_flight.as_ref() else {
                thread::sleep(self.idle_sleep);
                continue;
            };

            match self.device.driver_status() {
                Ok(status) if status.ready_list_count <= self.watermark => {
                    match self.device.submit_input(buffer.as_slice(), buffer.pts()) {
                        DeviceStatus::Success => {
                            in_flight = None;
                        }
                        DeviceStatus::Busy => {
                            debug!("device input queue full, retrying same packet");
                            thread::sleep(self.idle_sleep);
                        }
                        status => {
                            warn!(?status, "input submission rejected, retrying");
                            thread::sleep(self.idle_sleep);
                        }
                    }
                }
                Ok(_) => {
                    // device ready list above the watermark, hold input back
                    thread::sleep(self.idle_sleep);
                }
                Err(status) => {
                    debug!(?status, "driver status unavailable");
                    thread::sleep(self.idle_sleep);
                }
            }
        }
        debug!("input feeder stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::buffer::unpack_pts;
    use crate::device::sim::SimDevice;
    use std::time::Instant;

    fn test_config() -> DecoderConfig {
        DecoderConfig {
            idle_sleep_ms: 1,
            ..crate::Config::default().decoder
        }
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        done()
    }

    #[test]
    fn valve_rejects_at_limit_and_reopens() {
        // no worker thread: the valve is purely queue-length driven
        let feeder = InputFeeder::new(&test_config());
        let packet = [0u8; 32];

        for i in 0..75 {
            assert!(feeder.add_input(&packet, i as f64), "packet {i} rejected");
        }
        assert!(!feeder.add_input(&packet, 75.0));
        assert_eq!(feeder.input_count(), 75);

        feeder.flush();
        assert_eq!(feeder.input_count(), 0);
        assert!(feeder.add_input(&packet, 76.0));
    }

    #[test]
    fn fifo_order_survives_busy_retries() {
        let device = Arc::new(SimDevice::ready());
        device.script_submit([
            DeviceStatus::Busy,
            DeviceStatus::Success,
            DeviceStatus::Busy,
            DeviceStatus::Busy,
            DeviceStatus::Success,
        ]);

        let mut feeder = InputFeeder::new(&test_config());
        let pts: Vec<f64> = (1..=5).map(|i| i as f64 + 0.5).collect();
        for &p in &pts {
            assert!(feeder.add_input(&[1, 2, 3], p));
        }
        feeder.start(device.clone() as Arc<dyn DecoderDevice>).unwrap();

        assert!(wait_until(Duration::from_secs(2), || device.submitted().len() == 5));
        let submitted: Vec<f64> = device.submitted().iter().map(|&p| unpack_pts(p)).collect();
        assert_eq!(submitted, pts);
    }

    #[test]
    fn watermark_holds_input_back() {
        let device = Arc::new(SimDevice::ready());
        device.set_ready_override(Some(99));

        let mut feeder = InputFeeder::new(&test_config());
        feeder.add_input(&[0u8; 8], 1.0);
        feeder.start(device.clone() as Arc<dyn DecoderDevice>).unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(device.submitted().is_empty());

        device.set_ready_override(Some(0));
        assert!(wait_until(Duration::from_secs(2), || device.submitted().len() == 1));
    }

    #[test]
    fn stop_drains_leftovers() {
        let device = Arc::new(SimDevice::ready());
        device.set_ready_override(Some(99));

        let mut feeder = InputFeeder::new(&test_config());
        for i in 0..10 {
            feeder.add_input(&[0u8; 8], i as f64);
        }
        feeder.start(device as Arc<dyn DecoderDevice>).unwrap();
        feeder.stop();
        assert_eq!(feeder.input_count(), 0);
    }
}
