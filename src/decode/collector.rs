//! Output collector: pulls decoded pictures out of the accelerator and
//! publishes them on the ready queue.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::decode::buffer::{FieldParity, PictureBuffer};
use crate::decode::format::{
    aspect_ratio, copy_field_plane, copy_mode, copy_plane, derive_frame_rate, normalize_height,
    CopyMode, Rational,
};
use crate::device::{
    DecoderDevice, DeviceStatus, ProcOutput, OUT_FLAG_FMT_CHANGE, OUT_FLAG_PIB_VALID,
};
use crate::pipeline::SyncQueue;
use crate::DecoderConfig;

/// Active output format, updated on every device format-change event.
#[derive(Debug, Clone, Copy)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub aspect: (u16, u16),
    pub frame_rate: Rational,
    pub interlaced: bool,
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            aspect: (1, 1),
            frame_rate: Rational::default(),
            interlaced: false,
        }
    }
}

/// Consumer-side queues and the worker thread extracting device output.
///
/// Pictures move free pool -> collector -> ready queue -> consumer and
/// back to the free pool on release; the pool is discarded whenever the
/// format changes so a stale-size buffer can never carry a new picture.
pub struct OutputCollector {
    ready: Arc<SyncQueue<PictureBuffer>>,
    free: Arc<SyncQueue<PictureBuffer>>,
    format: Arc<Mutex<VideoFormat>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    output_timeout: Duration,
    format_change_timeout: Duration,
    idle_sleep: Duration,
}

impl OutputCollector {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            ready: Arc::new(SyncQueue::new()),
            free: Arc::new(SyncQueue::new()),
            format: Arc::new(Mutex::new(VideoFormat::default())),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            output_timeout: Duration::from_millis(config.output_timeout_ms),
            format_change_timeout: Duration::from_millis(config.format_change_timeout_ms),
            idle_sleep: Duration::from_millis(config.idle_sleep_ms),
        }
    }

    /// Spawn the worker thread against `device`.
    pub fn start(&mut self, device: Arc<dyn DecoderDevice>) -> io::Result<()> {
        let worker = CollectorWorker {
            device,
            ready: Arc::clone(&self.ready),
            free: Arc::clone(&self.free),
            format: Arc::clone(&self.format),
            stop: Arc::clone(&self.stop),
            idle_sleep: self.idle_sleep,
            output_timeout: self.output_timeout,
            format_change_timeout: self.format_change_timeout,
            width: 0,
            height: 0,
            last_timestamp: 0,
            interlaced: false,
            frame_rate: Rational::default(),
        };
        let handle = thread::Builder::new()
            .name("helios-output".into())
            .spawn(move || worker.run())?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Next decoded picture in presentation order, if any is ready.
    pub fn next_picture(&self) -> Option<PictureBuffer> {
        self.ready.pop()
    }

    /// Return a consumed picture to the free pool. Contents are not
    /// zeroed; the next fill overwrites them.
    pub fn free_buffer(&self, buffer: PictureBuffer) {
        self.free.push(buffer);
    }

    /// Discard undisplayed pictures, recycling their buffers.
    pub fn flush(&self) {
        while let Some(buffer) = self.ready.pop() {
            self.free.push(buffer);
        }
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn video_format(&self) -> VideoFormat {
        *self.format.lock().unwrap()
    }

    /// Signal the worker and join it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OutputCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CollectorWorker {
    device: Arc<dyn DecoderDevice>,
    ready: Arc<SyncQueue<PictureBuffer>>,
    free: Arc<SyncQueue<PictureBuffer>>,
    format: Arc<Mutex<VideoFormat>>,
    stop: Arc<AtomicBool>,
    idle_sleep: Duration,
    output_timeout: Duration,
    format_change_timeout: Duration,
    width: u32,
    height: u32,
    last_timestamp: u64,
    interlaced: bool,
    frame_rate: Rational,
}

impl CollectorWorker {
    fn run(mut self) {
        debug!("output collector started");
        while !self.stop.load(Ordering::Relaxed) {
            let mut got_picture = false;
            if let Ok(status) = self.device.driver_status() {
                if status.ready_list_count > 0 {
                    got_picture = self.collect_one();
                }
            }
            if !got_picture {
                thread::sleep(self.idle_sleep);
            }
        }
        debug!("output collector stopped");
    }

    /// One extraction attempt; true when a picture reached the ready queue.
    fn collect_one(&mut self) -> bool {
        let out = self.device.fetch_output(self.output_timeout);
        match out.status {
            DeviceStatus::Success => {
                let mut got_picture = false;
                if out.flags & OUT_FLAG_PIB_VALID != 0 {
                    let timestamp = out.picture_info.timestamp;
                    if timestamp != 0 && timestamp != self.last_timestamp {
                        self.last_timestamp = timestamp;
                        if let Some(buffer) = self.fill_picture(&out) {
                            self.ready.push(buffer);
                            got_picture = true;
                        }
                    }
                    // duplicate or zero timestamp: silently discarded
                }
                self.device.release_output_buffers();
                got_picture
            }
            DeviceStatus::NoData => false,
            DeviceStatus::FormatChange => {
                self.on_format_change(&out);
                false
            }
            status => {
                debug!(?status, "output fetch yielded no picture");
                false
            }
        }
    }

    /// Recycle or allocate a buffer and copy the planes in.
    fn fill_picture(&mut self, out: &ProcOutput) -> Option<PictureBuffer> {
        if self.width == 0 || self.height == 0 {
            warn!("picture before any format information, dropping");
            return None;
        }

        let mut buffer = loop {
            match self.free.pop() {
                Some(buffer)
                    if buffer.width() == self.width && buffer.height() == self.height =>
                {
                    break buffer;
                }
                Some(_) => {
                    // stale generation, never reuse across a resolution change
                    debug!("discarding wrong-size pooled buffer");
                }
                None => {
                    debug!(
                        ready = self.ready.len(),
                        "free pool empty, allocating a picture buffer"
                    );
                    break PictureBuffer::new(self.width, self.height);
                }
            }
        };

        buffer.field = FieldParity::Full;
        buffer.interlaced = self.interlaced;
        buffer.frame_rate = self.frame_rate;
        buffer.timestamp = out.picture_info.timestamp;
        buffer.picture_number = out.picture_info.picture_number;

        let width = self.width as usize;
        let height = self.height as usize;

        match copy_mode(self.width) {
            CopyMode::Packed if self.interlaced => {
                // half-height field from the device; parity comes from the
                // picture-number oddity as the field flags are not reported
                let parity = FieldParity::from_picture_number(buffer.picture_number);
                buffer.field = parity;
                copy_field_plane(buffer.luma_mut(), &out.luma, width, height / 2, parity);
                copy_field_plane(buffer.chroma_mut(), &out.chroma, width, height / 4, parity);
            }
            mode => {
                copy_plane(buffer.luma_mut(), &out.luma, width, height, mode);
                copy_plane(buffer.chroma_mut(), &out.chroma, width, height / 2, mode);
            }
        }

        Some(buffer)
    }

    fn on_format_change(&mut self, out: &ProcOutput) {
        debug!(flags = out.flags, "format change detected");
        if out.flags & OUT_FLAG_PIB_VALID == 0 || out.flags & OUT_FLAG_FMT_CHANGE == 0 {
            return;
        }
        let info = &out.picture_info;

        self.width = info.width;
        self.height = normalize_height(info.height);
        let aspect = aspect_ratio(info.aspect_ratio, info.custom_aspect_ratio_width_height);
        let (frame_rate, interlaced) = derive_frame_rate(info.frame_rate);
        self.frame_rate = frame_rate;
        self.interlaced = interlaced;

        // the device needs headroom to reconfigure before the next output
        self.output_timeout = self.format_change_timeout;

        // pooled buffers were sized for the previous format
        while self.free.pop().is_some() {}

        *self.format.lock().unwrap() = VideoFormat {
            width: self.width,
            height: self.height,
            aspect,
            frame_rate,
            interlaced,
        };
        info!(
            width = self.width,
            height = self.height,
            aspect_x = aspect.0,
            aspect_y = aspect.1,
            rate = %frame_rate,
            interlaced,
            "video format changed"
        );
    }
}
