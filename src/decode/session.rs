//! Decoder session: device lifecycle, worker coordination and the
//! consumer-facing picture contract.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::decode::buffer::{unpack_pts, FieldParity, PictureBuffer, PixelFormat};
use crate::decode::collector::{OutputCollector, VideoFormat};
use crate::decode::feeder::InputFeeder;
use crate::decode::format::Rational;
use crate::device::{
    Algorithm, DecoderDevice, DeviceStatus, OpenMode, StreamType, VideoParams, DEFAULT_RATE_HINT,
};
use crate::DecoderConfig;

/// Compressed formats the caller may ask for. Only the algorithms the
/// accelerator implements can be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Vc1,
    H264,
    Mpeg2,
    Mpeg4,
    H263,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("decoding accelerator is not open")]
    DeviceNotOpen,
    #[error("codec {0:?} is not supported by the accelerator")]
    UnsupportedCodec(Codec),
    #[error("failed to open device decoder: {0:?}")]
    OpenDecoder(DeviceStatus),
    #[error("failed to set video parameters: {0:?}")]
    VideoParams(DeviceStatus),
    #[error("failed to start decoder: {0:?}")]
    StartDecoder(DeviceStatus),
    #[error("failed to start capture: {0:?}")]
    StartCapture(DeviceStatus),
    #[error("failed to spawn worker thread")]
    Thread(#[from] std::io::Error),
}

/// Caller-owned view of one decoded picture.
///
/// The underlying buffer sits on the session's busy list until
/// `clear_busy_list` or `close` recycles it; the view stays valid for as
/// long as the caller keeps it.
pub struct DecodedPicture {
    buffer: Arc<PictureBuffer>,
    pub pts: f64,
    pub width: u32,
    pub height: u32,
    pub interlaced: bool,
    pub dropped: bool,
    pub allocated: bool,
    pub format: PixelFormat,
}

impl DecodedPicture {
    fn new(buffer: Arc<PictureBuffer>, dropped: bool) -> Self {
        Self {
            pts: unpack_pts(buffer.timestamp),
            width: buffer.width(),
            height: buffer.height(),
            interlaced: buffer.interlaced,
            dropped,
            allocated: true,
            format: PixelFormat::Nv12,
            buffer,
        }
    }

    pub fn luma(&self) -> &[u8] {
        self.buffer.luma()
    }

    pub fn luma_stride(&self) -> usize {
        self.width as usize
    }

    /// Interleaved chroma plane at half height.
    pub fn chroma(&self) -> &[u8] {
        self.buffer.chroma()
    }

    pub fn chroma_stride(&self) -> usize {
        self.width as usize
    }

    pub fn field(&self) -> FieldParity {
        self.buffer.field
    }

    pub fn frame_rate(&self) -> Rational {
        self.buffer.frame_rate
    }

    pub fn picture_number(&self) -> u32 {
        self.buffer.picture_number
    }
}

/// Facade over one accelerator handle: opens the device on construction,
/// runs the two worker threads while configured, and closes the handle on
/// drop. Constructed once by the owning pipeline and passed by reference;
/// nothing here requires a process-wide instance.
pub struct DecoderSession {
    device: Option<Arc<dyn DecoderDevice>>,
    config: DecoderConfig,
    configured: bool,
    drop_state: bool,
    feeder: Option<InputFeeder>,
    collector: Option<OutputCollector>,
    busy: VecDeque<Arc<PictureBuffer>>,
}

impl DecoderSession {
    /// Open the device handle. A failed open is not fatal: the session
    /// reports `is_open() == false` and every operation degrades to a
    /// no-op failure.
    pub fn new(device: Arc<dyn DecoderDevice>, config: DecoderConfig) -> Self {
        let device = match device.open(&OpenMode::default()) {
            DeviceStatus::Success => {
                info!("opened decoding accelerator");
                Some(device)
            }
            status => {
                error!(?status, "failed to open decoding accelerator");
                None
            }
        };
        Self {
            device,
            config,
            configured: false,
            drop_state: false,
            feeder: None,
            collector: None,
            busy: VecDeque::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Configure the decoder for `codec` and start both workers.
    ///
    /// The device start sequence aborts on the first failing step without
    /// unwinding the earlier ones; `close` performs the full reset.
    pub fn open(&mut self, stream_type: StreamType, codec: Codec) -> Result<(), SessionError> {
        let device = self.device.clone().ok_or(SessionError::DeviceNotOpen)?;
        if self.configured {
            self.close();
        }

        let algorithm = match codec {
            Codec::Vc1 => Algorithm::Vc1,
            Codec::H264 => Algorithm::H264,
            Codec::Mpeg2 => Algorithm::Mpeg2,
            other => return Err(SessionError::UnsupportedCodec(other)),
        };

        let status = device.open_decoder(stream_type);
        if !status.is_success() {
            error!(?status, "failed to open device decoder");
            return Err(SessionError::OpenDecoder(status));
        }
        let params = VideoParams {
            algorithm,
            frame_rate_hint: DEFAULT_RATE_HINT,
        };
        let status = device.set_video_params(&params);
        if !status.is_success() {
            error!(?status, "failed to set video parameters");
            return Err(SessionError::VideoParams(status));
        }
        let status = device.start_decoder();
        if !status.is_success() {
            error!(?status, "failed to start decoder");
            return Err(SessionError::StartDecoder(status));
        }
        let status = device.start_capture();
        if !status.is_success() {
            error!(?status, "failed to start capture");
            return Err(SessionError::StartCapture(status));
        }

        let mut feeder = InputFeeder::new(&self.config);
        feeder.start(Arc::clone(&device))?;
        let mut collector = OutputCollector::new(&self.config);
        collector.start(Arc::clone(&device))?;
        self.feeder = Some(feeder);
        self.collector = Some(collector);

        self.drop_state = false;
        self.configured = true;
        info!(?codec, "hardware decoder configured");
        Ok(())
    }

    /// Stop both workers, recycle busy pictures and reset the device-level
    /// decoder. Idempotent; the device handle itself stays open.
    pub fn close(&mut self) {
        if let Some(mut feeder) = self.feeder.take() {
            feeder.stop();
        }
        if let Some(mut collector) = self.collector.take() {
            while let Some(buffer) = self.busy.pop_front() {
                if let Ok(buffer) = Arc::try_unwrap(buffer) {
                    collector.free_buffer(buffer);
                }
            }
            collector.stop();
        }
        self.busy.clear();

        if let Some(device) = &self.device {
            device.flush_capture();
            device.stop_decoder();
            device.close_decoder();
        }
        self.configured = false;
        debug!("decoder session closed");
    }

    /// Discard pending input and undisplayed pictures.
    pub fn flush(&self) {
        if let Some(feeder) = &self.feeder {
            feeder.flush();
        }
        if let Some(collector) = &self.collector {
            collector.flush();
        }
        debug!("decoder session flushed");
    }

    /// Queue one compressed packet; `false` when unconfigured or the
    /// backpressure valve is closed.
    pub fn add_input(&self, data: &[u8], pts: f64) -> bool {
        self.feeder
            .as_ref()
            .map_or(false, |feeder| feeder.add_input(data, pts))
    }

    pub fn input_count(&self) -> usize {
        self.feeder.as_ref().map_or(0, InputFeeder::input_count)
    }

    pub fn ready_count(&self) -> usize {
        self.collector
            .as_ref()
            .map_or(0, OutputCollector::ready_count)
    }

    pub fn busy_count(&self) -> usize {
        self.busy.len()
    }

    /// Format derived from the latest device format-change event.
    pub fn video_format(&self) -> Option<VideoFormat> {
        self.collector.as_ref().map(OutputCollector::video_format)
    }

    /// Pop the next ready picture and park its buffer on the busy list.
    pub fn get_picture(&mut self) -> Option<DecodedPicture> {
        let collector = self.collector.as_ref()?;
        let buffer = Arc::new(collector.next_picture()?);
        let picture = DecodedPicture::new(Arc::clone(&buffer), self.drop_state);
        self.busy.push_back(buffer);
        Some(picture)
    }

    /// Recycle busy pictures, leaving one in flight: the consumer is
    /// assumed to still hold a reference to the picture it is displaying.
    pub fn clear_busy_list(&mut self) {
        let Some(collector) = &self.collector else {
            return;
        };
        while self.busy.len() > 1 {
            if let Some(buffer) = self.busy.pop_front() {
                match Arc::try_unwrap(buffer) {
                    Ok(buffer) => collector.free_buffer(buffer),
                    Err(_) => debug!("busy picture still referenced, releasing lazily"),
                }
            }
        }
    }

    /// Fast-forward the device through frames while the player is behind.
    /// A no-op unless the state actually changes.
    pub fn set_drop_state(&mut self, drop: bool) {
        if self.drop_state == drop {
            return;
        }
        self.drop_state = drop;
        if let Some(device) = &self.device {
            device.set_ff_rate(if drop { 2 } else { 1 });
        }
        debug!(drop, "drop state changed");
    }
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        if self.configured {
            self.close();
        }
        if let Some(device) = self.device.take() {
            device.close();
            info!("closed decoding accelerator");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{SimCall, SimDevice};
    use crate::device::{AspectCode, TimingCode};
    use std::thread;
    use std::time::{Duration, Instant};

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

    fn open_session(device: &Arc<SimDevice>) -> DecoderSession {
        let mut session =
            DecoderSession::new(Arc::clone(device) as Arc<dyn DecoderDevice>, test_config());
        session.open(StreamType::Es, Codec::H264).unwrap();
        session
    }

    fn streaming_device() -> Arc<SimDevice> {
        let device = Arc::new(SimDevice::new());
        device.set_auto_decode(true);
        device
    }

    #[test]
    fn unsupported_codec_is_rejected() {
        let device = Arc::new(SimDevice::new());
        let mut session =
            DecoderSession::new(device as Arc<dyn DecoderDevice>, test_config());
        assert!(matches!(
            session.open(StreamType::Es, Codec::Mpeg4),
            Err(SessionError::UnsupportedCodec(Codec::Mpeg4))
        ));
        assert!(!session.is_configured());
        assert!(!session.add_input(&[0u8; 4], 1.0));
        assert_eq!(session.input_count(), 0);
        assert_eq!(session.ready_count(), 0);
    }

    #[test]
    fn failed_device_step_aborts_open() {
        let device = Arc::new(SimDevice::new());
        device.script_call_failure(SimCall::StartDecoder, DeviceStatus::InsufficientResources);

        let mut session =
            DecoderSession::new(Arc::clone(&device) as Arc<dyn DecoderDevice>, test_config());
        assert!(matches!(
            session.open(StreamType::Es, Codec::H264),
            Err(SessionError::StartDecoder(DeviceStatus::InsufficientResources))
        ));
        assert!(!session.is_configured());

        // the caller resets with close and may try again
        session.close();
        assert!(session.open(StreamType::Es, Codec::H264).is_ok());
        assert!(session.is_configured());
    }

    #[test]
    fn pictures_flow_end_to_end() {
        let device = streaming_device();
        let mut session = open_session(&device);
        device.push_format_change(720, 480, TimingCode::Sd480p, AspectCode::R4x3);

        let packet = [0x42u8; 128];
        for pts in [0.04f64, 0.08, 0.12] {
            assert!(session.add_input(&packet, pts));
        }

        assert!(wait_until(Duration::from_secs(2), || session.ready_count() >= 3));
        let picture = session.get_picture().unwrap();
        assert_eq!(picture.pts.to_bits(), 0.04f64.to_bits());
        assert_eq!((picture.width, picture.height), (720, 480));
        assert_eq!(picture.format, PixelFormat::Nv12);
        assert_eq!(picture.luma_stride(), 720);
        assert_eq!(picture.luma().len(), 720 * 480);
        assert!(picture.allocated);
        assert!(!picture.dropped);
        assert_eq!(session.busy_count(), 1);

        let format = session.video_format().unwrap();
        assert_eq!((format.width, format.height), (720, 480));
    }

    #[test]
    fn clear_busy_list_leaves_one_picture() {
        let device = streaming_device();
        let mut session = open_session(&device);
        device.push_format_change(720, 480, TimingCode::Sd480p, AspectCode::R4x3);

        for pts in [0.1f64, 0.2, 0.3] {
            assert!(session.add_input(&[1u8; 64], pts));
        }
        assert!(wait_until(Duration::from_secs(2), || session.ready_count() >= 3));

        let mut views = Vec::new();
        for _ in 0..3 {
            views.push(session.get_picture().unwrap());
        }
        assert_eq!(session.busy_count(), 3);

        drop(views);
        session.clear_busy_list();
        assert_eq!(session.busy_count(), 1);
    }

    #[test]
    fn drop_state_drives_the_ff_rate() {
        let device = streaming_device();
        let mut session = open_session(&device);
        assert_eq!(device.ff_rate(), 1);

        session.set_drop_state(true);
        assert_eq!(device.ff_rate(), 2);
        session.set_drop_state(true);
        assert_eq!(device.ff_rate(), 2);
        session.set_drop_state(false);
        assert_eq!(device.ff_rate(), 1);
    }

    #[test]
    fn dropped_flag_rides_on_pictures() {
        let device = streaming_device();
        let mut session = open_session(&device);
        device.push_format_change(720, 480, TimingCode::Sd480p, AspectCode::R4x3);

        session.set_drop_state(true);
        assert!(session.add_input(&[2u8; 32], 0.5));
        assert!(wait_until(Duration::from_secs(2), || session.ready_count() >= 1));
        assert!(session.get_picture().unwrap().dropped);
    }

    #[test]
    fn close_is_idempotent_and_operations_degrade() {
        let device = streaming_device();
        let mut session = open_session(&device);
        session.close();
        session.close();

        assert!(!session.is_configured());
        assert!(!session.add_input(&[0u8; 4], 1.0));
        assert_eq!(session.input_count(), 0);
        assert_eq!(session.ready_count(), 0);
        assert!(session.get_picture().is_none());
        assert!(session.video_format().is_none());
    }

    #[test]
    fn flush_drains_pending_input() {
        let device = streaming_device();
        // hold submission back so packets stay queued
        device.set_ready_override(Some(99));
        let session = open_session(&device);

        for i in 0..10 {
            assert!(session.add_input(&[3u8; 16], i as f64 + 0.5));
        }
        assert!(session.input_count() > 0);
        session.flush();
        assert_eq!(session.input_count(), 0);
    }
}
