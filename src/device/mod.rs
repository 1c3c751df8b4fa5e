//! Call contract of the decoding accelerator.
//!
//! The accelerator is an external collaborator with a fixed protocol: a
//! handle is opened once, a decoder instance is configured and started on
//! it, compressed input is submitted against the device's internal ready
//! list, and decoded output is fetched with a bounded timeout. Status codes
//! form a closed enumeration; `Busy`, `NoData` and `Timeout` are transient
//! outcomes, not errors.

pub mod sim;

use std::time::Duration;

use bytes::Bytes;

use crate::decode::format::Rational;

/// Closed status enumeration returned by every device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Success,
    InvalidArg,
    Busy,
    NotImplemented,
    NoAccess,
    InsufficientResources,
    IoError,
    NoData,
    Timeout,
    FirmwareCmdError,
    DecoderNotOpen,
    DecoderNotStarted,
    FormatChange,
    Pending,
}

impl DeviceStatus {
    pub fn is_success(self) -> bool {
        self == DeviceStatus::Success
    }
}

/// Elementary-stream framing the decoder instance is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Raw elementary stream.
    Es,
    /// Packetized elementary stream.
    Pes,
}

/// Device algorithm selector for the supported compressed formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Vc1,
    H264,
    Mpeg2,
}

/// Timing standard reported by the device for the active stream.
///
/// `P`/`I` variants are progressive/interlaced; the trailing digits are the
/// field or frame cadence. Codes outside the published set are reported as
/// `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingCode {
    Sd480p0,
    Sd576p0,
    Hd720p0,
    Hd1080p0,
    Sd480i0,
    Hd1080i0,
    Hd1080p2397,
    Hd1080p2997,
    Hd1080p30,
    Hd1080p24,
    Hd1080p25,
    Hd1080i2997,
    Hd1080i25,
    Hd1080i,
    Hd720p5994,
    Hd720p50,
    Hd720p,
    Hd720p2397,
    Hd720p24,
    Hd720p2997,
    Sd480i,
    SdNtsc,
    Sd480p,
    SdPal1,
    Sd480p2397,
    Sd480p2997,
    Sd576p25,
    Other,
}

/// Aspect-ratio code reported with picture information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectCode {
    Square,
    R12x11,
    R10x11,
    R16x11,
    R40x33,
    R24x11,
    R20x11,
    R32x11,
    R80x33,
    R18x11,
    R15x11,
    R64x33,
    R160x99,
    R4x3,
    R16x9,
    R221x1,
    Unknown,
    /// Ratio packed into `custom_aspect_ratio_width_height`:
    /// low 16 bits = width, high 16 bits = height.
    Other,
}

/// Device open flags.
#[derive(Debug, Clone, Copy)]
pub struct OpenMode {
    /// Report dropped/repeated frames in the driver status.
    pub drop_repeat_mode: bool,
    /// Timing the device assumes until the stream reports its own.
    pub default_timing: TimingCode,
}

impl Default for OpenMode {
    fn default() -> Self {
        Self {
            drop_repeat_mode: true,
            default_timing: TimingCode::Hd720p2397,
        }
    }
}

/// Decoder configuration applied before start.
#[derive(Debug, Clone, Copy)]
pub struct VideoParams {
    pub algorithm: Algorithm,
    /// Rate the decoder assumes until the first format report.
    pub frame_rate_hint: Rational,
}

/// Default frame-rate hint used when opening a decoder.
pub const DEFAULT_RATE_HINT: Rational = Rational::new(24_000, 1001);

/// Snapshot of the driver's internal queues.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverStatus {
    pub ready_list_count: u32,
    pub free_list_count: u32,
    pub frames_dropped: u32,
    pub frames_captured: u32,
    pub frames_repeated: u32,
}

/// Picture metadata block attached to decoded output.
#[derive(Debug, Clone, Copy)]
pub struct PictureInfo {
    pub timestamp: u64,
    pub picture_number: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: TimingCode,
    pub aspect_ratio: AspectCode,
    /// Packed custom ratio, meaningful when `aspect_ratio` is `Other`.
    pub custom_aspect_ratio_width_height: u32,
}

impl Default for PictureInfo {
    fn default() -> Self {
        Self {
            timestamp: 0,
            picture_number: 0,
            width: 0,
            height: 0,
            frame_rate: TimingCode::Other,
            aspect_ratio: AspectCode::Unknown,
            custom_aspect_ratio_width_height: 0,
        }
    }
}

/// `ProcOutput::flags`: the picture-info block is valid.
pub const OUT_FLAG_PIB_VALID: u32 = 0x1;
/// `ProcOutput::flags`: the picture-info block describes a format change.
pub const OUT_FLAG_FMT_CHANGE: u32 = 0x2;

/// One output extraction: the status of the call plus, when the status
/// warrants it, picture info and plane handles.
///
/// The planes are `Bytes` into device-owned storage; cloning them copies
/// nothing. The caller must call `release_output_buffers` once it is done
/// with them.
#[derive(Debug, Clone)]
pub struct ProcOutput {
    pub status: DeviceStatus,
    pub flags: u32,
    pub picture_info: PictureInfo,
    pub luma: Bytes,
    pub chroma: Bytes,
}

impl ProcOutput {
    /// Output carrying only a status, no picture data.
    pub fn status_only(status: DeviceStatus) -> Self {
        Self {
            status,
            flags: 0,
            picture_info: PictureInfo::default(),
            luma: Bytes::new(),
            chroma: Bytes::new(),
        }
    }
}

/// The accelerator call contract.
///
/// One handle is exclusively owned by one decoder session; implementations
/// take `&self` because the underlying driver serializes internally.
pub trait DecoderDevice: Send + Sync {
    fn open(&self, mode: &OpenMode) -> DeviceStatus;
    fn close(&self) -> DeviceStatus;

    fn open_decoder(&self, stream_type: StreamType) -> DeviceStatus;
    fn set_video_params(&self, params: &VideoParams) -> DeviceStatus;
    fn start_decoder(&self) -> DeviceStatus;
    fn start_capture(&self) -> DeviceStatus;

    /// Submit one compressed packet. `Busy` means the device input queue is
    /// full and the same packet should be retried.
    fn submit_input(&self, data: &[u8], pts: u64) -> DeviceStatus;

    /// Driver queue snapshot; `Err` carries the non-success status.
    fn driver_status(&self) -> Result<DriverStatus, DeviceStatus>;

    /// Fetch one decoded output, waiting at most `timeout`. The returned
    /// status distinguishes a picture (`Success`), nothing available this
    /// poll (`NoData`), and a format change (`FormatChange`).
    fn fetch_output(&self, timeout: Duration) -> ProcOutput;

    /// Return the planes handed out by the last successful fetch.
    fn release_output_buffers(&self) -> DeviceStatus;

    /// Fast-forward/skip rate: 1 plays everything, 2 skips.
    fn set_ff_rate(&self, rate: u32) -> DeviceStatus;

    fn flush_capture(&self) -> DeviceStatus;
    fn stop_decoder(&self) -> DeviceStatus;
    fn close_decoder(&self) -> DeviceStatus;
}
