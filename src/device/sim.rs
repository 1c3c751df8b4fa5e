//! Software stand-in for the decoding accelerator.
//!
//! `SimDevice` honors the same call contract as the hardware unit: the
//! lifecycle flags gate each call, submitted input is acknowledged against
//! an internal ready list, and decoded output is handed back as no-copy
//! plane handles. Tests script statuses and outputs; the demo binary runs
//! it in auto-decode mode where every accepted packet becomes a picture.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;

use crate::decode::format::{copy_mode, CopyMode};
use crate::device::{
    AspectCode, DecoderDevice, DeviceStatus, DriverStatus, OpenMode, PictureInfo, ProcOutput,
    StreamType, TimingCode, VideoParams, OUT_FLAG_FMT_CHANGE, OUT_FLAG_PIB_VALID,
};

/// Calls whose next invocation can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCall {
    OpenDecoder,
    SetVideoParams,
    StartDecoder,
    StartCapture,
}

#[derive(Default)]
struct SimState {
    opened: bool,
    decoder_open: bool,
    started: bool,
    capturing: bool,
    ff_rate: u32,
    auto_decode: bool,
    format: Option<SimFormat>,
    picture_number: u32,
    submitted: Vec<u64>,
    submit_script: VecDeque<DeviceStatus>,
    call_failures: Vec<(SimCall, DeviceStatus)>,
    pending_outputs: VecDeque<ProcOutput>,
    ready_override: Option<u32>,
    released: u32,
}

#[derive(Clone, Copy)]
struct SimFormat {
    width: u32,
    height: u32,
    timing: TimingCode,
    aspect: AspectCode,
}

pub struct SimDevice {
    state: Mutex<SimState>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
        }
    }

    /// A device already opened, configured and capturing, for tests that
    /// drive the workers directly.
    pub fn ready() -> Self {
        let device = Self::new();
        device.open(&OpenMode::default());
        device.open_decoder(StreamType::Es);
        let mut state = device.state.lock().unwrap();
        state.started = true;
        state.capturing = true;
        drop(state);
        device
    }

    /// Turn every accepted packet into a generated picture at the current
    /// format.
    pub fn set_auto_decode(&self, enabled: bool) {
        self.state.lock().unwrap().auto_decode = enabled;
    }

    /// Queue a format-change event and make it the active output format.
    pub fn push_format_change(
        &self,
        width: u32,
        height: u32,
        timing: TimingCode,
        aspect: AspectCode,
    ) {
        let mut state = self.state.lock().unwrap();
        state.format = Some(SimFormat {
            width,
            height,
            timing,
            aspect,
        });
        let info = PictureInfo {
            width,
            height,
            frame_rate: timing,
            aspect_ratio: aspect,
            ..PictureInfo::default()
        };
        state.pending_outputs.push_back(ProcOutput {
            status: DeviceStatus::FormatChange,
            flags: OUT_FLAG_PIB_VALID | OUT_FLAG_FMT_CHANGE,
            picture_info: info,
            luma: Bytes::new(),
            chroma: Bytes::new(),
        });
    }

    /// Queue one decoded picture at the active format. Planes carry the
    /// quantized source stride the hardware uses for non-canonical widths.
    pub fn push_picture(&self, timestamp: u64) {
        let mut state = self.state.lock().unwrap();
        state.picture_number += 1;
        let number = state.picture_number;
        if let Some(out) = Self::generate_picture(&state, timestamp, number) {
            state.pending_outputs.push_back(out);
        }
    }

    /// Queue an arbitrary output, exactly as the driver would hand it back.
    pub fn push_raw_output(&self, out: ProcOutput) {
        self.state.lock().unwrap().pending_outputs.push_back(out);
    }

    /// Statuses returned by upcoming `submit_input` calls before packets
    /// are accepted again.
    pub fn script_submit<I: IntoIterator<Item = DeviceStatus>>(&self, statuses: I) {
        self.state.lock().unwrap().submit_script.extend(statuses);
    }

    /// Fail the next invocation of `call` with `status`.
    pub fn script_call_failure(&self, call: SimCall, status: DeviceStatus) {
        self.state.lock().unwrap().call_failures.push((call, status));
    }

    /// Pin the driver-status ready count regardless of queued outputs.
    pub fn set_ready_override(&self, count: Option<u32>) {
        self.state.lock().unwrap().ready_override = count;
    }

    /// Timestamps accepted by `submit_input`, in submission order.
    pub fn submitted(&self) -> Vec<u64> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn ff_rate(&self) -> u32 {
        self.state.lock().unwrap().ff_rate
    }

    pub fn released_count(&self) -> u32 {
        self.state.lock().unwrap().released
    }

    fn take_failure(state: &mut SimState, call: SimCall) -> Option<DeviceStatus> {
        let index = state.call_failures.iter().position(|(c, _)| *c == call)?;
        Some(state.call_failures.remove(index).1)
    }

    fn generate_picture(state: &SimState, timestamp: u64, number: u32) -> Option<ProcOutput> {
        let format = state.format?;
        let width = format.width as usize;
        let height = format.height as usize;
        let src_stride = match copy_mode(format.width) {
            CopyMode::Packed => width,
            CopyMode::Quantized(stride) => stride as usize,
        };
        let luma = vec![(number & 0xff) as u8; src_stride * height];
        let chroma = vec![0x80u8; src_stride * height / 2];
        let info = PictureInfo {
            timestamp,
            picture_number: number,
            width: format.width,
            height: format.height,
            frame_rate: format.timing,
            aspect_ratio: format.aspect,
            ..PictureInfo::default()
        };
        Some(ProcOutput {
            status: DeviceStatus::Success,
            flags: OUT_FLAG_PIB_VALID,
            picture_info: info,
            luma: Bytes::from(luma),
            chroma: Bytes::from(chroma),
        })
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderDevice for SimDevice {
    fn open(&self, _mode: &OpenMode) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        state.opened = true;
        state.ff_rate = 1;
        DeviceStatus::Success
    }

    fn close(&self) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        *state = SimState::default();
        DeviceStatus::Success
    }

    fn open_decoder(&self, _stream_type: StreamType) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        if !state.opened {
            return DeviceStatus::NoAccess;
        }
        if let Some(status) = Self::take_failure(&mut state, SimCall::OpenDecoder) {
            return status;
        }
        state.decoder_open = true;
        DeviceStatus::Success
    }

    fn set_video_params(&self, _params: &VideoParams) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        if !state.decoder_open {
            return DeviceStatus::DecoderNotOpen;
        }
        if let Some(status) = Self::take_failure(&mut state, SimCall::SetVideoParams) {
            return status;
        }
        DeviceStatus::Success
    }

    fn start_decoder(&self) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        if !state.decoder_open {
            return DeviceStatus::DecoderNotOpen;
        }
        if let Some(status) = Self::take_failure(&mut state, SimCall::StartDecoder) {
            return status;
        }
        state.started = true;
        DeviceStatus::Success
    }

    fn start_capture(&self) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        if !state.started {
            return DeviceStatus::DecoderNotStarted;
        }
        if let Some(status) = Self::take_failure(&mut state, SimCall::StartCapture) {
            return status;
        }
        state.capturing = true;
        DeviceStatus::Success
    }

    fn submit_input(&self, _data: &[u8], pts: u64) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        if !state.started {
            return DeviceStatus::DecoderNotStarted;
        }
        if let Some(status) = state.submit_script.pop_front() {
            if !status.is_success() {
                return status;
            }
        }
        state.submitted.push(pts);
        if state.auto_decode {
            state.picture_number += 1;
            let number = state.picture_number;
            if let Some(out) = Self::generate_picture(&state, pts, number) {
                state.pending_outputs.push_back(out);
            }
        }
        DeviceStatus::Success
    }

    fn driver_status(&self) -> Result<DriverStatus, DeviceStatus> {
        let state = self.state.lock().unwrap();
        if !state.opened {
            return Err(DeviceStatus::NoAccess);
        }
        Ok(DriverStatus {
            ready_list_count: state
                .ready_override
                .unwrap_or(state.pending_outputs.len() as u32),
            free_list_count: 0,
            ..DriverStatus::default()
        })
    }

    fn fetch_output(&self, _timeout: Duration) -> ProcOutput {
        let mut state = self.state.lock().unwrap();
        if !state.capturing {
            return ProcOutput::status_only(DeviceStatus::DecoderNotStarted);
        }
        match state.pending_outputs.pop_front() {
            Some(out) => out,
            None => ProcOutput::status_only(DeviceStatus::NoData),
        }
    }

    fn release_output_buffers(&self) -> DeviceStatus {
        self.state.lock().unwrap().released += 1;
        DeviceStatus::Success
    }

    fn set_ff_rate(&self, rate: u32) -> DeviceStatus {
        self.state.lock().unwrap().ff_rate = rate;
        DeviceStatus::Success
    }

    fn flush_capture(&self) -> DeviceStatus {
        self.state.lock().unwrap().pending_outputs.clear();
        DeviceStatus::Success
    }

    fn stop_decoder(&self) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        state.started = false;
        state.capturing = false;
        DeviceStatus::Success
    }

    fn close_decoder(&self) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        state.decoder_open = false;
        state.started = false;
        state.capturing = false;
        DeviceStatus::Success
    }
}
