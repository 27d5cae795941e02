//! In-memory playback device
//!
//! Behaves like a PCM device with a ring buffer, an application pointer
//! (frames queued so far) and a hardware pointer (frames played so far).
//! Two clocks are available:
//!
//! - **Virtual**: the hardware pointer only moves when the caller waits or
//!   drains, so tests run instantly and deterministically.
//! - **Realtime**: the hardware pointer follows the wall clock at the
//!   negotiated sample rate (the `null` device).
//!
//! A [`FaultPlan`] injects underruns, suspensions and hard failures at
//! chosen call counts. Everything the device queued can be inspected
//! through a shared [`SimulatedProbe`].

use super::{
    DeviceError, DeviceState, HwCapabilities, HwParams, HwSizes, MmapArea, PcmDevice, RateRange,
    SwParams,
};
use pcmflow_common::{SampleFormat, StreamFormat, TransferMode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Hardware pointer pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    /// Advance only inside `wait` / `drain`
    Virtual,
    /// Advance with wall-clock time
    Realtime,
}

/// Scheduled faults, keyed by 1-based call counts
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// `avail` calls that report an underrun
    pub underrun_on_avail: Vec<u64>,
    /// `avail` call that suspends the device, and how many `resume`
    /// attempts answer `Again` before it succeeds
    pub suspend_on_avail: Option<(u64, u32)>,
    /// `resume` is unsupported (recovery must fall back to prepare)
    pub resume_unsupported: bool,
    /// `prepare` fails with a backend error
    pub fail_prepare: bool,
    /// `write_interleaved` calls that report an underrun
    pub underrun_on_write: Vec<u64>,
    /// `write_interleaved` calls that accept at most this many frames
    pub short_write: Option<(u64, usize)>,
    /// `mmap_commit` calls that report an underrun without queuing
    pub underrun_on_commit: Vec<u64>,
}

impl FaultPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn underrun_at_avail(mut self, call: u64) -> Self {
        self.underrun_on_avail.push(call);
        self
    }

    pub fn suspend_at_avail(mut self, call: u64, busy_resumes: u32) -> Self {
        self.suspend_on_avail = Some((call, busy_resumes));
        self
    }

    pub fn without_resume(mut self) -> Self {
        self.resume_unsupported = true;
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn underrun_at_write(mut self, call: u64) -> Self {
        self.underrun_on_write.push(call);
        self
    }

    pub fn short_write_at(mut self, call: u64, max_frames: usize) -> Self {
        self.short_write = Some((call, max_frames));
        self
    }

    pub fn underrun_at_commit(mut self, call: u64) -> Self {
        self.underrun_on_commit.push(call);
        self
    }
}

/// Observation point shared with the test or caller that created the device
#[derive(Debug, Default)]
pub struct SimulatedProbe {
    queued_bytes: Mutex<Vec<u8>>,
    frames_queued: AtomicU64,
    frames_played: AtomicU64,
    underruns: AtomicU64,
    suspends: AtomicU64,
    starts: AtomicU64,
    prepares: AtomicU64,
    drains: AtomicU64,
    drops: AtomicU64,
}

impl SimulatedProbe {
    /// Every byte queued to the device, in order (only when capture is on)
    pub fn captured(&self) -> Vec<u8> {
        self.queued_bytes.lock().map(|bytes| bytes.clone()).unwrap_or_default()
    }

    pub fn frames_queued(&self) -> u64 {
        self.frames_queued.load(Ordering::Acquire)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Acquire)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Acquire)
    }

    pub fn suspends(&self) -> u64 {
        self.suspends.load(Ordering::Acquire)
    }

    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::Acquire)
    }

    pub fn prepares(&self) -> u64 {
        self.prepares.load(Ordering::Acquire)
    }

    pub fn drains(&self) -> u64 {
        self.drains.load(Ordering::Acquire)
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Acquire)
    }

    fn capture(&self, bytes: &[u8]) {
        if let Ok(mut queued) = self.queued_bytes.lock() {
            queued.extend_from_slice(bytes);
        }
    }
}

/// Simulated PCM playback device
pub struct SimulatedDevice {
    name: String,
    caps: HwCapabilities,
    clock: Clock,
    capture: bool,
    faults: FaultPlan,
    /// Extra frames added to every buffer size the device picks
    buffer_slack: usize,
    probe: Arc<SimulatedProbe>,

    state: DeviceState,
    state_before_suspend: DeviceState,
    format: Option<StreamFormat>,
    sizes: Option<HwSizes>,
    sw: SwParams,
    ring: Vec<u8>,
    appl_ptr: u64,
    hw_ptr: u64,
    last_tick: Instant,
    open_window: Option<(usize, usize)>,
    busy_resumes: u32,

    avail_calls: u64,
    write_calls: u64,
    commit_calls: u64,
}

impl SimulatedDevice {
    /// Virtual-clock device with the given capabilities, capture enabled
    pub fn new(name: &str, caps: HwCapabilities) -> Self {
        Self {
            name: name.to_string(),
            caps,
            clock: Clock::Virtual,
            capture: true,
            faults: FaultPlan::none(),
            buffer_slack: 0,
            probe: Arc::new(SimulatedProbe::default()),
            state: DeviceState::Open,
            state_before_suspend: DeviceState::Open,
            format: None,
            sizes: None,
            sw: SwParams::default(),
            ring: Vec::new(),
            appl_ptr: 0,
            hw_ptr: 0,
            last_tick: Instant::now(),
            open_window: None,
            busy_resumes: 0,
            avail_calls: 0,
            write_calls: 0,
            commit_calls: 0,
        }
    }

    /// Wall-clock paced device accepting any format (capture disabled)
    pub fn realtime(name: &str) -> Self {
        let mut device = Self::new(name, Self::default_capabilities());
        device.clock = Clock::Realtime;
        device.capture = false;
        device
    }

    /// Capabilities of a permissive device: every container, 1-8 channels,
    /// 8-192 kHz, device-side resampling, 2 s of buffer
    pub fn default_capabilities() -> HwCapabilities {
        HwCapabilities {
            transfer_modes: vec![TransferMode::Direct, TransferMode::ReadWrite],
            sample_formats: SampleFormat::ALL.to_vec(),
            channels: (1..=8).collect(),
            rates: vec![RateRange::new(8000, 192_000)],
            can_resample: true,
            max_buffer_time: Duration::from_secs(2),
        }
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Make the chosen buffer size exceed a whole number of periods
    pub fn with_buffer_slack(mut self, frames: usize) -> Self {
        self.buffer_slack = frames;
        self
    }

    pub fn probe(&self) -> Arc<SimulatedProbe> {
        Arc::clone(&self.probe)
    }

    fn buffer_frames(&self) -> usize {
        self.sizes.map(|s| s.buffer_frames).unwrap_or(0)
    }

    fn frame_bytes(&self) -> usize {
        self.format.map(|f| f.frame_bytes()).unwrap_or(0)
    }

    fn queued(&self) -> usize {
        (self.appl_ptr - self.hw_ptr) as usize
    }

    fn free(&self) -> usize {
        self.buffer_frames().saturating_sub(self.queued())
    }

    fn set_state(&mut self, next: DeviceState) {
        if self.state != next {
            trace!("Simulated device '{}': {} -> {}", self.name, self.state, next);
            self.state = next;
        }
    }

    /// Move the hardware pointer forward by up to `frames`.
    ///
    /// Asking for more than is queued while running is an underrun.
    fn consume(&mut self, frames: usize) {
        let queued = self.queued();
        let played = frames.min(queued);
        self.hw_ptr += played as u64;
        self.probe.frames_played.fetch_add(played as u64, Ordering::AcqRel);
        if frames > queued && self.state == DeviceState::Running {
            self.enter_xrun();
        }
    }

    fn enter_xrun(&mut self) {
        warn!("Simulated device '{}' underrun", self.name);
        self.probe.underruns.fetch_add(1, Ordering::AcqRel);
        self.set_state(DeviceState::Xrun);
    }

    fn enter_suspend(&mut self, busy_resumes: u32) {
        warn!("Simulated device '{}' suspended", self.name);
        self.probe.suspends.fetch_add(1, Ordering::AcqRel);
        self.state_before_suspend = self.state;
        self.busy_resumes = busy_resumes;
        self.set_state(DeviceState::Suspended);
    }

    /// Realtime clock: play what the wall clock says has been played.
    fn tick(&mut self) {
        let now = Instant::now();
        if self.clock == Clock::Realtime && self.state == DeviceState::Running {
            if let Some(format) = self.format {
                let elapsed = now.duration_since(self.last_tick);
                let frames = (elapsed.as_secs_f64() * format.sample_rate as f64) as usize;
                if frames == 0 {
                    return;
                }
                self.consume(frames);
            }
        }
        self.last_tick = now;
    }

    fn check_usable(&self) -> DeviceResult<()> {
        match self.state {
            DeviceState::Xrun => Err(DeviceError::Underrun),
            DeviceState::Suspended => Err(DeviceError::Suspended),
            DeviceState::Open | DeviceState::Setup => {
                Err(DeviceError::BadState(format!("device is in {} state", self.state)))
            }
            _ => Ok(()),
        }
    }

    fn maybe_auto_start(&mut self) {
        if self.state == DeviceState::Prepared
            && self.sw.start_threshold > 0
            && self.queued() >= self.sw.start_threshold
        {
            debug!("Simulated device '{}' reached start threshold", self.name);
            self.start_running();
        }
    }

    fn start_running(&mut self) {
        self.probe.starts.fetch_add(1, Ordering::AcqRel);
        self.last_tick = Instant::now();
        self.set_state(DeviceState::Running);
    }

    /// Copy frames into the ring at the application pointer, wrapping.
    fn queue_bytes(&mut self, data: &[u8]) {
        let fb = self.frame_bytes();
        let ring_len = self.ring.len();
        let mut pos = (self.appl_ptr as usize % self.buffer_frames()) * fb;
        let mut rest = data;
        while !rest.is_empty() {
            let chunk = rest.len().min(ring_len - pos);
            self.ring[pos..pos + chunk].copy_from_slice(&rest[..chunk]);
            rest = &rest[chunk..];
            pos = (pos + chunk) % ring_len;
        }
        self.record_queued(data);
    }

    fn record_queued(&mut self, data: &[u8]) {
        let frames = data.len() / self.frame_bytes();
        self.appl_ptr += frames as u64;
        self.probe.frames_queued.fetch_add(frames as u64, Ordering::AcqRel);
        if self.capture {
            self.probe.capture(data);
        }
    }

    fn frames_for(duration: Duration, rate: u32) -> usize {
        (duration.as_secs_f64() * rate as f64).round() as usize
    }
}

impl PcmDevice for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DeviceResult<HwCapabilities> {
        Ok(self.caps.clone())
    }

    fn apply_hw_params(&mut self, params: &HwParams) -> DeviceResult<HwSizes> {
        let format = params.format;
        if !self.caps.transfer_modes.contains(&params.transfer) {
            return Err(DeviceError::InvalidParam(format!("transfer mode {}", params.transfer)));
        }
        if !self.caps.sample_formats.contains(&format.sample_format) {
            return Err(DeviceError::InvalidParam(format!("sample format {}", format.sample_format)));
        }
        if !self.caps.supports_channels(format.channels) {
            return Err(DeviceError::InvalidParam(format!("{} channels", format.channels)));
        }
        let resampling = params.resample && self.caps.can_resample;
        if !resampling && !self.caps.rates.iter().any(|r| r.contains(format.sample_rate)) {
            return Err(DeviceError::InvalidParam(format!("rate {} Hz", format.sample_rate)));
        }
        if params.buffer_time > self.caps.max_buffer_time {
            return Err(DeviceError::InvalidParam(format!(
                "buffer time {:?} exceeds {:?}",
                params.buffer_time, self.caps.max_buffer_time
            )));
        }

        let period_frames = Self::frames_for(params.period_time, format.sample_rate);
        let buffer_frames = Self::frames_for(params.buffer_time, format.sample_rate) + self.buffer_slack;
        let sizes = HwSizes { buffer_frames, period_frames };

        self.ring = vec![0u8; buffer_frames * format.frame_bytes()];
        self.format = Some(format);
        self.sizes = Some(sizes);
        self.appl_ptr = 0;
        self.hw_ptr = 0;
        self.open_window = None;
        self.set_state(DeviceState::Prepared);
        debug!(
            "Simulated device '{}' configured: {} buffer={} period={}",
            self.name, format, buffer_frames, period_frames
        );
        Ok(sizes)
    }

    fn apply_sw_params(&mut self, params: &SwParams) -> DeviceResult<()> {
        if self.sizes.is_none() {
            return Err(DeviceError::BadState("hardware parameters not set".to_string()));
        }
        if params.start_threshold > self.buffer_frames() {
            return Err(DeviceError::InvalidParam(format!(
                "start threshold {} exceeds buffer of {} frames",
                params.start_threshold,
                self.buffer_frames()
            )));
        }
        self.sw = *params;
        Ok(())
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn avail(&mut self) -> DeviceResult<usize> {
        self.avail_calls += 1;
        let call = self.avail_calls;
        if matches!(self.state, DeviceState::Prepared | DeviceState::Running) {
            if self.faults.underrun_on_avail.contains(&call) {
                self.enter_xrun();
            } else if let Some((at, busy)) = self.faults.suspend_on_avail {
                if at == call {
                    self.enter_suspend(busy);
                }
            }
        }
        self.tick();
        self.check_usable()?;
        Ok(self.free())
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.check_usable()?;
        if self.state != DeviceState::Prepared {
            return Err(DeviceError::BadState(format!("cannot start from {} state", self.state)));
        }
        self.start_running();
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> DeviceResult<bool> {
        self.tick();
        self.check_usable()?;
        let avail_min = self.sw.avail_min.max(1);
        if self.free() >= avail_min {
            return Ok(true);
        }
        if self.state != DeviceState::Running {
            return Ok(false);
        }

        let needed = avail_min - self.free();
        match self.clock {
            Clock::Virtual => self.consume(needed),
            Clock::Realtime => {
                let rate = self.format.map(|f| f.sample_rate).unwrap_or(1) as f64;
                let mut sleep = Duration::from_secs_f64(needed as f64 / rate);
                if let Some(limit) = timeout {
                    sleep = sleep.min(limit);
                }
                std::thread::sleep(sleep);
                self.tick();
            }
        }
        self.check_usable()?;
        Ok(self.free() >= avail_min)
    }

    fn write_interleaved(&mut self, data: &[u8]) -> DeviceResult<usize> {
        self.write_calls += 1;
        let call = self.write_calls;
        if self.faults.underrun_on_write.contains(&call) && self.state == DeviceState::Running {
            self.enter_xrun();
        }
        self.tick();
        self.check_usable()?;

        let fb = self.frame_bytes();
        let mut offered = data.len() / fb;
        if let Some((at, max)) = self.faults.short_write {
            if at == call {
                offered = offered.min(max);
            }
        }
        if offered == 0 {
            return Ok(0);
        }
        if self.free() == 0 {
            if self.state == DeviceState::Prepared {
                self.start_running();
            }
            self.wait(None)?;
        }

        let frames = offered.min(self.free());
        self.queue_bytes(&data[..frames * fb]);
        self.maybe_auto_start();
        Ok(frames)
    }

    fn mmap_begin(&mut self, frames: usize) -> DeviceResult<MmapArea> {
        self.check_usable()?;
        if self.open_window.is_some() {
            return Err(DeviceError::BadState("a window is already open".to_string()));
        }
        let buffer = self.buffer_frames();
        if buffer == 0 {
            return Err(DeviceError::BadState("device has no buffer".to_string()));
        }
        let offset = (self.appl_ptr % buffer as u64) as usize;
        let granted = frames.min(self.free()).min(buffer - offset);
        self.open_window = Some((offset, granted));
        Ok(MmapArea::new(offset, granted, self.frame_bytes()))
    }

    fn mmap_region(&mut self, area: &MmapArea) -> &mut [u8] {
        let fb = self.frame_bytes();
        let start = (area.offset() * fb).min(self.ring.len());
        let end = (start + area.len_bytes()).min(self.ring.len());
        &mut self.ring[start..end]
    }

    fn mmap_commit(&mut self, area: MmapArea, frames: usize) -> DeviceResult<usize> {
        self.commit_calls += 1;
        let call = self.commit_calls;
        if self.open_window != Some((area.offset(), area.frames())) {
            return Err(DeviceError::BadState("commit without matching window".to_string()));
        }
        self.open_window = None;
        if frames > area.frames() {
            return Err(DeviceError::InvalidParam(format!(
                "commit of {} frames exceeds window of {}",
                frames,
                area.frames()
            )));
        }
        if self.faults.underrun_on_commit.contains(&call) {
            self.enter_xrun();
            return Err(DeviceError::Underrun);
        }
        self.check_usable()?;

        let fb = self.frame_bytes();
        let start = area.offset() * fb;
        let committed = self.ring[start..start + frames * fb].to_vec();
        self.record_queued(&committed);
        self.maybe_auto_start();
        Ok(frames)
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        if self.faults.fail_prepare {
            return Err(DeviceError::Backend("prepare rejected by device".to_string()));
        }
        if self.sizes.is_none() {
            return Err(DeviceError::BadState("hardware parameters not set".to_string()));
        }
        self.probe.prepares.fetch_add(1, Ordering::AcqRel);
        self.hw_ptr = self.appl_ptr;
        self.open_window = None;
        self.set_state(DeviceState::Prepared);
        Ok(())
    }

    fn resume(&mut self) -> DeviceResult<()> {
        if self.state != DeviceState::Suspended {
            return Err(DeviceError::BadState(format!("cannot resume from {} state", self.state)));
        }
        if self.faults.resume_unsupported {
            return Err(DeviceError::Backend("resume not supported".to_string()));
        }
        if self.busy_resumes > 0 {
            self.busy_resumes -= 1;
            return Err(DeviceError::Again);
        }
        let restored = self.state_before_suspend;
        self.last_tick = Instant::now();
        self.set_state(restored);
        Ok(())
    }

    fn drain(&mut self) -> DeviceResult<()> {
        self.tick();
        match self.state {
            DeviceState::Suspended => return Err(DeviceError::Suspended),
            DeviceState::Open => return Err(DeviceError::BadState("device not configured".to_string())),
            DeviceState::Prepared if self.queued() > 0 => self.start_running(),
            _ => {}
        }

        if self.state == DeviceState::Running {
            self.set_state(DeviceState::Draining);
            let remaining = self.queued();
            if self.clock == Clock::Realtime {
                let rate = self.format.map(|f| f.sample_rate).unwrap_or(1) as f64;
                std::thread::sleep(Duration::from_secs_f64(remaining as f64 / rate));
            }
            self.consume(remaining);
        }
        self.probe.drains.fetch_add(1, Ordering::AcqRel);
        self.set_state(DeviceState::Setup);
        Ok(())
    }

    fn drop_pending(&mut self) -> DeviceResult<()> {
        self.probe.drops.fetch_add(1, Ordering::AcqRel);
        self.hw_ptr = self.appl_ptr;
        self.open_window = None;
        if self.state != DeviceState::Open {
            self.set_state(DeviceState::Setup);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(caps: HwCapabilities) -> SimulatedDevice {
        let mut device = SimulatedDevice::new("sim", caps);
        let params = HwParams {
            format: StreamFormat::new(48000, 2, 16).unwrap(),
            transfer: TransferMode::ReadWrite,
            resample: false,
            buffer_time: Duration::from_millis(100),
            period_time: Duration::from_millis(25),
        };
        let sizes = device.apply_hw_params(&params).unwrap();
        device
            .apply_sw_params(&SwParams {
                start_threshold: sizes.buffer_frames,
                avail_min: sizes.period_frames,
            })
            .unwrap();
        device
    }

    #[test]
    fn test_sizes_follow_rate() {
        let device = configured(SimulatedDevice::default_capabilities());
        assert_eq!(device.sizes, Some(HwSizes { buffer_frames: 4800, period_frames: 1200 }));
        assert_eq!(device.state(), DeviceState::Prepared);
    }

    #[test]
    fn test_auto_start_at_threshold() {
        let mut device = configured(SimulatedDevice::default_capabilities());
        let period = vec![0u8; 1200 * 4];
        for _ in 0..3 {
            assert_eq!(device.write_interleaved(&period).unwrap(), 1200);
            assert_eq!(device.state(), DeviceState::Prepared);
        }
        device.write_interleaved(&period).unwrap();
        assert_eq!(device.state(), DeviceState::Running);
        assert_eq!(device.avail().unwrap(), 0);
    }

    #[test]
    fn test_wait_consumes_one_period_on_virtual_clock() {
        let mut device = configured(SimulatedDevice::default_capabilities());
        device.write_interleaved(&vec![0u8; 4800 * 4]).unwrap();
        assert!(device.wait(None).unwrap());
        assert_eq!(device.avail().unwrap(), 1200);
        assert_eq!(device.probe().frames_played(), 1200);
    }

    #[test]
    fn test_mmap_window_wraps_at_buffer_end() {
        let mut device = configured(SimulatedDevice::default_capabilities());
        device.write_interleaved(&vec![0u8; 4000 * 4]).unwrap();
        device.start().unwrap();
        device.wait(None).unwrap();

        let area = device.mmap_begin(1200).unwrap();
        assert_eq!(area.offset(), 4000);
        assert_eq!(area.frames(), 800);
        device.mmap_region(&area).fill(7);
        assert_eq!(device.mmap_commit(area, 800).unwrap(), 800);
        assert_eq!(device.probe().frames_queued(), 4800);
    }

    #[test]
    fn test_second_window_before_commit_is_rejected() {
        let mut device = configured(SimulatedDevice::default_capabilities());
        let area = device.mmap_begin(100).unwrap();
        assert!(matches!(device.mmap_begin(100), Err(DeviceError::BadState(_))));
        device.mmap_commit(area, 0).unwrap();
    }

    #[test]
    fn test_injected_underrun_then_prepare() {
        let mut device = configured(SimulatedDevice::default_capabilities())
            .with_faults(FaultPlan::none().underrun_at_avail(2));
        assert!(device.avail().is_ok());
        assert_eq!(device.avail(), Err(DeviceError::Underrun));
        assert_eq!(device.state(), DeviceState::Xrun);
        device.prepare().unwrap();
        assert_eq!(device.state(), DeviceState::Prepared);
        assert_eq!(device.avail().unwrap(), 4800);
    }

    #[test]
    fn test_suspend_answers_again_until_ready() {
        let mut device = configured(SimulatedDevice::default_capabilities())
            .with_faults(FaultPlan::none().suspend_at_avail(1, 2));
        assert_eq!(device.avail(), Err(DeviceError::Suspended));
        assert_eq!(device.resume(), Err(DeviceError::Again));
        assert_eq!(device.resume(), Err(DeviceError::Again));
        assert_eq!(device.resume(), Ok(()));
        assert_eq!(device.state(), DeviceState::Prepared);
    }

    #[test]
    fn test_rejects_unsupported_rate_without_resampling() {
        let mut caps = SimulatedDevice::default_capabilities();
        caps.rates = vec![RateRange::discrete(48000)];
        caps.can_resample = false;
        let mut device = SimulatedDevice::new("sim", caps);
        let params = HwParams {
            format: StreamFormat::new(44100, 2, 16).unwrap(),
            transfer: TransferMode::ReadWrite,
            resample: true,
            buffer_time: Duration::from_millis(100),
            period_time: Duration::from_millis(25),
        };
        assert!(matches!(device.apply_hw_params(&params), Err(DeviceError::InvalidParam(_))));
    }

    #[test]
    fn test_drain_plays_everything_and_stops() {
        let mut device = configured(SimulatedDevice::default_capabilities());
        device.write_interleaved(&vec![1u8; 600 * 4]).unwrap();
        device.drain().unwrap();
        assert_eq!(device.state(), DeviceState::Setup);
        assert_eq!(device.probe().frames_played(), 600);
        assert_eq!(device.probe().underruns(), 0);
    }
}
