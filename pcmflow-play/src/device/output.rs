//! Playback device backed by cpal
//!
//! cpal drives output through a callback on its own audio thread, so the
//! device buffer is a byte ring between the transfer engine (producer) and
//! that callback (consumer). The callback converts each container sample to
//! the stream's native cpal sample type.
//!
//! Device states are reconstructed from flags the callback sets:
//! - ring ran dry while running → `Xrun` (the callback plays silence)
//! - `StreamError::DeviceNotAvailable` → `Suspended`; `resume` rebuilds the
//!   stream once the device is back
//!
//! cpal exposes no device memory, so the direct-transfer window is a staging
//! buffer that `mmap_commit` pushes into the ring.

use super::{
    DeviceError, DeviceState, HwCapabilities, HwParams, HwSizes, MmapArea, PcmDevice, RateRange,
    SwParams,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    FromSample, Sample, SizedSample, Stream, StreamConfig, SupportedBufferSize, SupportedStreamConfigRange,
};
use pcmflow_common::{SampleFormat, StreamFormat, TransferMode};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Largest buffer the byte ring is sized for
const MAX_BUFFER_TIME: Duration = Duration::from_secs(2);

/// Shortest sleep between readiness polls
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Flags shared with the audio callback
#[derive(Debug, Default)]
struct CallbackFlags {
    /// Engine has started the device; the callback consumes the ring
    running: AtomicBool,
    /// Ring ran dry while running
    xrun: AtomicBool,
    /// Backend reported the device as gone
    suspended: AtomicBool,
    underruns: AtomicU64,
    frames_played: AtomicU64,
}

/// Playback device on a cpal output stream
pub struct CpalDevice {
    name: String,
    device: cpal::Device,
    stream: Option<Stream>,
    stream_config: Option<StreamConfig>,
    native_format: Option<cpal::SampleFormat>,
    producer: Option<HeapProd<u8>>,
    consumer: Option<Arc<Mutex<HeapCons<u8>>>>,
    flags: Arc<CallbackFlags>,
    format: Option<StreamFormat>,
    sizes: Option<HwSizes>,
    period_time: Duration,
    sw: SwParams,
    state: DeviceState,
    staging: Vec<u8>,
    open_window: Option<usize>,
}

impl CpalDevice {
    /// List output device names known to the default host.
    pub fn list_devices() -> DeviceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| DeviceError::Backend(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device by name (`"default"` for the host default).
    ///
    /// # Errors
    /// - No device with that name exists
    /// - Device enumeration fails
    pub fn open(name: &str) -> DeviceResult<Self> {
        let device = find_device(name)?.ok_or_else(|| {
            DeviceError::Backend(format!("no output device named '{}'", name))
        })?;
        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        Ok(Self {
            name: name.to_string(),
            device,
            stream: None,
            stream_config: None,
            native_format: None,
            producer: None,
            consumer: None,
            flags: Arc::new(CallbackFlags::default()),
            format: None,
            sizes: None,
            period_time: Duration::ZERO,
            sw: SwParams::default(),
            state: DeviceState::Open,
            staging: Vec::new(),
            open_window: None,
        })
    }

    /// Underruns seen by the audio callback since open
    pub fn underruns(&self) -> u64 {
        self.flags.underruns.load(Ordering::Acquire)
    }

    fn frame_bytes(&self) -> usize {
        self.format.map(|f| f.frame_bytes()).unwrap_or(1)
    }

    fn free(&self) -> usize {
        self.producer
            .as_ref()
            .map(|p| p.vacant_len() / self.frame_bytes())
            .unwrap_or(0)
    }

    fn queued(&self) -> usize {
        self.producer
            .as_ref()
            .map(|p| p.occupied_len() / self.frame_bytes())
            .unwrap_or(0)
    }

    fn poll_interval(&self) -> Duration {
        (self.period_time / 4).max(MIN_POLL_INTERVAL)
    }

    /// Fold callback flags into the engine-side state.
    fn sync_state(&mut self) {
        if self.flags.suspended.load(Ordering::Acquire) {
            if self.state != DeviceState::Suspended {
                warn!("Audio device '{}' became unavailable", self.name);
                self.state = DeviceState::Suspended;
            }
        } else if self.state == DeviceState::Running && self.flags.xrun.load(Ordering::Acquire) {
            self.state = DeviceState::Xrun;
        }
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

    fn clear_ring(&self) -> DeviceResult<()> {
        if let Some(consumer) = &self.consumer {
            let mut consumer = consumer
                .lock()
                .map_err(|_| DeviceError::Backend("ring consumer lock poisoned".to_string()))?;
            consumer.clear();
        }
        Ok(())
    }

    fn pause_stream(&self) {
        self.flags.running.store(false, Ordering::Release);
        if let Some(stream) = &self.stream {
            if let Err(e) = stream.pause() {
                debug!("Failed to pause stream: {}", e);
            }
        }
    }

    fn maybe_auto_start(&mut self) -> DeviceResult<()> {
        if self.state == DeviceState::Prepared
            && self.sw.start_threshold > 0
            && self.queued() >= self.sw.start_threshold
        {
            self.start()?;
        }
        Ok(())
    }

    fn push_frames(&mut self, bytes: &[u8]) -> usize {
        match self.producer.as_mut() {
            Some(producer) => producer.push_slice(bytes),
            None => 0,
        }
    }

    /// Build (but do not play) the output stream for the current configuration.
    fn build_stream(&self) -> DeviceResult<Stream> {
        let (Some(config), Some(native), Some(format), Some(consumer)) = (
            self.stream_config.as_ref(),
            self.native_format,
            self.format,
            self.consumer.as_ref(),
        ) else {
            return Err(DeviceError::BadState("hardware parameters not set".to_string()));
        };

        let consumer = Arc::clone(consumer);
        match native {
            cpal::SampleFormat::I16 => self.build_typed::<i16>(config, format, consumer),
            cpal::SampleFormat::I32 => self.build_typed::<i32>(config, format, consumer),
            cpal::SampleFormat::F32 => self.build_typed::<f32>(config, format, consumer),
            other => Err(DeviceError::InvalidParam(format!("unsupported native format {:?}", other))),
        }
    }

    fn build_typed<T>(
        &self,
        config: &StreamConfig,
        format: StreamFormat,
        consumer: Arc<Mutex<HeapCons<u8>>>,
    ) -> DeviceResult<Stream>
    where
        T: SizedSample + FromSample<i32> + Send + 'static,
    {
        let flags = Arc::clone(&self.flags);
        let error_flags = Arc::clone(&self.flags);
        let channels = format.channels as usize;
        let container = format.sample_format;

        let stream = self
            .device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    fill_output(data, &consumer, &flags, container, channels);
                },
                move |err| match err {
                    cpal::StreamError::DeviceNotAvailable => {
                        error!("Audio device not available");
                        error_flags.suspended.store(true, Ordering::Release);
                        error_flags.running.store(false, Ordering::Release);
                    }
                    other => {
                        error!("Audio stream error: {} - marking for recovery", other);
                        error_flags.xrun.store(true, Ordering::Release);
                        error_flags.running.store(false, Ordering::Release);
                    }
                },
                None,
            )
            .map_err(|e| DeviceError::Backend(format!("Failed to build stream: {}", e)))?;

        // Some hosts start streams on creation
        if let Err(e) = stream.pause() {
            debug!("Stream pause after build failed: {}", e);
        }
        Ok(stream)
    }
}

/// Find an output device by name; `"default"` maps to the host default.
fn find_device(name: &str) -> DeviceResult<Option<cpal::Device>> {
    let host = cpal::default_host();
    if name == "default" {
        return Ok(host.default_output_device());
    }
    let mut devices = host
        .output_devices()
        .map_err(|e| DeviceError::Backend(format!("Failed to enumerate devices: {}", e)))?;
    Ok(devices.find(|d| d.name().ok().as_deref() == Some(name)))
}

/// Native cpal types the callback can feed, best match for the container first
/// Native stream formats that carry `container` without losing precision,
/// best first
fn native_preference(container: SampleFormat) -> &'static [cpal::SampleFormat] {
    match container {
        SampleFormat::S16Le => &[cpal::SampleFormat::I16, cpal::SampleFormat::I32, cpal::SampleFormat::F32],
        SampleFormat::S24Le3 | SampleFormat::S32Le => &[cpal::SampleFormat::I32, cpal::SampleFormat::F32],
    }
}

/// What the device offers, from its supported stream configurations.
///
/// Containers, channel counts and rate ranges are collected separately, so
/// a combination the device never listed is still caught when the
/// parameters are applied.
fn capabilities_from(configs: &[SupportedStreamConfigRange]) -> HwCapabilities {
    let usable: Vec<_> = configs
        .iter()
        .filter(|c| is_supported_native(c.sample_format()))
        .collect();

    let sample_formats = SampleFormat::ALL
        .iter()
        .copied()
        .filter(|container| {
            native_preference(*container)
                .iter()
                .any(|native| usable.iter().any(|c| c.sample_format() == *native))
        })
        .collect();

    let mut channels: Vec<u16> = usable.iter().map(|c| c.channels()).collect();
    channels.sort_unstable();
    channels.dedup();

    let mut rates: Vec<RateRange> = Vec::new();
    for config in &usable {
        let range = RateRange::new(config.min_sample_rate().0, config.max_sample_rate().0);
        if !rates.contains(&range) {
            rates.push(range);
        }
    }

    HwCapabilities {
        transfer_modes: vec![TransferMode::Direct, TransferMode::ReadWrite],
        sample_formats,
        channels,
        rates,
        can_resample: false,
        max_buffer_time: MAX_BUFFER_TIME,
    }
}

fn is_supported_native(format: cpal::SampleFormat) -> bool {
    matches!(
        format,
        cpal::SampleFormat::I16 | cpal::SampleFormat::I32 | cpal::SampleFormat::F32
    )
}

fn frames_for(duration: Duration, rate: u32) -> usize {
    (duration.as_secs_f64() * rate as f64).round() as usize
}

/// Audio callback body: pop whole frames from the ring into `data`.
///
/// Plays silence while stopped or when the ring lock is contended. Running
/// out of queued frames while running is an underrun: the rest of the
/// callback buffer is silence and the device stops consuming.
fn fill_output<T>(
    data: &mut [T],
    consumer: &Mutex<HeapCons<u8>>,
    flags: &CallbackFlags,
    container: SampleFormat,
    channels: usize,
) where
    T: Sample + FromSample<i32>,
{
    if !flags.running.load(Ordering::Acquire) {
        data.fill(T::EQUILIBRIUM);
        return;
    }
    let Ok(mut consumer) = consumer.try_lock() else {
        data.fill(T::EQUILIBRIUM);
        return;
    };

    let sample_bytes = container.bytes();
    let frame_bytes = channels * sample_bytes;
    let mut raw = [0u8; 4];
    let mut played = 0u64;
    let mut starved = false;

    for frame in data.chunks_mut(channels) {
        if starved || consumer.occupied_len() < frame_bytes {
            starved = true;
            frame.fill(T::EQUILIBRIUM);
            continue;
        }
        for sample in frame.iter_mut() {
            consumer.pop_slice(&mut raw[..sample_bytes]);
            *sample = T::from_sample(container.read_sample(&raw));
        }
        played += 1;
    }

    flags.frames_played.fetch_add(played, Ordering::AcqRel);
    if starved {
        flags.running.store(false, Ordering::Release);
        flags.xrun.store(true, Ordering::Release);
        flags.underruns.fetch_add(1, Ordering::AcqRel);
    }
}

impl PcmDevice for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DeviceResult<HwCapabilities> {
        let configs: Vec<_> = self
            .device
            .supported_output_configs()
            .map_err(|e| DeviceError::Backend(format!("Failed to get device configs: {}", e)))?
            .collect();
        Ok(capabilities_from(&configs))
    }

    fn apply_hw_params(&mut self, params: &HwParams) -> DeviceResult<HwSizes> {
        let format = params.format;
        let rate = format.sample_rate;
        let configs: Vec<_> = self
            .device
            .supported_output_configs()
            .map_err(|e| DeviceError::Backend(format!("Failed to get device configs: {}", e)))?
            .collect();

        let chosen = native_preference(format.sample_format)
            .iter()
            .find_map(|native| {
                configs.iter().find(|c| {
                    c.channels() == format.channels
                        && c.sample_format() == *native
                        && c.min_sample_rate().0 <= rate
                        && rate <= c.max_sample_rate().0
                })
            })
            .cloned()
            .ok_or_else(|| {
                DeviceError::InvalidParam(format!("no output configuration for {}", format))
            })?;

        let period_frames = frames_for(params.period_time, rate);
        let buffer_frames = frames_for(params.buffer_time.min(MAX_BUFFER_TIME), rate);
        let buffer_size = match chosen.buffer_size() {
            SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&(period_frames as u32)) =>
            {
                cpal::BufferSize::Fixed(period_frames as u32)
            }
            _ => cpal::BufferSize::Default,
        };

        self.pause_stream();
        self.stream = None;

        let (producer, consumer) = HeapRb::<u8>::new((buffer_frames * format.frame_bytes()).max(1)).split();
        self.producer = Some(producer);
        self.consumer = Some(Arc::new(Mutex::new(consumer)));
        self.stream_config = Some(StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size,
        });
        self.native_format = Some(chosen.sample_format());
        self.format = Some(format);
        self.period_time = params.period_time;
        self.flags.xrun.store(false, Ordering::Release);

        self.stream = Some(self.build_stream()?);
        let sizes = HwSizes { buffer_frames, period_frames };
        self.sizes = Some(sizes);
        self.state = DeviceState::Prepared;

        debug!(
            "Audio config: {} native={:?} buffer={} period={} callback={:?}",
            format,
            chosen.sample_format(),
            buffer_frames,
            period_frames,
            buffer_size
        );
        Ok(sizes)
    }

    fn apply_sw_params(&mut self, params: &SwParams) -> DeviceResult<()> {
        if self.sizes.is_none() {
            return Err(DeviceError::BadState("hardware parameters not set".to_string()));
        }
        self.sw = *params;
        Ok(())
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn avail(&mut self) -> DeviceResult<usize> {
        self.sync_state();
        self.check_usable()?;
        Ok(self.free())
    }

    fn start(&mut self) -> DeviceResult<()> {
        self.sync_state();
        self.check_usable()?;
        if self.state != DeviceState::Prepared {
            return Err(DeviceError::BadState(format!("cannot start from {} state", self.state)));
        }
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| DeviceError::BadState("no output stream".to_string()))?;
        self.flags.xrun.store(false, Ordering::Release);
        self.flags.running.store(true, Ordering::Release);
        stream
            .play()
            .map_err(|e| DeviceError::Backend(format!("Failed to start stream: {}", e)))?;
        self.state = DeviceState::Running;
        debug!("Audio stream started");
        Ok(())
    }

    fn wait(&mut self, timeout: Option<Duration>) -> DeviceResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let avail_min = self.sw.avail_min.max(1);
        loop {
            self.sync_state();
            self.check_usable()?;
            if self.free() >= avail_min {
                return Ok(true);
            }
            if self.state != DeviceState::Running {
                return Ok(false);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            std::thread::sleep(self.poll_interval());
        }
    }

    fn write_interleaved(&mut self, data: &[u8]) -> DeviceResult<usize> {
        self.sync_state();
        self.check_usable()?;
        let fb = self.frame_bytes();
        let offered = data.len() / fb;
        if offered == 0 {
            return Ok(0);
        }
        if self.free() == 0 {
            if self.state == DeviceState::Prepared {
                self.start()?;
            }
            self.wait(None)?;
        }

        let frames = offered.min(self.free());
        let pushed = self.push_frames(&data[..frames * fb]) / fb;
        self.maybe_auto_start()?;
        Ok(pushed)
    }

    fn mmap_begin(&mut self, frames: usize) -> DeviceResult<MmapArea> {
        self.sync_state();
        self.check_usable()?;
        if self.open_window.is_some() {
            return Err(DeviceError::BadState("a window is already open".to_string()));
        }
        let fb = self.frame_bytes();
        let granted = frames.min(self.free());
        self.staging.clear();
        self.staging.resize(granted * fb, 0);
        self.open_window = Some(granted);
        Ok(MmapArea::new(0, granted, fb))
    }

    fn mmap_region(&mut self, area: &MmapArea) -> &mut [u8] {
        let len = area.len_bytes().min(self.staging.len());
        &mut self.staging[..len]
    }

    fn mmap_commit(&mut self, area: MmapArea, frames: usize) -> DeviceResult<usize> {
        if self.open_window != Some(area.frames()) {
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
        self.sync_state();
        self.check_usable()?;

        let bytes = frames * self.frame_bytes();
        let staged = std::mem::take(&mut self.staging);
        let pushed = self.push_frames(&staged[..bytes]) / self.frame_bytes();
        self.staging = staged;
        self.maybe_auto_start()?;
        Ok(pushed)
    }

    fn prepare(&mut self) -> DeviceResult<()> {
        if self.sizes.is_none() {
            return Err(DeviceError::BadState("hardware parameters not set".to_string()));
        }
        if self.flags.suspended.load(Ordering::Acquire) {
            return Err(DeviceError::Suspended);
        }
        self.pause_stream();
        self.clear_ring()?;
        self.flags.xrun.store(false, Ordering::Release);
        self.open_window = None;
        self.state = DeviceState::Prepared;
        Ok(())
    }

    fn resume(&mut self) -> DeviceResult<()> {
        if self.state != DeviceState::Suspended {
            return Err(DeviceError::BadState(format!("cannot resume from {} state", self.state)));
        }
        warn!("Attempting audio stream recovery on '{}'", self.name);

        self.pause_stream();
        self.stream = None;
        match find_device(&self.name) {
            Ok(Some(device)) => self.device = device,
            Ok(None) | Err(_) => return Err(DeviceError::Again),
        }
        let stream = match self.build_stream() {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Stream rebuild failed: {}", e);
                return Err(DeviceError::Again);
            }
        };
        self.stream = Some(stream);
        self.flags.suspended.store(false, Ordering::Release);
        self.flags.xrun.store(false, Ordering::Release);
        self.clear_ring()?;
        self.state = DeviceState::Prepared;
        info!("Audio stream recovery successful");
        Ok(())
    }

    fn drain(&mut self) -> DeviceResult<()> {
        self.sync_state();
        match self.state {
            DeviceState::Suspended => return Err(DeviceError::Suspended),
            DeviceState::Open => return Err(DeviceError::BadState("device not configured".to_string())),
            DeviceState::Prepared if self.queued() > 0 => self.start()?,
            _ => {}
        }

        if self.state == DeviceState::Running {
            self.state = DeviceState::Draining;
            while self.queued() > 0
                && !self.flags.xrun.load(Ordering::Acquire)
                && !self.flags.suspended.load(Ordering::Acquire)
            {
                std::thread::sleep(self.poll_interval());
            }
        }
        self.pause_stream();
        self.state = DeviceState::Setup;
        Ok(())
    }

    fn drop_pending(&mut self) -> DeviceResult<()> {
        self.pause_stream();
        self.clear_ring()?;
        self.open_window = None;
        if self.state != DeviceState::Open {
            self.state = DeviceState::Setup;
        }
        Ok(())
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.pause_stream();
    }
}
