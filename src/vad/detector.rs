//! Microphone capture loop that feeds the level meter and speaking gate.
//!
//! The cpal stream is confined to a dedicated capture thread (streams are not
//! `Send`); the callback only appends samples to a shared buffer. A ~60 Hz
//! tick on the same thread drains the buffer, computes the smoothed level,
//! runs the gate, and emits events. Threshold and hold time are read through
//! shared atomics each tick, so parameter changes apply without a restart.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::Sender;
use tracing::{debug, info};

use super::gate::{SpeakingGate, SpeakingTransition};
use super::meter::LevelMeter;
use super::VadError;
use crate::lock::lock_or_recover;

/// Sampling tick, roughly one display refresh.
const TICK: Duration = Duration::from_millis(16);

const TEST_DEVICES_ENV: &str = "AVATARCAST_TEST_DEVICES";

/// Live-tunable detector parameters, shared with whoever adjusts settings.
pub struct VadParams {
    threshold_bits: AtomicU32,
    hold_ms: AtomicU64,
}

impl VadParams {
    pub fn new(threshold: f32, hold_ms: u64) -> Self {
        Self {
            threshold_bits: AtomicU32::new(threshold.to_bits()),
            hold_ms: AtomicU64::new(hold_ms),
        }
    }

    pub fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold_bits.load(Ordering::Relaxed))
    }

    pub fn set_threshold(&self, threshold: f32) {
        self.threshold_bits
            .store(threshold.to_bits(), Ordering::Relaxed);
    }

    pub fn hold_ms(&self) -> u64 {
        self.hold_ms.load(Ordering::Relaxed)
    }

    pub fn set_hold_ms(&self, hold_ms: u64) {
        self.hold_ms.store(hold_ms, Ordering::Relaxed);
    }
}

/// Events emitted by the sampling loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    /// Smoothed loudness, 0-100, one per tick while capturing.
    Level(f32),
    /// Speaking flag flipped; emitted once per actual change.
    Speaking(bool),
}

struct ActiveCapture {
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    device_name: String,
}

pub struct VoiceActivityDetector {
    params: Arc<VadParams>,
    events_tx: Sender<VadEvent>,
    active: Option<ActiveCapture>,
}

impl VoiceActivityDetector {
    pub fn new(params: Arc<VadParams>, events_tx: Sender<VadEvent>) -> Self {
        Self {
            params,
            events_tx,
            active: None,
        }
    }

    /// Acquire an input device and begin sampling. Replaces any prior active
    /// capture. Returns the device name on success; on failure the detector
    /// is left stopped and no retry is scheduled.
    pub fn start(&mut self, selector: Option<&str>) -> Result<String, VadError> {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker = spawn_capture_thread(
            selector.map(str::to_owned),
            self.params.clone(),
            self.events_tx.clone(),
            stop.clone(),
            ready_tx,
        );

        match ready_rx.recv() {
            Ok(Ok(device_name)) => {
                info!("voice detection started on '{device_name}'");
                self.active = Some(ActiveCapture {
                    stop,
                    worker: Some(worker),
                    device_name: device_name.clone(),
                });
                Ok(device_name)
            }
            Ok(Err(err)) => {
                let _ = worker.join();
                Err(err)
            }
            Err(_) => {
                // Capture thread died before reporting; treat as unavailable.
                let _ = worker.join();
                Err(VadError::DeviceUnavailable {
                    reason: "capture thread exited during startup".to_string(),
                })
            }
        }
    }

    /// Halt sampling and release the device. No-op when not started. Any
    /// pending hold timer dies with the capture thread's gate.
    pub fn stop(&mut self) {
        if let Some(mut capture) = self.active.take() {
            capture.stop.store(true, Ordering::Relaxed);
            if let Some(worker) = capture.worker.take() {
                let _ = worker.join();
            }
            info!("voice detection stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.device_name.as_str())
    }
}

impl Drop for VoiceActivityDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Names of available audio input devices.
///
/// `AVATARCAST_TEST_DEVICES` overrides enumeration so CLI tests can run on
/// machines without audio hardware.
pub fn list_input_devices() -> Result<Vec<String>, VadError> {
    if let Ok(fake) = std::env::var(TEST_DEVICES_ENV) {
        return Ok(fake
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect());
    }
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|err| VadError::DeviceUnavailable {
            reason: format!("cannot enumerate input devices: {err}"),
        })?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

fn resolve_device(selector: Option<&str>) -> Result<cpal::Device, VadError> {
    let host = cpal::default_host();
    match selector {
        Some(wanted) => {
            let devices = host
                .input_devices()
                .map_err(|err| VadError::DeviceUnavailable {
                    reason: format!("cannot enumerate input devices: {err}"),
                })?;
            for device in devices {
                if let Ok(name) = device.name() {
                    if name.contains(wanted) {
                        return Ok(device);
                    }
                }
            }
            Err(VadError::DeviceUnavailable {
                reason: format!("no input device matching '{wanted}'"),
            })
        }
        None => host
            .default_input_device()
            .ok_or_else(|| VadError::DeviceUnavailable {
                reason: "no default input device".to_string(),
            }),
    }
}

fn spawn_capture_thread(
    selector: Option<String>,
    params: Arc<VadParams>,
    events_tx: Sender<VadEvent>,
    stop: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<Result<String, VadError>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (stream, device_name) = match build_stream(selector.as_deref()) {
            Ok((stream, name, buffer)) => {
                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(VadError::DeviceUnavailable {
                        reason: format!("cannot start input stream: {err}"),
                    }));
                    return;
                }
                let _ = ready_tx.send(Ok(name.clone()));
                run_tick_loop(&params, &events_tx, &stop, &buffer);
                (stream, name)
            }
            Err(err) => {
                let _ = ready_tx.send(Err(err));
                return;
            }
        };
        drop(stream);
        debug!("capture thread for '{device_name}' exited");
    })
}

type SampleBuffer = Arc<Mutex<Vec<f32>>>;

fn build_stream(selector: Option<&str>) -> Result<(cpal::Stream, String, SampleBuffer), VadError> {
    let device = resolve_device(selector)?;
    let name = device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string());
    let config = device
        .default_input_config()
        .map_err(|err| VadError::DeviceUnavailable {
            reason: format!("no usable input config on '{name}': {err}"),
        })?;

    let buffer: SampleBuffer = Arc::new(Mutex::new(Vec::new()));
    let channels = config.channels() as usize;
    let stream_config: cpal::StreamConfig = config.config();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_typed_stream::<f32>(&device, &stream_config, channels, buffer.clone())
        }
        cpal::SampleFormat::I16 => {
            build_typed_stream::<i16>(&device, &stream_config, channels, buffer.clone())
        }
        cpal::SampleFormat::U16 => {
            build_typed_stream::<u16>(&device, &stream_config, channels, buffer.clone())
        }
        other => Err(VadError::DeviceUnavailable {
            reason: format!("unsupported sample format {other} on '{name}'"),
        }),
    }?;

    Ok((stream, name, buffer))
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    buffer: SampleBuffer,
) -> Result<cpal::Stream, VadError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut buffer = lock_or_recover(&buffer, "capture buffer");
                // Downmix interleaved frames to mono by averaging channels.
                for frame in data.chunks(channels.max(1)) {
                    let sum: f32 = frame.iter().map(|s| f32::from_sample(*s)).sum();
                    buffer.push(sum / frame.len() as f32);
                }
            },
            |err| debug!("input stream error: {err}"),
            None,
        )
        .map_err(|err| VadError::DeviceUnavailable {
            reason: format!("cannot open input stream: {err}"),
        })
}

fn run_tick_loop(
    params: &VadParams,
    events_tx: &Sender<VadEvent>,
    stop: &AtomicBool,
    buffer: &SampleBuffer,
) {
    let mut meter = LevelMeter::default();
    let mut gate = SpeakingGate::new(params.threshold(), params.hold_ms());
    let started = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        thread::sleep(TICK);
        let samples = {
            let mut buffer = lock_or_recover(buffer, "capture drain");
            std::mem::take(&mut *buffer)
        };

        gate.set_threshold(params.threshold());
        gate.set_hold_ms(params.hold_ms());

        let level = meter.level(&samples);
        let now_ms = started.elapsed().as_millis() as u64;
        if events_tx.send(VadEvent::Level(level)).is_err() {
            break;
        }
        if let Some(transition) = gate.on_level(level, now_ms) {
            let speaking = matches!(transition, SpeakingTransition::Started);
            if events_tx.send(VadEvent::Speaking(speaking)).is_err() {
                break;
            }
        }
    }
}
