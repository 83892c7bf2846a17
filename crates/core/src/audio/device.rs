//! Live capture through the platform audio host (`cpal`).

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use super::{AudioSource, BlockAssembler, InputDeviceInfo, SampleBlock};
use crate::{AudioConfig, LightingError, Result};

const CALLBACK_QUEUE: usize = 64;
const REOPEN_INTERVAL: Duration = Duration::from_secs(2);

pub(super) fn list_input_devices() -> Result<Vec<InputDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|device| device.name().ok());
    let devices = host
        .input_devices()
        .map_err(|err| LightingError::NoAudioSubsystem(err.to_string()))?;

    Ok(devices
        .map(|device| {
            let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
            let is_default = default_name.as_deref() == Some(name.as_str());
            InputDeviceInfo { name, is_default }
        })
        .collect())
}

/// Captures mono blocks from a sound card.
///
/// The hardware callback only mixes down to mono and `try_send`s the buffer;
/// when the queue is full the buffer is dropped and counted rather than
/// blocking the audio thread.
pub struct DeviceSource {
    config: AudioConfig,
    device_name: String,
    stream: Option<cpal::Stream>,
    sender: Sender<Vec<f32>>,
    receiver: Receiver<Vec<f32>>,
    failed: Arc<AtomicBool>,
    overflows: Arc<AtomicU64>,
    assembler: BlockAssembler,
    ready: VecDeque<SampleBlock>,
    last_open_attempt: Instant,
}

impl DeviceSource {
    /// Opens the configured device, or the host default when no name is set
    /// or the named device is missing.
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let (sender, receiver) = bounded(CALLBACK_QUEUE);
        let mut source = Self {
            config: config.clone(),
            device_name: String::new(),
            stream: None,
            sender,
            receiver,
            failed: Arc::new(AtomicBool::new(false)),
            overflows: Arc::new(AtomicU64::new(0)),
            assembler: BlockAssembler::new(config.sample_rate, config.block_size),
            ready: VecDeque::new(),
            last_open_attempt: Instant::now(),
        };
        source.start_stream()?;
        Ok(source)
    }

    fn select_device(&self) -> Result<Device> {
        let host = cpal::default_host();
        if let Some(wanted) = self.config.device_name.as_deref() {
            let devices = host
                .input_devices()
                .map_err(|err| LightingError::NoAudioSubsystem(err.to_string()))?;
            for device in devices {
                if device.name().map(|name| name == wanted).unwrap_or(false) {
                    return Ok(device);
                }
            }
            tracing::warn!(device = wanted, "input device not found, using system default");
        }
        host.default_input_device()
            .ok_or_else(|| LightingError::NoAudioSubsystem("no default input device".to_string()))
    }

    fn start_stream(&mut self) -> Result<()> {
        self.last_open_attempt = Instant::now();
        let device = self.select_device()?;
        let supported = device
            .default_input_config()
            .map_err(|err| LightingError::NoAudioSubsystem(err.to_string()))?;
        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => self.build_stream::<f32>(&device, &stream_config)?,
            SampleFormat::I16 => self.build_stream::<i16>(&device, &stream_config)?,
            SampleFormat::U16 => self.build_stream::<u16>(&device, &stream_config)?,
            SampleFormat::I32 => self.build_stream::<i32>(&device, &stream_config)?,
            other => {
                return Err(LightingError::NoAudioSubsystem(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|err| LightingError::DeviceLost(err.to_string()))?;

        self.device_name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
        self.failed.store(false, Ordering::SeqCst);
        self.stream = Some(stream);
        tracing::info!(
            device = %self.device_name,
            sample_rate = self.config.sample_rate,
            channels = stream_config.channels,
            "audio capture started"
        );
        Ok(())
    }

    fn build_stream<T>(&self, device: &Device, config: &StreamConfig) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
    {
        let channels = usize::from(config.channels.max(1));
        let sender = self.sender.clone();
        let overflows = self.overflows.clone();
        let failed = self.failed.clone();

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let mono: Vec<f32> = data
                        .chunks(channels)
                        .map(|frame| {
                            let sum: f32 = frame
                                .iter()
                                .map(|sample| cpal::Sample::to_sample::<f32>(*sample))
                                .sum();
                            sum / frame.len() as f32
                        })
                        .collect();
                    if let Err(TrySendError::Full(_)) = sender.try_send(mono) {
                        overflows.fetch_add(1, Ordering::Relaxed);
                    }
                },
                move |err| {
                    tracing::warn!(error = %err, "audio stream error");
                    failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|err| LightingError::NoAudioSubsystem(err.to_string()))
    }

    fn try_reopen(&mut self) {
        if self.last_open_attempt.elapsed() < REOPEN_INTERVAL {
            return;
        }
        self.stream = None;
        if let Err(err) = self.start_stream() {
            tracing::debug!(error = %err, "audio device still unavailable");
        }
    }
}

impl AudioSource for DeviceSource {
    fn next_block(&mut self) -> Result<SampleBlock> {
        loop {
            if let Some(block) = self.ready.pop_front() {
                return Ok(block);
            }

            if self.stream.is_none() || self.failed.load(Ordering::SeqCst) {
                self.try_reopen();
                if self.stream.is_none() || self.failed.load(Ordering::SeqCst) {
                    return Err(LightingError::DeviceLost(format!(
                        "input device `{}` unavailable",
                        self.device_name
                    )));
                }
            }

            let timeout = self.config.block_duration() * 8;
            match self.receiver.recv_timeout(timeout) {
                Ok(chunk) => self.ready.extend(self.assembler.push(&chunk)),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(LightingError::DeviceLost("input underrun".to_string()))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.failed.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn block_size(&self) -> usize {
        self.config.block_size
    }

    fn describe(&self) -> String {
        format!("input device `{}`", self.device_name)
    }

    fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}
