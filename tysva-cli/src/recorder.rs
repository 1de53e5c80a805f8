//! Microphone capture to WAV files the server can transcribe.

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use hound::{WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An in-progress recording. The cpal stream is not `Send`, so it lives on
/// its own thread until `stop` is called.
pub struct Recording {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<PathBuf>>,
}

impl Recording {
    /// Opens the default input device and starts capturing into
    /// `dir/<uuid>.wav`. Fails immediately when no device is usable.
    pub fn start(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.wav", uuid::Uuid::new_v4()));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let stop_flag = stop.clone();
        let handle = std::thread::spawn(move || capture(path, stop_flag, ready_tx));

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop, handle }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow!("recording thread exited before starting")),
        }
    }

    /// Stops capturing and returns the path of the finished WAV file.
    pub fn stop(self) -> Result<PathBuf> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .join()
            .map_err(|_| anyhow!("recording thread panicked"))?
    }
}

fn capture(path: PathBuf, stop: Arc<AtomicBool>, ready: mpsc::Sender<Result<()>>) -> Result<PathBuf> {
    let samples = Arc::new(Mutex::new(Vec::<f32>::new()));

    let opened = open_stream(samples.clone());
    let (stream, sample_rate) = match opened {
        Ok(opened) => {
            let _ = ready.send(Ok(()));
            opened
        }
        Err(e) => {
            let message = e.to_string();
            let _ = ready.send(Err(e));
            return Err(anyhow!(message));
        }
    };

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(POLL_INTERVAL);
    }
    drop(stream);

    let samples = samples.lock().map_err(|_| anyhow!("sample buffer poisoned"))?;
    write_wav(&path, &samples, sample_rate)?;
    info!(
        "Recorded {:.1}s of audio to {}",
        samples.len() as f32 / sample_rate as f32,
        path.display()
    );
    Ok(path)
}

fn open_stream(samples: Arc<Mutex<Vec<f32>>>) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no default input device available"))?;
    let supported = device.default_input_config()?;
    let channels = supported.channels();
    let sample_rate = supported.sample_rate().0;
    let config: StreamConfig = supported.config();
    info!(
        "Recording from {} ({} Hz, {} channel(s), {:?})",
        device.name().unwrap_or_default(),
        sample_rate,
        channels,
        supported.sample_format()
    );

    let on_error = |err: cpal::StreamError| error!("Audio input error: {}", err);
    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = samples.lock() {
                    buf.extend(downmix(data, channels));
                }
            },
            on_error,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let data: Vec<f32> = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                if let Ok(mut buf) = samples.lock() {
                    buf.extend(downmix(&data, channels));
                }
            },
            on_error,
            None,
        )?,
        other => return Err(anyhow!("unsupported input sample format {:?}", other)),
    };
    stream.play()?;
    Ok((stream, sample_rate))
}

/// Averages interleaved frames down to mono.
pub fn downmix(data: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Writes mono 16-bit PCM.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        let sample = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
