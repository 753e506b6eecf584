// src/audio_io.rs

use crate::audio_engine::{AudioEngine, RenderStatus, RestartFlag};
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Owns the platform output stream and the restart handling around it.
///
/// The engine sits behind a mutex that is only ever contended for the
/// moment a stream is torn down and rebuilt; the callback uses `try_lock`
/// and emits silence rather than blocking.
pub struct AudioIo {
    engine: Arc<Mutex<AudioEngine>>,
    restart: RestartFlag,
    xrun_count: Arc<AtomicUsize>,
    stream: Option<Stream>,
    sample_rate: u32,
}

impl AudioIo {
    pub fn new(engine: AudioEngine, restart: RestartFlag) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            restart,
            xrun_count: Arc::new(AtomicUsize::new(0)),
            stream: None,
            sample_rate: 0,
        }
    }

    /// Stream error count so far (xruns, device hiccups).
    pub fn xrun_count(&self) -> usize {
        self.xrun_count.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Open the default output device and start rendering.
    pub fn start(&mut self) -> Result<u32> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device"))?;
        println!("Using output device: {}", device.name()?);

        let default_config = device.default_output_config()?;
        let sample_format = default_config.sample_format();
        let config: StreamConfig = default_config.into();

        let stream = match sample_format {
            SampleFormat::F32 => self.build_stream::<f32>(&device, &config)?,
            SampleFormat::I16 => self.build_stream::<i16>(&device, &config)?,
            SampleFormat::U16 => self.build_stream::<u16>(&device, &config)?,
            format => return Err(anyhow::anyhow!("Unsupported sample format {}", format)),
        };
        stream.play()?;

        self.sample_rate = config.sample_rate.0;
        self.stream = Some(stream);
        println!("Output stream running at {} Hz", self.sample_rate);
        Ok(self.sample_rate)
    }

    /// Tear down and rebuild the stream if a device-change request is
    /// pending. Returns whether a restart happened; failures go back to
    /// the caller, who owns retry policy.
    pub fn poll_restart(&mut self) -> Result<bool> {
        if !self.restart.take() {
            return Ok(false);
        }
        println!("Device change: restarting output stream");
        self.stream = None;
        self.start()?;
        Ok(true)
    }

    fn build_stream<T>(&self, device: &Device, config: &StreamConfig) -> Result<Stream>
    where
        T: Sample + cpal::SizedSample + FromSample<f32>,
    {
        let channels = config.channels as usize;
        let engine = self.engine.clone();
        let err_fn = {
            let xrun_count = self.xrun_count.clone();
            move |err| {
                eprintln!("an error occurred on output stream: {}", err);
                xrun_count.fetch_add(1, Ordering::Relaxed);
            }
        };

        let mut render_buffer: Vec<f32> = Vec::new();

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                render_buffer.resize(frames * 2, 0.0);

                let status = match engine.try_lock() {
                    Ok(mut engine) => engine.render(&mut render_buffer),
                    Err(_) => {
                        // Restart in progress; stay silent for one block.
                        render_buffer.fill(0.0);
                        RenderStatus::Continue
                    }
                };
                if status == RenderStatus::Stop {
                    render_buffer.fill(0.0);
                }

                for (i, frame) in data.chunks_mut(channels.max(1)).enumerate() {
                    let l = render_buffer.get(i * 2).copied().unwrap_or(0.0);
                    let r = render_buffer.get(i * 2 + 1).copied().unwrap_or(0.0);
                    match frame.len() {
                        0 => {}
                        1 => frame[0] = T::from_sample((l + r) * 0.5),
                        _ => {
                            frame[0] = T::from_sample(l);
                            frame[1] = T::from_sample(r);
                            for sample in frame.iter_mut().skip(2) {
                                *sample = T::from_sample(0.0);
                            }
                        }
                    }
                }
            },
            err_fn,
            None,
        )?;
        Ok(stream)
    }
}
