use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, info};

use crate::apu::Apu;

/// Output sink wrapping the host's default audio device. The device pulls
/// samples through a callback that locks the shared APU; the machine side
/// takes the same lock in its register path, and that lock is the whole
/// synchronization story.
pub struct AudioDevice {
  device: cpal::Device,
  stream: Option<cpal::Stream>,
}

impl AudioDevice {
  /// A missing output device is a reportable condition, not a fatal one;
  /// the machine runs fine without a sink.
  pub fn open() -> Result<AudioDevice, &'static str> {
    let host = cpal::default_host();
    let device = host
      .default_output_device()
      .ok_or("No audio output device available")?;

    Ok(AudioDevice {
      device,
      stream: None,
    })
  }

  pub fn play(&mut self, apu: Arc<Mutex<Apu>>) -> Result<(), &'static str> {
    if let Ok(name) = self.device.name() {
      info!("audio output device: {}", name);
    }

    let config = self
      .device
      .default_output_config()
      .map_err(|_| "No default output config for audio device")?;
    info!("audio output config: {:?}", config);

    match config.sample_format() {
      cpal::SampleFormat::F32 => self.run::<f32>(&config.into(), apu),
      cpal::SampleFormat::I16 => self.run::<i16>(&config.into(), apu),
      cpal::SampleFormat::U16 => self.run::<u16>(&config.into(), apu),
    }
  }

  fn run<T>(&mut self, config: &cpal::StreamConfig, apu: Arc<Mutex<Apu>>) -> Result<(), &'static str>
  where
    T: cpal::Sample,
  {
    let sample_rate = config.sample_rate.0 as f32;
    let channels = config.channels as usize;

    // The chip needs the device's rate before it can size its cycle
    // accumulators.
    apu.lock().unwrap().set_sample_rate(sample_rate);

    let mut mono: Vec<f32> = vec![];
    let stream = self
      .device
      .build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
          let num_frames = data.len() / channels;
          mono.resize(num_frames, 0.0);
          apu.lock().unwrap().produce(&mut mono);

          // Mono source, replicated across however many channels the
          // device wants.
          for (frame, value) in data.chunks_mut(channels).zip(mono.iter()) {
            let value: T = cpal::Sample::from::<f32>(value);
            for sample in frame.iter_mut() {
              *sample = value;
            }
          }
        },
        |err| error!("audio stream error: {}", err),
      )
      .map_err(|_| "Failed to build audio output stream")?;
    stream
      .play()
      .map_err(|_| "Failed to start audio output stream")?;
    self.stream = Some(stream);

    Ok(())
  }

  /// Dropping the stream stops the device from calling back in.
  pub fn close(&mut self) {
    self.stream.take();
  }
}
