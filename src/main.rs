use std::thread;
use std::time::{Duration, Instant};

use docopt::Docopt;
use log::error;
use serde::Deserialize;

mod apu;
mod audio;
mod bus;
mod cart;
mod mapper;
mod nes;
mod ram;

use crate::audio::AudioDevice;
use crate::bus::Bus;
use crate::cart::Cart;
use crate::nes::{Nes, Processor, Video, CYCLES_PER_FRAME};

const USAGE: &'static str = "
Usage:

nesonic <rom> [--silent] [--frames=<n>]

Options:
  --silent      Run without opening an audio output device.
  --frames=<n>  Number of video frames to run before exiting [default: 600].
";

const FRAMES_PER_SECOND: f64 = 60.0;

#[derive(Deserialize)]
struct Args {
  arg_rom: String,
  flag_silent: bool,
  flag_frames: u32,
}

/// Stand-in picture unit: counts bus cycles and raises the frame-output
/// signal once per frame's worth of them.
struct Raster {
  cycle: u32,
  frame: bool,
  #[allow(dead_code)]
  oam: [u8; 256],
}

impl Raster {
  fn new() -> Raster {
    Raster {
      cycle: 0,
      frame: false,
      oam: [0x00; 256],
    }
  }
}

impl Video for Raster {
  fn clock(&mut self) {
    self.cycle += 1;
    if self.cycle == CYCLES_PER_FRAME {
      self.cycle = 0;
      self.frame = true;
    }
  }

  fn take_frame(&mut self) -> bool {
    let frame = self.frame;
    self.frame = false;
    frame
  }

  fn write_oam(&mut self, addr: u8, data: u8) {
    self.oam[addr as usize] = data;
  }
}

/// Stand-in processor that programs the sound registers from a fixed
/// score, one batch of writes per frame interrupt, the way a game's NMI
/// handler would.
struct Playback {
  // (frame, register, value)
  score: Vec<(u32, u16, u8)>,
  frame: u32,
  pos: usize,
}

impl Playback {
  /// A short pulse arpeggio over a triangle bass line, with a noise tick
  /// every half second. Timer periods are CPU_HZ / (16 * freq) - 1.
  fn demo() -> Playback {
    let mut score: Vec<(u32, u16, u8)> = vec![
      // Pulse A: 50% duty, halted length, constant volume 8, sweep off.
      (0, 0x4000, 0xB8),
      (0, 0x4001, 0x00),
      // Triangle: control flag set, long linear reload.
      (0, 0x4008, 0xFF),
      // Noise: envelope decay with period 4, mode 0, a fast timer.
      (0, 0x400C, 0x04),
      (0, 0x400E, 0x04),
    ];

    // A3, C#4, E4, A4 timer periods.
    let arpeggio: [u16; 4] = [507, 402, 319, 253];
    for bar in 0..8u32 {
      for (i, &period) in arpeggio.iter().enumerate() {
        let frame = bar * 64 + (i as u32) * 16;
        score.push((frame, 0x4002, (period & 0xFF) as u8));
        score.push((frame, 0x4003, ((period >> 8) as u8 & 0x07) | 0x18));
      }
      // Triangle an octave below pulse A's root, retriggered per bar.
      score.push((bar * 64, 0x400A, (1015 & 0xFF) as u8));
      score.push((bar * 64, 0x400B, (1015 >> 8) as u8 | 0x18));
      // Noise hit on the half bar, decaying over its length.
      score.push((bar * 64 + 32, 0x400F, 0x20));
    }
    score.sort_by_key(|&(frame, _, _)| frame);

    Playback {
      score,
      frame: 0,
      pos: 0,
    }
  }
}

impl Processor for Playback {
  fn step(&mut self, _bus: &mut dyn Bus) {}

  fn interrupt(&mut self, bus: &mut dyn Bus) {
    while self.pos < self.score.len() && self.score[self.pos].0 <= self.frame {
      let (_, addr, data) = self.score[self.pos];
      bus.write(addr, data);
      self.pos += 1;
    }
    self.frame += 1;
  }
}

fn main() {
  env_logger::init();

  let args: Args = Docopt::new(USAGE)
    .and_then(|d| d.deserialize())
    .unwrap_or_else(|e| e.exit());

  let cart = match Cart::from_file(&args.arg_rom) {
    Ok(c) => c,
    Err(msg) => panic!("{}", msg),
  };

  let mut nes = Nes::new(cart, Playback::demo(), Raster::new());

  let mut device = None;
  if !args.flag_silent {
    match AudioDevice::open() {
      Ok(mut d) => match d.play(nes.apu_handle()) {
        Ok(()) => device = Some(d),
        Err(msg) => error!("audio device unusable, running without sound: {}", msg),
      },
      Err(msg) => error!("no audio device, running without sound: {}", msg),
    }
  }

  // Fixed-rate pacing: step a frame's worth of bus cycles, then sleep off
  // whatever is left of the frame budget.
  let frame_budget = Duration::from_secs_f64(1.0 / FRAMES_PER_SECOND);
  for _ in 0..args.flag_frames {
    let start = Instant::now();
    nes.frame();
    let elapsed = start.elapsed();
    if elapsed < frame_budget {
      thread::sleep(frame_budget - elapsed);
    }
  }

  if let Some(mut d) = device {
    d.close();
  }
}
