use log::warn;

// https://www.nesdev.org/wiki/Cycle_reference_chart
//
// NTSC 2A03 CPU clock. Sample synthesis converts this to cycles-per-sample
// against whatever rate the audio sink runs at.
const CPU_CLOCK_HZ: f32 = 1_789_773.0;

/// Pulse duty sequences, 8 steps each, selected by bits 6-7 of $4000/$4004.
///
/// https://www.nesdev.org/wiki/APU_Pulse
const DUTY_WAVEFORMS: [[u8; 8]; 4] = [
  [0, 1, 0, 0, 0, 0, 0, 0], // 12.5%
  [0, 1, 1, 0, 0, 0, 0, 0], // 25%
  [0, 1, 1, 1, 1, 0, 0, 0], // 50%
  [1, 0, 0, 1, 1, 1, 1, 1], // 75% (25% negated)
];

/// Length counter values indexed by the 5-bit load field of the length
/// registers.
///
/// https://www.nesdev.org/wiki/APU_Length_Counter#Table_structure
const LENGTH_TABLE: [u8; 32] = [
  10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, //
  12, 16, 24, 18, 48, 20, 96, 22, 192, 24, 72, 26, 16, 28, 32, 30,
];

/// 32-step triangle ramp, 0 up to 15 and back down.
const TRIANGLE_WAVE: [u8; 32] = [
  0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, //
  15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0,
];

/// NTSC noise timer periods, indexed by bits 0-3 of $400E.
///
/// https://www.nesdev.org/wiki/APU_Noise
const NOISE_PERIOD_TABLE: [u16; 16] = [
  4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

/// Volume decay sub-unit shared by the pulse and noise channels.
///
/// https://www.nesdev.org/wiki/APU_Envelope
struct Envelope {
  loop_flag: bool,
  constant: bool,
  /// Doubles as the constant volume level when `constant` is set.
  period: u8,
  counter: u8,
  volume: u8,
  start: bool,
}

impl Envelope {
  fn new() -> Envelope {
    Envelope {
      loop_flag: false,
      constant: false,
      period: 0,
      counter: 0,
      volume: 0,
      start: false,
    }
  }

  fn clock(&mut self) {
    if self.start {
      self.start = false;
      self.volume = 15;
      self.counter = self.period;
    } else if !self.constant && self.counter > 0 {
      self.counter -= 1;
      if self.counter == 0 {
        if self.volume > 0 {
          self.volume -= 1;
        } else if self.loop_flag {
          self.volume = 15;
        }
        self.counter = self.period;
      }
    }
  }
}

/// 8-bit countdown that silences its channel when it expires. The halt flag
/// suppresses the decrement, never the disable.
struct LengthCounter {
  counter: u8,
  halt: bool,
}

impl LengthCounter {
  fn new() -> LengthCounter {
    LengthCounter {
      counter: 0,
      halt: false,
    }
  }

  /// Returns true exactly when the counter reaches zero on this clock; the
  /// owning channel disables itself in response.
  fn clock(&mut self) -> bool {
    if !self.halt && self.counter > 0 {
      self.counter -= 1;
      return self.counter == 0;
    }
    false
  }
}

/// Automatic timer-period ramp for the pulse channels.
///
/// https://www.nesdev.org/wiki/APU_Sweep
struct Sweep {
  enabled: bool,
  period: u8,
  negate: bool,
  shift: u8,
  counter: u8,
  reload: bool,
}

impl Sweep {
  fn new() -> Sweep {
    Sweep {
      enabled: false,
      period: 0,
      negate: false,
      shift: 0,
      counter: 0,
      reload: false,
    }
  }
}

/// Triangle gating counter, reloaded by $400B and pinned while the control
/// flag holds the reload bit set.
struct LinearCounter {
  counter: u8,
  reload_value: u8,
  reload: bool,
  control: bool,
}

impl LinearCounter {
  fn new() -> LinearCounter {
    LinearCounter {
      counter: 0,
      reload_value: 0,
      reload: false,
      control: false,
    }
  }

  fn clock(&mut self) {
    if self.reload {
      self.counter = self.reload_value;
    } else if self.counter > 0 {
      self.counter -= 1;
    }
    // While the control flag is set the reload flag never self-clears,
    // holding the counter at its reload value.
    if !self.control {
      self.reload = false;
    }
  }
}

pub struct Pulse {
  enabled: bool,
  duty: u8,
  duty_pos: u8,
  /// 11-bit timer period in CPU cycles.
  timer: u16,
  timer_counter: f32,
  /// Audible volume, tracked from the envelope or pinned by constant mode.
  volume: u8,
  envelope: Envelope,
  sweep: Sweep,
  length: LengthCounter,
  /// Pulse A's sweep adder uses the ones' complement on negate (target is
  /// `timer - change - 1`); pulse B's only ever adds.
  ones_complement: bool,
}

impl Pulse {
  fn new(ones_complement: bool) -> Pulse {
    Pulse {
      enabled: false,
      duty: 0,
      duty_pos: 0,
      timer: 0,
      timer_counter: 0.0,
      volume: 0,
      envelope: Envelope::new(),
      sweep: Sweep::new(),
      length: LengthCounter::new(),
      ones_complement,
    }
  }

  /// $4000/$4004: duty (bits 6-7), envelope loop/constant/period (bits 0-5).
  fn write_ctrl(&mut self, data: u8) {
    self.duty = (data >> 6) & 0x03;
    self.envelope.loop_flag = data & 0x20 != 0;
    self.envelope.constant = data & 0x10 != 0;
    self.envelope.period = data & 0x0F;
    self.length.halt = self.envelope.loop_flag;
    self.volume = if self.envelope.constant {
      self.envelope.period
    } else {
      15
    };
  }

  /// $4001/$4005: sweep config; flags the divider for reload.
  fn write_sweep(&mut self, data: u8) {
    self.sweep.enabled = data & 0x80 != 0;
    self.sweep.period = (data >> 4) & 0x07;
    self.sweep.negate = data & 0x08 != 0;
    self.sweep.shift = data & 0x07;
    self.sweep.reload = true;
  }

  /// $4002/$4006: low 8 bits of the timer.
  fn write_timer_lo(&mut self, data: u8) {
    self.timer = (self.timer & 0x0700) | data as u16;
  }

  /// $4003/$4007: timer bits 8-10 and length load. Loads the length only
  /// when the channel is already enabled, then resets the waveform phase,
  /// force-enables, and flags an envelope restart.
  fn write_timer_hi(&mut self, data: u8) {
    self.timer = (self.timer & 0x00FF) | (((data & 0x07) as u16) << 8);
    if self.enabled {
      self.length.counter = LENGTH_TABLE[((data >> 3) & 0x1F) as usize];
    }
    self.duty_pos = 0;
    self.enabled = true;
    self.envelope.start = true;
  }

  fn clock_envelope_and_length(&mut self) {
    self.envelope.clock();
    if !self.envelope.constant {
      self.volume = self.envelope.volume;
    }
    if self.length.clock() {
      self.enabled = false;
    }
  }

  fn clock_sweep(&mut self) {
    if self.sweep.reload {
      self.sweep.counter = self.sweep.period;
      self.sweep.reload = false;
    } else if self.sweep.counter > 0 {
      self.sweep.counter -= 1;
    } else {
      self.sweep.counter = self.sweep.period;
      if self.sweep.enabled && self.sweep.shift > 0 && self.timer >= 8 {
        let change = self.timer >> self.sweep.shift;
        let target = if self.ones_complement && self.sweep.negate {
          self.timer - change - 1
        } else {
          // Pulse B's adder carry is wired so that it only ever adds,
          // negate flag or not.
          self.timer + change
        };
        if target <= 0x07FF {
          self.timer = target;
        } else {
          self.enabled = false;
        }
      }
    }
  }

  /// One output sample. Advances the duty position whenever the fractional
  /// cycle accumulator crosses zero.
  fn sample(&mut self, cycles_per_sample: f32) -> f32 {
    if !self.enabled || self.timer == 0 {
      return 0.0;
    }
    self.timer_counter -= cycles_per_sample;
    if self.timer_counter <= 0.0 {
      self.duty_pos = (self.duty_pos + 1) % 8;
      self.timer_counter += (self.timer + 1) as f32;
    }
    if DUTY_WAVEFORMS[self.duty as usize][self.duty_pos as usize] != 0 {
      self.volume as f32 / 15.0
    } else {
      0.0
    }
  }

  #[cfg(test)]
  pub fn length_counter(&self) -> u8 {
    self.length.counter
  }
}

pub struct Triangle {
  enabled: bool,
  timer: u16,
  timer_counter: f32,
  wave_pos: u8,
  linear: LinearCounter,
  length: LengthCounter,
}

impl Triangle {
  fn new() -> Triangle {
    Triangle {
      enabled: false,
      timer: 0,
      timer_counter: 0.0,
      wave_pos: 0,
      linear: LinearCounter::new(),
      length: LengthCounter::new(),
    }
  }

  /// $4008: control flag (bit 7) and linear counter reload value;
  /// force-enables the channel. The control flag also halts the length
  /// counter.
  fn write_ctrl(&mut self, data: u8) {
    self.linear.control = data & 0x80 != 0;
    self.linear.reload_value = data & 0x7F;
    self.length.halt = self.linear.control;
    self.enabled = true;
  }

  /// $400A: low 8 bits of the timer.
  fn write_timer_lo(&mut self, data: u8) {
    self.timer = (self.timer & 0x0700) | data as u16;
  }

  /// $400B: timer bits 8-10, unconditional length load, flags a linear
  /// counter reload, resets the waveform phase.
  fn write_timer_hi(&mut self, data: u8) {
    self.timer = (self.timer & 0x00FF) | (((data & 0x07) as u16) << 8);
    self.length.counter = LENGTH_TABLE[((data >> 3) & 0x1F) as usize];
    self.linear.reload = true;
    self.wave_pos = 0;
  }

  fn clock_counters(&mut self) {
    self.linear.clock();
    if self.length.clock() {
      self.enabled = false;
    }
  }

  fn sample(&mut self, cycles_per_sample: f32) -> f32 {
    if !self.enabled || self.timer == 0 || self.length.counter == 0 || self.linear.counter == 0 {
      return 0.0;
    }
    self.timer_counter -= cycles_per_sample;
    if self.timer_counter <= 0.0 {
      self.wave_pos = (self.wave_pos + 1) % 32;
      self.timer_counter += (self.timer + 1) as f32;
    }
    TRIANGLE_WAVE[self.wave_pos as usize] as f32 / 15.0
  }
}

pub struct Noise {
  enabled: bool,
  mode: bool,
  period_index: u8,
  /// Derived from `period_index` at synthesis time.
  timer: u16,
  timer_counter: f32,
  /// 15-bit LFSR; must never be observed as zero.
  lfsr: u16,
  volume: u8,
  envelope: Envelope,
  length: LengthCounter,
}

impl Noise {
  fn new() -> Noise {
    Noise {
      enabled: false,
      mode: false,
      period_index: 0,
      timer: 0,
      timer_counter: 0.0,
      // Power-on load, per https://www.nesdev.org/wiki/APU_Noise
      lfsr: 1,
      volume: 0,
      envelope: Envelope::new(),
      length: LengthCounter::new(),
    }
  }

  /// $400C: envelope loop/constant/period.
  fn write_ctrl(&mut self, data: u8) {
    self.envelope.loop_flag = data & 0x20 != 0;
    self.envelope.constant = data & 0x10 != 0;
    self.envelope.period = data & 0x0F;
    self.length.halt = self.envelope.loop_flag;
    self.volume = if self.envelope.constant {
      self.envelope.period
    } else {
      15
    };
  }

  /// $400E: LFSR mode (bit 7) and period table index (bits 0-3).
  fn write_mode(&mut self, data: u8) {
    self.mode = data & 0x80 != 0;
    self.period_index = data & 0x0F;
    self.timer = NOISE_PERIOD_TABLE[self.period_index as usize];
  }

  /// $400F: unconditional length load; flags envelope restart and
  /// force-enables.
  fn write_length(&mut self, data: u8) {
    self.length.counter = LENGTH_TABLE[((data >> 3) & 0x1F) as usize];
    self.envelope.start = true;
    self.enabled = true;
  }

  fn clock_envelope_and_length(&mut self) {
    self.envelope.clock();
    if !self.envelope.constant {
      self.volume = self.envelope.volume;
    }
    if self.length.clock() {
      self.enabled = false;
    }
  }

  /// XOR bit 0 with the mode-selected tap (bit 6 in tonal mode, bit 1
  /// otherwise), shift right, feed the result back into bit 14.
  fn step_lfsr(&mut self) {
    let bit0 = self.lfsr & 0x01;
    let tap = if self.mode {
      (self.lfsr >> 6) & 0x01
    } else {
      (self.lfsr >> 1) & 0x01
    };
    self.lfsr >>= 1;
    self.lfsr |= (bit0 ^ tap) << 14;
  }

  fn sample(&mut self, cycles_per_sample: f32) -> f32 {
    if !self.enabled || self.timer == 0 || self.length.counter == 0 {
      return 0.0;
    }
    self.timer_counter -= cycles_per_sample;
    if self.timer_counter <= 0.0 {
      self.step_lfsr();
      self.timer_counter += self.timer as f32;
    }
    // The output bit is the complement of LFSR bit 0.
    if self.lfsr & 0x01 == 0 {
      self.volume as f32 / 15.0
    } else {
      0.0
    }
  }
}

/// Non-linear channel mix matching the 2A03's summing amplifier response.
/// The two group formulas must not be replaced by a linear sum; games rely
/// on the compression they apply.
///
/// https://www.nesdev.org/wiki/APU_Mixer
fn mix(p1: f32, p2: f32, t: f32, n: f32) -> f32 {
  let pulse_out = if p1 != 0.0 || p2 != 0.0 {
    95.88 / (8128.0 / (p1 * 15.0 + p2 * 15.0) + 100.0)
  } else {
    0.0
  };
  let tnd_input = t * 15.0 + n * 15.0;
  let tnd_out = if tnd_input != 0.0 {
    159.79 / (1.0 / tnd_input + 100.0)
  } else {
    0.0
  };
  (pulse_out + tnd_out) * 0.5
}

/// The audio processing unit: four channels, frame sequencer, mixer, and
/// the $4000-$4017 register interface.
///
/// Control-rate state changes arrive through `write`/`clock` (bus side);
/// the audio sink pulls samples through `produce` at its own rate. Callers
/// on both sides share one lock around the whole struct, so multi-byte
/// updates such as a timer low/high pair are never observed torn.
pub struct Apu {
  pub pulse: [Pulse; 2],
  pub triangle: Triangle,
  pub noise: Noise,
  frame_counter: u32,
  sample_rate: f32,
}

impl Apu {
  pub fn new() -> Apu {
    Apu {
      pulse: [Pulse::new(true), Pulse::new(false)],
      triangle: Triangle::new(),
      noise: Noise::new(),
      frame_counter: 0,
      sample_rate: 44_100.0,
    }
  }

  /// Rate of the attached sink; `produce` converts CPU cycles to samples
  /// with it.
  pub fn set_sample_rate(&mut self, rate: f32) {
    self.sample_rate = rate;
  }

  /// Register write dispatch. Unrecognized addresses (including the $4010
  /// DMC block and the unimplemented $4015 enable mask) are no-ops.
  pub fn write(&mut self, addr: u16, data: u8) {
    match addr {
      0x4000 | 0x4004 => self.pulse[Apu::pulse_index(addr)].write_ctrl(data),
      0x4001 | 0x4005 => self.pulse[Apu::pulse_index(addr)].write_sweep(data),
      0x4002 | 0x4006 => self.pulse[Apu::pulse_index(addr)].write_timer_lo(data),
      0x4003 | 0x4007 => self.pulse[Apu::pulse_index(addr)].write_timer_hi(data),
      0x4008 => self.triangle.write_ctrl(data),
      0x400A => self.triangle.write_timer_lo(data),
      0x400B => self.triangle.write_timer_hi(data),
      0x400C => self.noise.write_ctrl(data),
      0x400E => self.noise.write_mode(data),
      0x400F => self.noise.write_length(data),
      _ => {}
    }
  }

  /// Register reads. $4015 returns the 4-bit channel-active mask (length
  /// counter nonzero per channel); everything else, including the stubbed
  /// $4017 frame counter, reads zero.
  pub fn read(&self, addr: u16) -> u8 {
    match addr {
      0x4015 => {
        let mut status = 0x00;
        if self.pulse[0].length.counter > 0 {
          status |= 0x01;
        }
        if self.pulse[1].length.counter > 0 {
          status |= 0x02;
        }
        if self.triangle.length.counter > 0 {
          status |= 0x04;
        }
        if self.noise.length.counter > 0 {
          status |= 0x08;
        }
        status
      }
      _ => 0x00,
    }
  }

  /// Frame sequencer: one tick per CPU cycle. Envelope and length updates
  /// fire at all four points in the 29828-cycle period; sweep updates on
  /// the second and fourth.
  ///
  /// https://www.nesdev.org/wiki/APU_Frame_Counter
  pub fn clock(&mut self) {
    self.frame_counter += 1;
    match self.frame_counter {
      7457 | 22371 => self.clock_envelopes_and_lengths(),
      14913 => {
        self.clock_envelopes_and_lengths();
        self.clock_sweeps();
      }
      29828 => {
        self.clock_envelopes_and_lengths();
        self.clock_sweeps();
        self.frame_counter = 0;
      }
      _ => {}
    }
  }

  fn clock_envelopes_and_lengths(&mut self) {
    self.pulse[0].clock_envelope_and_length();
    self.pulse[1].clock_envelope_and_length();
    self.triangle.clock_counters();
    self.noise.clock_envelope_and_length();
  }

  fn clock_sweeps(&mut self) {
    self.pulse[0].clock_sweep();
    self.pulse[1].clock_sweep();
  }

  /// Fill `out` with mixed samples, one per slot, at the sink's rate.
  ///
  /// The silence short-circuit doubles as a division-by-zero guard for the
  /// mixer and leaves all channel state untouched.
  pub fn produce(&mut self, out: &mut [f32]) {
    if self.silent() {
      out.fill(0.0);
      return;
    }

    let cycles_per_sample = CPU_CLOCK_HZ / self.sample_rate;

    // The noise timer tracks whatever was last written to the mode
    // register.
    self.noise.timer = NOISE_PERIOD_TABLE[self.noise.period_index as usize];

    if self.noise.lfsr == 0 {
      warn!("noise LFSR degenerated to zero; forcing to 1");
      self.noise.lfsr = 1;
    }

    for slot in out.iter_mut() {
      let p1 = self.pulse[0].sample(cycles_per_sample);
      let p2 = self.pulse[1].sample(cycles_per_sample);
      let t = self.triangle.sample(cycles_per_sample);
      let n = self.noise.sample(cycles_per_sample);
      *slot = mix(p1, p2, t, n);
    }
  }

  fn silent(&self) -> bool {
    (!self.pulse[0].enabled || self.pulse[0].timer == 0)
      && (!self.pulse[1].enabled || self.pulse[1].timer == 0)
      && (!self.triangle.enabled
        || self.triangle.timer == 0
        || self.triangle.length.counter == 0
        || self.triangle.linear.counter == 0)
      && (!self.noise.enabled || self.noise.timer == 0 || self.noise.length.counter == 0)
  }

  /// Restore power-on state: everything zero/disabled, LFSR reloaded with 1.
  /// The sink's sample rate survives; it belongs to the device, not the
  /// chip.
  pub fn reset(&mut self) {
    let rate = self.sample_rate;
    *self = Apu::new();
    self.sample_rate = rate;
  }

  fn pulse_index(addr: u16) -> usize {
    if addr < 0x4004 {
      0
    } else {
      1
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  /// Mixer value for a lone full-volume pulse sample.
  fn lone_pulse_level() -> f32 {
    mix(1.0, 0.0, 0.0, 0.0)
  }

  #[test]
  fn envelope_decays_and_loops_within_bounds() {
    let mut env = Envelope::new();
    env.period = 1;
    env.start = true;
    env.clock();
    assert_eq!(env.volume, 15);
    assert_eq!(env.counter, 1);

    // Decay all the way down; the volume must never underflow.
    for _ in 0..100 {
      env.clock();
      assert!(env.volume <= 15);
    }
    assert_eq!(env.volume, 0);

    // With the loop flag the volume wraps back to 15 instead of pinning,
    // then resumes decaying.
    env.loop_flag = true;
    env.clock();
    assert_eq!(env.volume, 15);
    env.clock();
    assert_eq!(env.volume, 14);
  }

  #[test]
  fn envelope_restart_forces_full_volume() {
    let mut env = Envelope::new();
    env.period = 3;
    env.volume = 2;
    env.counter = 1;
    env.start = true;
    env.clock();
    assert_eq!(env.volume, 15);
    assert_eq!(env.counter, 3);
    assert!(!env.start);
  }

  #[test]
  fn length_expiry_disables_channel_until_reloaded() {
    let mut apu = Apu::new();
    // Length index 3 -> 2 frames.
    apu.write(0x4003, 3 << 3);
    apu.write(0x4003, 3 << 3); // first write force-enabled; now the load takes
    assert_eq!(apu.pulse[0].length.counter, 2);

    apu.pulse[0].clock_envelope_and_length();
    assert_eq!(apu.pulse[0].length.counter, 1);
    assert!(apu.pulse[0].enabled);

    apu.pulse[0].clock_envelope_and_length();
    assert_eq!(apu.pulse[0].length.counter, 0);
    assert!(!apu.pulse[0].enabled);

    // Stays disabled; only a fresh length-load write re-enables.
    apu.pulse[0].clock_envelope_and_length();
    assert!(!apu.pulse[0].enabled);
    apu.write(0x4003, 3 << 3);
    assert!(apu.pulse[0].enabled);
  }

  #[test]
  fn halt_suppresses_decrement_not_disable() {
    let mut lc = LengthCounter::new();
    lc.counter = 1;
    lc.halt = true;
    assert!(!lc.clock());
    assert_eq!(lc.counter, 1);
  }

  #[test]
  fn timer_hi_write_resets_phase_and_restarts_envelope() {
    let mut apu = Apu::new();
    apu.pulse[0].duty_pos = 5;
    apu.pulse[0].envelope.start = false;
    apu.write(0x4003, 0x08);
    assert_eq!(apu.pulse[0].duty_pos, 0);
    assert!(apu.pulse[0].envelope.start);
    assert!(apu.pulse[0].enabled);
  }

  #[test]
  fn sweep_negate_asymmetry_between_pulses() {
    let mut apu = Apu::new();
    // Pulse A: enabled, period 0, negate, shift 1.
    apu.write(0x4001, 0x89);
    apu.write(0x4002, 100);
    apu.write(0x4003, 0x08);
    // Pulse B: identical config.
    apu.write(0x4005, 0x89);
    apu.write(0x4006, 100);
    apu.write(0x4007, 0x08);

    // First half-frame reloads the divider, second applies the change.
    apu.clock_sweeps();
    assert_eq!(apu.pulse[0].timer, 100);
    assert_eq!(apu.pulse[1].timer, 100);
    apu.clock_sweeps();

    // change = 100 >> 1 = 50; A subtracts the extra 1, B only ever adds.
    assert_eq!(apu.pulse[0].timer, 49);
    assert_eq!(apu.pulse[1].timer, 150);
  }

  #[test]
  fn sweep_overflow_disables_channel() {
    let mut apu = Apu::new();
    apu.write(0x4001, 0x81); // enabled, shift 1, no negate
    apu.write(0x4002, 0xFF);
    apu.write(0x4003, 0x07 | 0x08); // timer = 0x7FF
    apu.clock_sweeps();
    apu.clock_sweeps();
    // target = 0x7FF + 0x3FF > 0x7FF
    assert_eq!(apu.pulse[0].timer, 0x7FF);
    assert!(!apu.pulse[0].enabled);
  }

  #[test]
  fn silence_fast_path_emits_zeros_without_side_effects() {
    let mut apu = Apu::new();
    apu.pulse[0].duty_pos = 3;
    apu.pulse[0].timer_counter = 7.5;
    let mut buf = [1.0f32; 64];
    apu.produce(&mut buf);
    assert_eq!(buf, [0.0; 64]);
    assert_eq!(apu.pulse[0].duty_pos, 3);
    assert_eq!(apu.pulse[0].timer_counter, 7.5);
  }

  #[test]
  fn zero_timer_silences_enabled_channel() {
    let mut apu = Apu::new();
    apu.write(0x4000, 0x1F); // constant volume 15
    apu.write(0x4003, 0x08); // timer stays 0, channel force-enabled
    assert!(apu.pulse[0].enabled);
    let mut buf = [1.0f32; 16];
    apu.produce(&mut buf);
    assert_eq!(buf, [0.0; 16]);
  }

  #[test]
  fn pulse_duty_pattern_end_to_end() {
    let mut apu = Apu::new();
    // Duty 2 (50%), constant volume 15.
    apu.write(0x4000, (2 << 6) | 0x10 | 0x0F);
    apu.write(0x4002, 0x1A);
    apu.write(0x4003, 0x08);
    assert_eq!(apu.pulse[0].timer, 0x1A);

    // One duty step per output sample: period 26 + 1 cycles per step.
    apu.set_sample_rate(CPU_CLOCK_HZ / 27.0);

    let mut buf = [0.0f32; 8];
    apu.produce(&mut buf);

    // Phase starts at 0 and advances before each sample is read, so the
    // observed pattern is the 50% sequence {0,1,1,1,1,0,0,0} rotated left
    // by one.
    let high = lone_pulse_level();
    let expected = [high, high, high, high, 0.0, 0.0, 0.0, 0.0];
    for (got, want) in buf.iter().zip(expected.iter()) {
      assert!((got - want).abs() < 1e-6, "got {:?}, want {:?}", buf, expected);
    }
  }

  #[test]
  fn noise_lfsr_never_zero_after_produce() {
    let mut apu = Apu::new();
    apu.write(0x400C, 0x1F);
    apu.write(0x400E, 0x00); // shortest period
    apu.write(0x400F, 0x08);
    apu.noise.lfsr = 0; // degenerate state, should self-correct

    let mut buf = [0.0f32; 2048];
    apu.produce(&mut buf);
    assert!(apu.noise.lfsr != 0);
    for sample in buf {
      assert!((0.0..=1.0).contains(&sample));
    }

    // A long run never re-enters the stuck state.
    for _ in 0..32 {
      apu.produce(&mut buf);
      assert!(apu.noise.lfsr != 0);
    }
  }

  #[test]
  fn frame_sequencer_fires_at_documented_ticks() {
    let mut apu = Apu::new();
    // Pulse A with a long length and an armed sweep (negate, shift 1).
    apu.write(0x4000, 0x1F);
    apu.write(0x4001, 0x89);
    apu.write(0x4002, 100);
    apu.write(0x4003, 0x08); // length index 1 -> 254
    apu.write(0x4003, 0x08);
    assert_eq!(apu.pulse[0].length.counter, 254);

    for _ in 0..7457 {
      apu.clock();
    }
    // Envelope+length fired once, sweep did not.
    assert_eq!(apu.pulse[0].length.counter, 253);
    assert_eq!(apu.pulse[0].timer, 100);

    for _ in 7457..14913 {
      apu.clock();
    }
    // Both fired; the sweep's first tick only reloads its divider.
    assert_eq!(apu.pulse[0].length.counter, 252);
    assert_eq!(apu.pulse[0].timer, 100);

    for _ in 14913..29828 {
      apu.clock();
    }
    // Four length ticks total; second sweep tick applied 100 - 50 - 1.
    assert_eq!(apu.pulse[0].length.counter, 250);
    assert_eq!(apu.pulse[0].timer, 49);
    assert_eq!(apu.frame_counter, 0);
  }

  #[test]
  fn linear_counter_pinned_while_control_set() {
    let mut apu = Apu::new();
    apu.write(0x4008, 0x80 | 10); // control set, reload value 10
    apu.write(0x400B, 0x08);
    for _ in 0..5 {
      apu.triangle.clock_counters();
      assert_eq!(apu.triangle.linear.counter, 10);
      assert!(apu.triangle.linear.reload);
    }

    // Clearing the control flag lets the reload flag drop and the counter
    // count down.
    apu.write(0x4008, 10);
    apu.triangle.clock_counters();
    apu.triangle.clock_counters();
    assert_eq!(apu.triangle.linear.counter, 9);
  }

  #[test]
  fn status_read_reports_active_channels() {
    let mut apu = Apu::new();
    assert_eq!(apu.read(0x4015), 0x00);

    apu.write(0x4003, 0x08);
    apu.write(0x4003, 0x08);
    apu.write(0x400B, 0x08);
    apu.write(0x400F, 0x08);
    assert_eq!(apu.read(0x4015), 0x01 | 0x04 | 0x08);

    // Only $4015 reads back anything.
    assert_eq!(apu.read(0x4017), 0x00);
    assert_eq!(apu.read(0x4000), 0x00);
  }

  #[test]
  fn reset_restores_power_on_state() {
    let mut apu = Apu::new();
    apu.set_sample_rate(48_000.0);
    apu.write(0x4000, 0x1F);
    apu.write(0x4002, 0x40);
    apu.write(0x4003, 0x08);
    apu.write(0x400F, 0x08);
    for _ in 0..10_000 {
      apu.clock();
    }

    apu.reset();
    assert!(!apu.pulse[0].enabled);
    assert_eq!(apu.pulse[0].timer, 0);
    assert_eq!(apu.pulse[0].length.counter, 0);
    assert!(!apu.noise.enabled);
    assert_eq!(apu.noise.lfsr, 1);
    assert_eq!(apu.frame_counter, 0);
    assert_eq!(apu.sample_rate, 48_000.0);
    assert_eq!(apu.read(0x4015), 0x00);
  }
}
