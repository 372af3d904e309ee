use std::sync::{Arc, Mutex};

use log::error;

use crate::apu::Apu;
use crate::bus::Bus;
use crate::cart::Cart;
use crate::ram::Ram;

/// PPU cycles per NTSC frame (341 dots x 262 scanlines). One call to
/// `Nes::frame` steps the bus clock this many times.
pub const CYCLES_PER_FRAME: u32 = 341 * 262;

/// The instruction-execution core. Out of scope for this crate; the fabric
/// only ever steps it one instruction at a time and delivers frame
/// interrupts.
pub trait Processor {
  fn step(&mut self, bus: &mut dyn Bus);
  fn interrupt(&mut self, bus: &mut dyn Bus);
}

/// The picture-generation unit: clocked every bus cycle, owns the OAM that
/// DMA copies into, and asserts a frame-output signal the arbiter turns
/// into a processor interrupt.
pub trait Video {
  fn clock(&mut self);
  /// Reads and clears the frame-output signal.
  fn take_frame(&mut self) -> bool;
  fn write_oam(&mut self, addr: u8, data: u8);
}

/// Address decode plus the DMA latches. Reads and writes land on internal
/// RAM, the APU registers, the DMA trigger, or cartridge space; everything
/// else reads zero and swallows writes.
pub struct SystemBus<V: Video> {
  pub apu: Arc<Mutex<Apu>>,
  pub video: V,
  pub cart: Cart,
  ram: Ram,

  dma_page: u8,
  dma_addr: u8,
  dma_data: u8,
  dma_active: bool,
  dma_dummy: bool,
}

impl<V: Video> Bus for SystemBus<V> {
  fn read(&mut self, addr: u16) -> u8 {
    match addr {
      // 2K RAM mirrored through $0000-$1FFF
      0x0000..=0x1FFF => self.ram.read(addr),
      0x4000..=0x4013 | 0x4015 | 0x4017 => self.apu.lock().unwrap().read(addr),
      0x8000..=0xFFFF => self.cart.cpu_read(addr).unwrap_or(0x00),
      _ => 0x00,
    }
  }

  fn write(&mut self, addr: u16, data: u8) {
    match addr {
      0x0000..=0x1FFF => self.ram.write(addr, data),
      0x4000..=0x4013 | 0x4015 | 0x4017 => self.apu.lock().unwrap().write(addr, data),
      // https://www.nesdev.org/wiki/PPU_registers#OAMDMA
      0x4014 => {
        self.dma_page = data;
        self.dma_addr = 0x00;
        self.dma_active = true;
      }
      0x8000..=0xFFFF => {
        if let Err(msg) = self.cart.cpu_write(addr, data) {
          error!("cartridge write to {:04X} rejected: {}", addr, msg);
        }
      }
      _ => {}
    }
  }
}

/// The machine: one bus clock driving the video unit every cycle, the
/// processor (or an in-progress DMA transfer) every third cycle, and the
/// APU's frame sequencer at the same CPU rate.
pub struct Nes<C: Processor, V: Video> {
  pub cpu: C,
  pub bus: SystemBus<V>,
  tick: u64,
}

impl<C: Processor, V: Video> Nes<C, V> {
  pub fn new(cart: Cart, cpu: C, video: V) -> Nes<C, V> {
    Nes {
      cpu,
      bus: SystemBus {
        apu: Arc::new(Mutex::new(Apu::new())),
        video,
        cart,
        ram: Ram::new(),
        dma_page: 0x00,
        dma_addr: 0x00,
        dma_data: 0x00,
        dma_active: false,
        dma_dummy: true,
      },
      tick: 0,
    }
  }

  /// Shared handle to the APU for the audio sink. The sink's callback and
  /// the bus both lock it, which is the entire synchronization story.
  pub fn apu_handle(&self) -> Arc<Mutex<Apu>> {
    self.bus.apu.clone()
  }

  pub fn clock(&mut self) {
    self.bus.video.clock();

    // CPU-rate slot: one in every three bus cycles.
    if self.tick % 3 == 0 {
      self.bus.apu.lock().unwrap().clock();

      if self.bus.dma_active {
        if self.bus.dma_dummy {
          // Transfers start on an odd cycle; idle until aligned.
          if self.tick % 2 == 1 {
            self.bus.dma_dummy = false;
          }
        } else if self.tick % 2 == 0 {
          // Even cycles read from the source page...
          let addr = (self.bus.dma_page as u16) << 8 | self.bus.dma_addr as u16;
          self.bus.dma_data = self.bus.read(addr);
        } else {
          // ...odd cycles write into OAM. Offset wrap ends the transfer.
          self.bus.video.write_oam(self.bus.dma_addr, self.bus.dma_data);
          self.bus.dma_addr = self.bus.dma_addr.wrapping_add(1);
          if self.bus.dma_addr == 0x00 {
            self.bus.dma_active = false;
            self.bus.dma_dummy = true;
          }
        }
      } else {
        self.cpu.step(&mut self.bus);
      }
    }

    if self.bus.video.take_frame() {
      self.cpu.interrupt(&mut self.bus);
    }

    self.tick += 1;
  }

  /// Step one full frame's worth of bus cycles. The caller paces these to
  /// the target frame rate.
  pub fn frame(&mut self) {
    for _ in 0..CYCLES_PER_FRAME {
      self.clock();
    }
  }

  /// Back to power-on: APU state, DMA latches, and the cycle counter all
  /// clear atomically. Safe between any two bus-clock steps; takes the
  /// same APU lock as the audio callback.
  pub fn reset(&mut self) {
    self.bus.apu.lock().unwrap().reset();
    self.bus.dma_page = 0x00;
    self.bus.dma_addr = 0x00;
    self.bus.dma_data = 0x00;
    self.bus.dma_active = false;
    self.bus.dma_dummy = true;
    self.tick = 0;
  }

  #[cfg(test)]
  fn dma_active(&self) -> bool {
    self.bus.dma_active
  }
}
