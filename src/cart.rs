use std::fs;

use crate::mapper::Mapper;

const HEADER_START: [u8; 4] = [
  0x4E, // N
  0x45, // E
  0x53, // S
  0x1A, // EOF
];

pub const HEADER_SIZE: usize = 16;

pub const FLAG_MIRRORING: u8 = 0b00000001;
pub const FLAG_HAS_TRAINER: u8 = 0b00000100;

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum Mirroring {
  Horizontal,
  Vertical,
}

/// A parsed iNES cartridge: owned PRG/CHR buffers plus the mapper chosen
/// at load time. The bus only ever touches it through `cpu_read` /
/// `cpu_write`.
pub struct Cart {
  pub mirroring: Mirroring,
  pub mapper_code: u8,
  mapper: Mapper,
  prg: Vec<u8>,
  #[allow(dead_code)]
  chr: Vec<u8>,
}

impl Cart {
  pub fn new(data: &[u8]) -> Result<Cart, &'static str> {
    if data.len() < HEADER_SIZE {
      return Err("Too small to contain header");
    }

    // Bytes 0-3: Should indicate that this is an iNES file:
    if data[0..4] != HEADER_START {
      return Err("Does not appear to be in the iNES format");
    }

    // Byte 4: Size of PRG ROM in 16KB increments
    let num_prg_banks = data[4] as usize;
    let prg_size = num_prg_banks * 16 * 1024;

    // Byte 5: Size of CHR ROM in 8KB increments
    let num_chr_banks = data[5] as usize;
    let chr_size = num_chr_banks * 8 * 1024;

    let flags_6 = data[6];
    let mirroring = if flags_6 & FLAG_MIRRORING != 0 {
      Mirroring::Vertical
    } else {
      Mirroring::Horizontal
    };
    let has_trainer = flags_6 & FLAG_HAS_TRAINER != 0;

    let mapper_code = (data[7] & 0xF0) | (flags_6 >> 4);

    let prg_start = if has_trainer {
      HEADER_SIZE + 512
    } else {
      HEADER_SIZE
    };
    let chr_start = prg_start + prg_size;

    if data.len() < chr_start + chr_size {
      return Err("File is too small to contain ROM data");
    }

    let mapper = Mapper::from_code(mapper_code, num_prg_banks)?;

    Ok(Cart {
      mirroring,
      mapper_code,
      mapper,
      prg: data[prg_start..prg_start + prg_size].to_vec(),
      chr: if chr_size > 0 {
        data[chr_start..chr_start + chr_size].to_vec()
      } else {
        vec![0x00; 8 * 1024]
      },
    })
  }

  pub fn from_file(filename: &str) -> Result<Cart, &'static str> {
    let contents = fs::read(filename).map_err(|_| "Failure reading ROM file")?;
    Cart::new(&contents)
  }

  /// `None` when the address is outside cartridge space or the mapped
  /// offset falls past the end of PRG.
  pub fn cpu_read(&self, addr: u16) -> Option<u8> {
    let mapped = self.mapper.cpu_read(addr)?;
    self.prg.get(mapped).copied()
  }

  pub fn cpu_write(&mut self, addr: u16, data: u8) -> Result<(), &'static str> {
    self.mapper.cpu_write(addr, data)
  }
}

#[cfg(test)]
pub fn test_rom(num_prg_banks: u8, mapper_code: u8, fill: u8) -> Vec<u8> {
  let mut data = vec![
    0x4E,
    0x45,
    0x53,
    0x1A,
    num_prg_banks,
    0x01, // 1 * 8K CHR
    (mapper_code << 4) | FLAG_MIRRORING,
    mapper_code & 0xF0,
    0x00,
    0x00,
    0x00,
    0x00,
    0x00,
    0x00,
    0x00,
    0x00,
  ];
  data.resize(HEADER_SIZE + num_prg_banks as usize * 16 * 1024, fill);
  let prg_end = data.len();
  data.resize(prg_end + 8 * 1024, 0x00);
  data
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn header_invalid() {
    match Cart::new(&vec![0x00; 40 * 1024]) {
      Ok(_) => panic!("Expected cart with all zeroes to fail header parsing"),
      Err(msg) => assert_eq!(msg, "Does not appear to be in the iNES format"),
    }
  }

  #[test]
  fn header_too_short() {
    assert_eq!(
      Cart::new(&[0x4E, 0x45, 0x53, 0x1A]).err(),
      Some("Too small to contain header")
    );
  }

  #[test]
  fn truncated_rom_data() {
    let mut data = test_rom(1, 0, 0x42);
    data.truncate(HEADER_SIZE + 100);
    assert_eq!(
      Cart::new(&data).err(),
      Some("File is too small to contain ROM data")
    );
  }

  #[test]
  fn parses_nrom_and_reads_prg() {
    let cart = Cart::new(&test_rom(1, 0, 0x42)).unwrap();
    assert_eq!(cart.mapper_code, 0);
    assert_eq!(cart.mirroring, Mirroring::Vertical);
    assert_eq!(cart.cpu_read(0x8000), Some(0x42));
    // NROM-128 mirrors the single bank into the upper window.
    assert_eq!(cart.cpu_read(0xC000), Some(0x42));
    assert_eq!(cart.cpu_read(0x4020), None);
  }

  #[test]
  fn rejects_rom_with_no_prg_banks() {
    // A header can legally parse while declaring zero 16K PRG banks; the
    // mapper must refuse it before any address math runs.
    assert_eq!(
      Cart::new(&test_rom(0, 2, 0x42)).err(),
      Some("ROM contains no PRG banks")
    );
  }

  #[test]
  fn unrom_bank_write_out_of_range_is_reported() {
    let mut cart = Cart::new(&test_rom(2, 2, 0x42)).unwrap();
    assert!(cart.cpu_write(0x8000, 1).is_ok());
    assert!(cart.cpu_write(0x8000, 7).is_err());
  }
}
