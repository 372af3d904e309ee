/// PRG bank-switching logic, selected once at load time from the iNES
/// mapper code and driven through a uniform read/write contract.
pub enum Mapper {
  /// Mapper 000: 16 KiB PRG mirrored across the address range, or a flat
  /// 32 KiB image. No switching.
  Nrom { num_banks: usize },
  /// Mapper 002 (UNROM-style): switchable 16 KiB bank at $8000-$BFFF,
  /// last bank fixed at $C000-$FFFF.
  Unrom { num_banks: usize, selected: usize },
}

impl Mapper {
  pub fn from_code(code: u8, num_banks: usize) -> Result<Mapper, &'static str> {
    // Bank math below assumes at least one bank exists.
    if num_banks == 0 {
      return Err("ROM contains no PRG banks");
    }
    match code {
      0 => Ok(Mapper::Nrom { num_banks }),
      2 => Ok(Mapper::Unrom {
        num_banks,
        selected: 0,
      }),
      _ => Err("Unsupported mapper code"),
    }
  }

  /// Maps a CPU address to a PRG offset. `None` means the address is not
  /// cartridge-owned.
  pub fn cpu_read(&self, addr: u16) -> Option<usize> {
    if addr < 0x8000 {
      return None;
    }
    match *self {
      Mapper::Nrom { num_banks } => {
        // One bank mirrors $8000-$BFFF into $C000-$FFFF.
        let mask = if num_banks > 1 { 0x7FFF } else { 0x3FFF };
        Some((addr & mask) as usize)
      }
      Mapper::Unrom {
        num_banks,
        selected,
      } => match addr {
        0x8000..=0xBFFF => Some((addr as usize - 0x8000) + selected * 0x4000),
        _ => Some((addr as usize - 0xC000) + (num_banks - 1) * 0x4000),
      },
    }
  }

  /// Handles a CPU write into cartridge space. For UNROM that is the bank
  /// select register; a bank number past the end of PRG is a reported
  /// error and leaves the selection unchanged.
  pub fn cpu_write(&mut self, addr: u16, data: u8) -> Result<(), &'static str> {
    if addr < 0x8000 {
      return Ok(());
    }
    if let Mapper::Unrom {
      num_banks,
      ref mut selected,
    } = *self
    {
      let bank = (data & 0x0F) as usize;
      if bank >= num_banks {
        return Err("PRG bank select out of range");
      }
      *selected = bank;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn nrom_mirrors_single_bank() {
    let mapper = Mapper::from_code(0, 1).unwrap();
    assert_eq!(mapper.cpu_read(0x8000), Some(0x0000));
    assert_eq!(mapper.cpu_read(0xC000), Some(0x0000));
    assert_eq!(mapper.cpu_read(0xFFFF), Some(0x3FFF));
    assert_eq!(mapper.cpu_read(0x6000), None);
  }

  #[test]
  fn nrom_flat_32k() {
    let mapper = Mapper::from_code(0, 2).unwrap();
    assert_eq!(mapper.cpu_read(0xC000), Some(0x4000));
  }

  #[test]
  fn unrom_switches_low_window_only() {
    let mut mapper = Mapper::from_code(2, 4).unwrap();
    assert_eq!(mapper.cpu_read(0x8000), Some(0x0000));
    // Fixed window always maps into the last bank.
    assert_eq!(mapper.cpu_read(0xC000), Some(3 * 0x4000));

    mapper.cpu_write(0x8000, 2).unwrap();
    assert_eq!(mapper.cpu_read(0x8000), Some(2 * 0x4000));
    assert_eq!(mapper.cpu_read(0xC000), Some(3 * 0x4000));
  }

  #[test]
  fn unrom_rejects_out_of_range_bank() {
    let mut mapper = Mapper::from_code(2, 2).unwrap();
    mapper.cpu_write(0x8000, 1).unwrap();
    assert_eq!(
      mapper.cpu_write(0x8000, 9),
      Err("PRG bank select out of range")
    );
    // Selection is unchanged, not clamped.
    assert_eq!(mapper.cpu_read(0x8000), Some(0x4000));
  }

  #[test]
  fn unknown_code_is_an_error() {
    assert!(Mapper::from_code(4, 8).is_err());
  }

  #[test]
  fn zero_prg_banks_is_an_error() {
    assert_eq!(
      Mapper::from_code(2, 0).err(),
      Some("ROM contains no PRG banks")
    );
    assert_eq!(
      Mapper::from_code(0, 0).err(),
      Some("ROM contains no PRG banks")
    );
  }
}
