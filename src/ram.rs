/// 2 KiB of internal work RAM. The bus mirrors it through $0000-$1FFF by
/// masking addresses down to the physical size.
pub struct Ram {
  data: [u8; Ram::SIZE],
}

impl Ram {
  pub const SIZE: usize = 2 * 1024;

  pub fn new() -> Ram {
    Ram {
      data: [0x00; Ram::SIZE],
    }
  }

  pub fn read(&self, addr: u16) -> u8 {
    self.data[(addr as usize) & (Ram::SIZE - 1)]
  }

  pub fn write(&mut self, addr: u16, data: u8) {
    self.data[(addr as usize) & (Ram::SIZE - 1)] = data;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn mirrors_every_2k() {
    let mut ram = Ram::new();
    ram.write(0x0042, 0xAB);
    assert_eq!(ram.read(0x0042), 0xAB);
    assert_eq!(ram.read(0x0842), 0xAB);
    assert_eq!(ram.read(0x1842), 0xAB);
  }
}
