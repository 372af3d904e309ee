/// A byte-addressable bus. The processor steps against this, and the DMA
/// reader pulls its source bytes through it.
pub trait Bus {
  fn read(&mut self, addr: u16) -> u8;
  fn write(&mut self, addr: u16, data: u8);
}
