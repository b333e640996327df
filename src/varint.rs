/// A SQLite variable-length integer.
///
/// Big-endian, 1 to 9 bytes. The high bit of each of the first eight bytes says another
/// byte follows; the ninth byte, when present, contributes all eight of its bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt {
  pub value: u64,
  pub size: usize,
}

pub const MAX_VARINT_LEN: usize = 9;

impl VarInt {
  pub fn get_encoded_size(value: u64) -> usize {
    if value > 0x00FF_FFFF_FFFF_FFFF {
      return MAX_VARINT_LEN;
    }
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
  }

  /// Decodes the varint at the start of `data`, or `None` when `data` ends first.
  pub fn decode(data: &[u8]) -> Option<VarInt> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
      if i == MAX_VARINT_LEN - 1 {
        value = (value << 8) | byte as u64;
        return Some(VarInt {
          value,
          size: MAX_VARINT_LEN,
        });
      }
      value = (value << 7) | (byte & 0x7F) as u64;
      if byte & 0x80 == 0 {
        return Some(VarInt { value, size: i + 1 });
      }
    }
    None
  }

  pub fn encode(value: u64) -> Vec<u8> {
    if value > 0x00FF_FFFF_FFFF_FFFF {
      let mut data = vec![0; MAX_VARINT_LEN];
      data[8] = value as u8;
      let mut rest = value >> 8;
      for byte in data[..8].iter_mut().rev() {
        *byte = (rest as u8 & 0x7F) | 0x80;
        rest >>= 7;
      }
      return data;
    }

    let mut data = Vec::with_capacity(MAX_VARINT_LEN);
    let mut rest = value;
    loop {
      data.push((rest & 0x7F) as u8);
      rest >>= 7;
      if rest == 0 {
        break;
      }
    }
    data.reverse();
    let last = data.len() - 1;
    for byte in &mut data[..last] {
      *byte |= 0x80;
    }
    data
  }
}
