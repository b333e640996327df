use std::fmt::{self, Display, Formatter};

use crate::{dbheader::TextEncoding, error::DecodeError, varint::VarInt};

/// # [Record Format](https://www.sqlite.org/fileformat.html#record-format)
///
/// A record contains a header and a body, in that order. The header begins with a single varint which determines the total number of bytes in the header.
/// The varint value is the size of the header in bytes including the size varint itself.
/// Following the size varint are one or more additional varints, one per column.
/// These additional varints are called "serial type" numbers and determine the datatype of each column, according to the following chart:
/// +-------------+------------+------------------------------------------------------------------------------+
/// |Serial Type  |Content Size|Meaning                                                                       |
/// +-------------+------------+------------------------------------------------------------------------------|
/// |0            |0           |Value is a NULL.                                                              |
/// |1            |1           |Value is an 8-bit twos-complement integer.                                    |
/// |2            |2           |Value is a big-endian 16-bit twos-complement integer.                         |
/// |3            |3           |Value is a big-endian 24-bit twos-complement integer.                         |
/// |4            |4           |Value is a big-endian 32-bit twos-complement integer.                         |
/// |5            |6           |Value is a big-endian 48-bit twos-complement integer.                         |
/// |6            |8           |Value is a big-endian 64-bit twos-complement integer.                         |
/// |7            |8           |Value is a big-endian IEEE 754-2008 64-bit floating point number.             |
/// |8            |0           |Value is the integer 0. (Only available for schema format 4 and higher.)      |
/// |9            |0           |Value is the integer 1. (Only available for schema format 4 and higher.)      |
/// |10,11        |variable    |Reserved for internal use. Never appears in a well-formed database file.      |
/// |N≥12 and even|(N-12)/2    |Value is a BLOB that is (N-12)/2 bytes in length.                             |
/// |N≥13 and odd |(N-13)/2    |Value is a string in the text encoding and (N-13)/2 bytes in length.          |
/// +-------------+------------+------------------------------------------------------------------------------+
///
/// A NULL in the column declared `INTEGER PRIMARY KEY` stands for the rowid; the caller
/// substitutes it, since only the cell knows the rowid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialType {
  Null,
  Int8,
  Int16,
  Int24,
  Int32,
  Int48,
  Int64,
  Float64,
  Const0,
  Const1,
  Reserved(u64),
  Blob(usize),
  Text(usize),
}

impl SerialType {
  pub fn from_code(code: u64) -> Self {
    match code {
      0 => SerialType::Null,
      1 => SerialType::Int8,
      2 => SerialType::Int16,
      3 => SerialType::Int24,
      4 => SerialType::Int32,
      5 => SerialType::Int48,
      6 => SerialType::Int64,
      7 => SerialType::Float64,
      8 => SerialType::Const0,
      9 => SerialType::Const1,
      10 | 11 => SerialType::Reserved(code),
      n if n % 2 == 0 => SerialType::Blob(((n - 12) / 2) as usize),
      n => SerialType::Text(((n - 13) / 2) as usize),
    }
  }

  pub fn code(&self) -> u64 {
    match *self {
      SerialType::Null => 0,
      SerialType::Int8 => 1,
      SerialType::Int16 => 2,
      SerialType::Int24 => 3,
      SerialType::Int32 => 4,
      SerialType::Int48 => 5,
      SerialType::Int64 => 6,
      SerialType::Float64 => 7,
      SerialType::Const0 => 8,
      SerialType::Const1 => 9,
      SerialType::Reserved(code) => code,
      SerialType::Blob(n) => 12 + 2 * n as u64,
      SerialType::Text(n) => 13 + 2 * n as u64,
    }
  }

  pub fn content_size(&self) -> usize {
    match self {
      SerialType::Null | SerialType::Const0 | SerialType::Const1 | SerialType::Reserved(_) => 0,
      SerialType::Int8 => 1,
      SerialType::Int16 => 2,
      SerialType::Int24 => 3,
      SerialType::Int32 => 4,
      SerialType::Int48 => 6,
      SerialType::Int64 | SerialType::Float64 => 8,
      SerialType::Blob(n) | SerialType::Text(n) => *n,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
  pub header_len: usize,
  pub serial_types: Vec<SerialType>,
  pub values: Vec<Value>,
  /// Header plus every column's content; never more than the buffer handed to `parse`.
  pub len: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Integer(i64),
  Float(f64),
  Blob(Vec<u8>),
  Text(String),
}

impl Value {
  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Value::Integer(value) => Some(*value),
      _ => None,
    }
  }

  pub fn as_float(&self) -> Option<f64> {
    match self {
      Value::Float(value) => Some(*value),
      Value::Integer(value) => Some(*value as f64),
      _ => None,
    }
  }

  pub fn as_blob(&self) -> Option<&[u8]> {
    match self {
      Value::Blob(value) => Some(value),
      _ => None,
    }
  }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      Value::Text(value) => Some(value),
      _ => None,
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }
}

impl Display for Value {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    match self {
      Value::Null => write!(f, "NULL"),
      Value::Integer(value) => write!(f, "{}", value),
      Value::Float(value) => write!(f, "{}", value),
      Value::Blob(value) => value.iter().try_for_each(|b| write!(f, "{:02X}", b)),
      Value::Text(value) => write!(f, "{}", value),
    }
  }
}

fn sign_extend(bytes: &[u8]) -> i64 {
  let mut value = if bytes[0] & 0x80 != 0 { -1i64 } else { 0 };
  for &b in bytes {
    value = (value << 8) | b as i64;
  }
  value
}

impl Record {
  pub fn parse(data: &[u8], encoding: TextEncoding) -> Result<Self, DecodeError> {
    let (header_len, serial_types) = Self::parse_header(data)?;
    let mut offset = header_len;

    let mut values = Vec::with_capacity(serial_types.len());
    for (column, &serial_type) in serial_types.iter().enumerate() {
      let needed = serial_type.content_size();
      let available = data.len() - offset;
      if needed > available {
        return Err(DecodeError::ColumnOverrun {
          column,
          needed,
          available,
        });
      }
      let value = Self::parse_value(serial_type, &data[offset..offset + needed], encoding)?;
      values.push(value);
      offset += needed;
    }

    Ok(Record {
      header_len,
      serial_types,
      values,
      len: offset,
    })
  }

  /// Decodes a record whose body was cut short. The first column that does not fit keeps
  /// whatever bytes are left (text and blobs only) and every later column is NULL.
  ///
  /// Returns the record and the first incomplete column, `None` when nothing was cut.
  pub fn parse_truncated(
    data: &[u8],
    encoding: TextEncoding,
  ) -> Result<(Self, Option<usize>), DecodeError> {
    let (header_len, serial_types) = Self::parse_header(data)?;
    let mut offset = header_len;
    let mut truncated_at = None;

    let mut values = Vec::with_capacity(serial_types.len());
    for (column, &serial_type) in serial_types.iter().enumerate() {
      if truncated_at.is_some() {
        values.push(Value::Null);
        continue;
      }
      let needed = serial_type.content_size();
      if needed > data.len() - offset {
        truncated_at = Some(column);
        let rest = &data[offset..];
        values.push(match serial_type {
          SerialType::Blob(_) => Value::Blob(rest.to_vec()),
          SerialType::Text(_) => Value::Text(encoding.decode(rest)),
          _ => Value::Null,
        });
        offset = data.len();
        continue;
      }
      values.push(Self::parse_value(serial_type, &data[offset..offset + needed], encoding)?);
      offset += needed;
    }

    let record = Record {
      header_len,
      serial_types,
      values,
      len: offset,
    };
    Ok((record, truncated_at))
  }

  fn parse_header(data: &[u8]) -> Result<(usize, Vec<SerialType>), DecodeError> {
    let header_size = VarInt::decode(data).ok_or(DecodeError::TruncatedVarint(0))?;
    let header_len = header_size.value;
    if header_len < header_size.size as u64 {
      return Err(DecodeError::HeaderTooShort(header_len));
    }
    if header_len > data.len() as u64 {
      return Err(DecodeError::HeaderTooLong {
        header_len,
        available: data.len(),
      });
    }
    let header_len = header_len as usize;
    let mut offset = header_size.size;

    let mut serial_types = Vec::new();
    while offset < header_len {
      let serial_type =
        VarInt::decode(&data[offset..header_len]).ok_or(DecodeError::TruncatedVarint(offset))?;
      serial_types.push(SerialType::from_code(serial_type.value));
      offset += serial_type.size;
    }
    Ok((header_len, serial_types))
  }

  fn parse_value(
    serial_type: SerialType,
    data: &[u8],
    encoding: TextEncoding,
  ) -> Result<Value, DecodeError> {
    Ok(match serial_type {
      SerialType::Null => Value::Null,
      SerialType::Int8
      | SerialType::Int16
      | SerialType::Int24
      | SerialType::Int32
      | SerialType::Int48
      | SerialType::Int64 => Value::Integer(sign_extend(data)),
      SerialType::Float64 => {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(data);
        Value::Float(f64::from_be_bytes(bytes))
      }
      SerialType::Const0 => Value::Integer(0),
      SerialType::Const1 => Value::Integer(1),
      SerialType::Reserved(code) => return Err(DecodeError::ReservedSerialType(code)),
      SerialType::Blob(_) => Value::Blob(data.to_vec()),
      SerialType::Text(_) => Value::Text(encoding.decode(data)),
    })
  }

  pub fn codes(&self) -> Vec<u64> {
    self.serial_types.iter().map(SerialType::code).collect()
  }

  pub fn body_len(&self) -> usize {
    self.len - self.header_len
  }
}
