use std::{fmt, mem::size_of};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::disk_format::{block::BLOCK_SIZE, directory_entry::DirectoryEntryName};

/// Capacity of the payload buffer that leads every record.
pub const PAYLOAD_SIZE: usize = BLOCK_SIZE;

/// The fields after the payload: name, five integers and the stat pair.
pub const HEADER_SIZE: usize = 56;
const_assert!(size_of::<Header>() == HEADER_SIZE);

/// Every datagram, in either direction, is exactly this long.
pub const RECORD_SIZE: usize = PAYLOAD_SIZE + HEADER_SIZE;

/// Operation codes as they appear in the `op` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum OpCode {
    Lookup = 1,
    Stat = 2,
    Write = 3,
    Read = 4,
    Create = 5,
    Unlink = 6,
    Shutdown = 7,
    /// Marks a reply. A request with this code is a liveness probe.
    Feedback = 8,
}

impl TryFrom<i32> for OpCode {
    type Error = DecodeError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpCode::Lookup),
            2 => Ok(OpCode::Stat),
            3 => Ok(OpCode::Write),
            4 => Ok(OpCode::Read),
            5 => Ok(OpCode::Create),
            6 => Ok(OpCode::Unlink),
            7 => Ok(OpCode::Shutdown),
            8 => Ok(OpCode::Feedback),
            _ => Err(DecodeError::UnknownOp(value)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The datagram is not [`RECORD_SIZE`] bytes long.
    WrongSize(usize),
    UnknownOp(i32),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::WrongSize(len) => {
                write!(f, "datagram is {len} bytes long, expected {RECORD_SIZE}")
            }
            DecodeError::UnknownOp(op) => write!(f, "unknown operation code {op}"),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct WireStat {
    pub type_: i32,
    pub size: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Header {
    pub name: DirectoryEntryName,
    pub offset: i32,
    pub nbytes: i32,
    pub mtype: i32,
    pub node_num: i32,
    pub op: i32,
    pub stat: WireStat,
}

/// One datagram: a block-sized payload followed by the [`Header`].
#[derive(Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub payload: Box<[u8; PAYLOAD_SIZE]>,
    pub header: Header,
}

impl fmt::Debug for WireRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireRecord")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl WireRecord {
    /// A zeroed record carrying `op`.
    pub fn new(op: OpCode) -> Self {
        Self {
            payload: Box::new([0; PAYLOAD_SIZE]),
            header: Header {
                op: op as i32,
                ..Header::default()
            },
        }
    }

    pub fn op(&self) -> Result<OpCode, DecodeError> {
        OpCode::try_from(self.header.op)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(RECORD_SIZE);
        bytes.extend_from_slice(&self.payload[..]);
        bytes.extend(bincode::serialize(&self.header).context("serializing record header")?);
        Ok(bytes)
    }

    /// Splits a datagram into payload and header. The operation code is left unchecked.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() == RECORD_SIZE, DecodeError::WrongSize(bytes.len()));

        let (payload, header) = bytes.split_at(PAYLOAD_SIZE);
        let mut record = Self {
            payload: Box::new([0; PAYLOAD_SIZE]),
            header: bincode::deserialize(header).context("parsing record header")?,
        };
        record.payload.copy_from_slice(payload);

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut record = WireRecord::new(OpCode::Write);
        record.header.name = DirectoryEntryName::try_from("f").unwrap();
        record.header.offset = 2;
        record.header.nbytes = 3;
        record.header.node_num = 7;
        record.payload[0] = b'x';

        let bytes = record.encode().unwrap();
        assert_eq!(bytes.len(), RECORD_SIZE);
        assert_eq!(bytes[0], b'x');
        assert_eq!(bytes[PAYLOAD_SIZE], b'f');
        assert_eq!(bytes[PAYLOAD_SIZE + 28..PAYLOAD_SIZE + 32], 2i32.to_le_bytes());
        assert_eq!(bytes[PAYLOAD_SIZE + 32..PAYLOAD_SIZE + 36], 3i32.to_le_bytes());
        assert_eq!(bytes[PAYLOAD_SIZE + 40..PAYLOAD_SIZE + 44], 7i32.to_le_bytes());
        assert_eq!(bytes[PAYLOAD_SIZE + 44..PAYLOAD_SIZE + 48], 3i32.to_le_bytes());
    }

    #[test]
    fn test_decode_restores_record() {
        let mut record = WireRecord::new(OpCode::Feedback);
        record.header.stat = WireStat { type_: 1, size: 6 };
        record.payload[PAYLOAD_SIZE - 1] = 0xff;

        let decoded = WireRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_wrong_size() {
        let err = WireRecord::decode(&[0; 100]).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DecodeError>(),
            Some(&DecodeError::WrongSize(100))
        );
    }

    #[test]
    fn test_unknown_op() {
        let mut record = WireRecord::new(OpCode::Lookup);
        record.header.op = 0;
        assert_eq!(record.op(), Err(DecodeError::UnknownOp(0)));

        record.header.op = 9;
        assert_eq!(record.op(), Err(DecodeError::UnknownOp(9)));
    }
}
