//! Typed requests and replies, and their mapping onto [`WireRecord`]s.

use anyhow::{bail, Result};

use crate::disk_format::{directory_entry::DirectoryEntryName, inode::InodeType};
use crate::error::FsError;
use crate::mfs::{InodeNumber, Stat};

use super::record::{OpCode, WireRecord, WireStat, PAYLOAD_SIZE};

/// `node_num` of a reply reporting failure.
pub const FAILURE: i32 = -1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Lookup {
        parent: InodeNumber,
        name: String,
    },
    Stat {
        inum: InodeNumber,
    },
    Write {
        inum: InodeNumber,
        offset: usize,
        data: Vec<u8>,
    },
    Read {
        inum: InodeNumber,
        offset: usize,
        len: usize,
    },
    Create {
        parent: InodeNumber,
        type_: InodeType,
        name: String,
    },
    Unlink {
        parent: InodeNumber,
        name: String,
    },
    Shutdown,
    /// A `Feedback` record sent as a request.
    Ping,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Ack,
    Inode(InodeNumber),
    Stat(Stat),
    Data(Vec<u8>),
    Failed,
}

fn to_wire(value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| FsError::InvalidArgument("value does not fit the wire format").into())
}

fn inode_number(node_num: i32) -> Result<InodeNumber> {
    // negative numbers never name an inode
    InodeNumber::try_from(node_num).map_err(|_| FsError::NotFound.into())
}

fn length(value: i32, what: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| FsError::InvalidArgument(what).into())
}

fn name(record: &WireRecord) -> Result<String> {
    let name = record.header.name;
    match std::str::from_utf8(name.as_bytes()) {
        Ok(name) => Ok(name.to_owned()),
        Err(_) => bail!(FsError::InvalidArgument("name is not valid UTF-8")),
    }
}

impl Request {
    pub fn op(&self) -> OpCode {
        match self {
            Request::Lookup { .. } => OpCode::Lookup,
            Request::Stat { .. } => OpCode::Stat,
            Request::Write { .. } => OpCode::Write,
            Request::Read { .. } => OpCode::Read,
            Request::Create { .. } => OpCode::Create,
            Request::Unlink { .. } => OpCode::Unlink,
            Request::Shutdown => OpCode::Shutdown,
            Request::Ping => OpCode::Feedback,
        }
    }

    pub fn to_record(&self) -> Result<WireRecord> {
        let mut record = WireRecord::new(self.op());
        let header = &mut record.header;

        match self {
            Request::Lookup { parent, name } | Request::Unlink { parent, name } => {
                header.node_num = *parent as i32;
                header.name = DirectoryEntryName::try_from(name.as_str())?;
            }
            Request::Stat { inum } => header.node_num = *inum as i32,
            Request::Write { inum, offset, data } => {
                if data.len() > PAYLOAD_SIZE {
                    bail!(FsError::InvalidArgument("write is longer than a block"));
                }
                header.node_num = *inum as i32;
                header.offset = to_wire(*offset)?;
                header.nbytes = data.len() as i32;
                record.payload[..data.len()].copy_from_slice(data);
            }
            Request::Read { inum, offset, len } => {
                if *len > PAYLOAD_SIZE {
                    bail!(FsError::InvalidArgument("read is longer than a block"));
                }
                header.node_num = *inum as i32;
                header.offset = to_wire(*offset)?;
                header.nbytes = *len as i32;
            }
            Request::Create {
                parent,
                type_,
                name,
            } => {
                header.node_num = *parent as i32;
                header.mtype = *type_ as i32;
                header.name = DirectoryEntryName::try_from(name.as_str())?;
            }
            Request::Shutdown | Request::Ping => {}
        }

        Ok(record)
    }

    /// Interprets a reply to this request.
    pub fn parse_response(&self, record: &WireRecord) -> Result<Response> {
        let node_num = record.header.node_num;
        if node_num < 0 {
            return Ok(Response::Failed);
        }

        let response = match self {
            Request::Lookup { .. } => Response::Inode(node_num as InodeNumber),
            Request::Stat { .. } => {
                let WireStat { type_, size } = record.header.stat;
                Response::Stat(Stat {
                    type_: InodeType::try_from(type_)?,
                    size: length(size, "negative size")?,
                })
            }
            Request::Read { len, .. } => {
                Response::Data(record.payload[..(*len).min(PAYLOAD_SIZE)].to_vec())
            }
            _ => Response::Ack,
        };

        Ok(response)
    }
}

impl TryFrom<&WireRecord> for Request {
    type Error = anyhow::Error;

    /// Fails with a [`DecodeError`](super::record::DecodeError) for an unknown operation code
    /// and with an [`FsError`] for fields out of range.
    fn try_from(record: &WireRecord) -> Result<Self> {
        let header = &record.header;

        let request = match record.op()? {
            OpCode::Lookup => Request::Lookup {
                parent: inode_number(header.node_num)?,
                name: name(record)?,
            },
            OpCode::Stat => Request::Stat {
                inum: inode_number(header.node_num)?,
            },
            OpCode::Write => {
                let len = length(header.nbytes, "negative length")?;
                if len > PAYLOAD_SIZE {
                    bail!(FsError::InvalidArgument("write is longer than a block"));
                }
                Request::Write {
                    inum: inode_number(header.node_num)?,
                    offset: length(header.offset, "negative offset")?,
                    data: record.payload[..len].to_vec(),
                }
            }
            OpCode::Read => Request::Read {
                inum: inode_number(header.node_num)?,
                offset: length(header.offset, "negative offset")?,
                len: length(header.nbytes, "negative length")?,
            },
            OpCode::Create => Request::Create {
                parent: inode_number(header.node_num)?,
                type_: InodeType::try_from(header.mtype)?,
                name: name(record)?,
            },
            OpCode::Unlink => Request::Unlink {
                parent: inode_number(header.node_num)?,
                name: name(record)?,
            },
            OpCode::Shutdown => Request::Shutdown,
            OpCode::Feedback => Request::Ping,
        };

        Ok(request)
    }
}

impl Response {
    pub fn into_record(self) -> Result<WireRecord> {
        let mut record = WireRecord::new(OpCode::Feedback);
        let header = &mut record.header;

        match self {
            Response::Ack => {}
            Response::Inode(inum) => header.node_num = inum as i32,
            Response::Stat(Stat { type_, size }) => {
                header.stat = WireStat {
                    type_: type_ as i32,
                    size: to_wire(size)?,
                };
            }
            Response::Data(data) => {
                if data.len() > PAYLOAD_SIZE {
                    bail!("reply data is longer than a block");
                }
                header.nbytes = data.len() as i32;
                record.payload[..data.len()].copy_from_slice(&data);
            }
            Response::Failed => header.node_num = FAILURE,
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::record::DecodeError;

    fn through_wire(request: &Request) -> Request {
        let record = WireRecord::decode(&request.to_record().unwrap().encode().unwrap()).unwrap();
        Request::try_from(&record).unwrap()
    }

    #[test]
    fn test_create_fields() {
        let request = Request::Create {
            parent: 3,
            type_: InodeType::Directory,
            name: "d".to_owned(),
        };
        let record = request.to_record().unwrap();

        assert_eq!(record.op(), Ok(OpCode::Create));
        assert_eq!(record.header.node_num, 3);
        assert_eq!(record.header.mtype, 0);
        assert_eq!(through_wire(&request), request);
    }

    #[test]
    fn test_write_carries_payload() {
        let request = Request::Write {
            inum: 1,
            offset: 4090,
            data: b"abcdef".to_vec(),
        };
        let record = request.to_record().unwrap();

        assert_eq!(record.header.nbytes, 6);
        assert_eq!(&record.payload[..6], b"abcdef");
        assert_eq!(through_wire(&request), request);
    }

    #[test]
    fn test_long_name_is_rejected_before_sending() {
        let request = Request::Lookup {
            parent: 0,
            name: "x".repeat(29),
        };
        assert!(request.to_record().is_err());
    }

    #[test]
    fn test_negative_fields() {
        let mut record = Request::Read {
            inum: 1,
            offset: 0,
            len: 1,
        }
        .to_record()
        .unwrap();
        record.header.offset = -1;

        let err = Request::try_from(&record).unwrap_err();
        assert!(matches!(
            FsError::of(&err),
            Some(FsError::InvalidArgument(_))
        ));

        record.header.offset = 0;
        record.header.node_num = -5;
        let err = Request::try_from(&record).unwrap_err();
        assert_eq!(FsError::of(&err), Some(FsError::NotFound));
    }

    #[test]
    fn test_oversized_write() {
        let mut record = Request::Write {
            inum: 1,
            offset: 0,
            data: vec![],
        }
        .to_record()
        .unwrap();
        record.header.nbytes = PAYLOAD_SIZE as i32 + 1;

        let err = Request::try_from(&record).unwrap_err();
        assert!(matches!(
            FsError::of(&err),
            Some(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unknown_op_is_a_decode_error() {
        let mut record = Request::Shutdown.to_record().unwrap();
        record.header.op = 0;

        let err = Request::try_from(&record).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DecodeError>(),
            Some(&DecodeError::UnknownOp(0))
        );
    }

    #[test]
    fn test_feedback_request_is_ping() {
        assert_eq!(through_wire(&Request::Ping), Request::Ping);
    }

    #[test]
    fn test_replies() {
        let lookup = Request::Lookup {
            parent: 0,
            name: "a".to_owned(),
        };
        let reply = Response::Inode(4).into_record().unwrap();
        assert_eq!(reply.op(), Ok(OpCode::Feedback));
        assert_eq!(lookup.parse_response(&reply).unwrap(), Response::Inode(4));

        let failed = Response::Failed.into_record().unwrap();
        assert_eq!(failed.header.node_num, FAILURE);
        assert_eq!(lookup.parse_response(&failed).unwrap(), Response::Failed);

        let stat = Stat {
            type_: InodeType::Regular,
            size: 6,
        };
        let reply = Response::Stat(stat).into_record().unwrap();
        assert_eq!(reply.header.node_num, 0);
        assert_eq!(
            Request::Stat { inum: 1 }.parse_response(&reply).unwrap(),
            Response::Stat(stat)
        );

        let read = Request::Read {
            inum: 1,
            offset: 2,
            len: 4,
        };
        let reply = Response::Data(b"cdef".to_vec()).into_record().unwrap();
        assert_eq!(
            read.parse_response(&reply).unwrap(),
            Response::Data(b"cdef".to_vec())
        );

        let reply = Response::Ack.into_record().unwrap();
        assert_eq!(Request::Shutdown.parse_response(&reply).unwrap(), Response::Ack);
    }
}
