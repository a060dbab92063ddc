//! The failure kinds file operations report.
//!
//! Operations return [`anyhow::Result`]; a failure that belongs to one of these kinds carries
//! an [`FsError`] that can be recovered with [`FsError::of`], through any added context.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The inode, entry or block does not exist.
    NotFound,
    /// A name, offset, length or type tag is out of range.
    InvalidArgument(&'static str),
    /// The inode is not of the kind the operation needs.
    TypeMismatch,
    /// The inode table, data region or direct-pointer array is full.
    ResourceExhausted(&'static str),
    /// The directory still holds entries other than `.` and `..`.
    DirectoryNotEmpty,
    /// No reply came back from the server.
    TransportFailure,
}

impl FsError {
    /// The failure kind behind `err`, if it has one.
    pub fn of(err: &anyhow::Error) -> Option<FsError> {
        err.downcast_ref::<FsError>().copied()
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "not found"),
            FsError::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            FsError::TypeMismatch => write!(f, "inode type mismatch"),
            FsError::ResourceExhausted(what) => write!(f, "{what} is full"),
            FsError::DirectoryNotEmpty => write!(f, "directory not empty"),
            FsError::TransportFailure => write!(f, "no reply from server"),
        }
    }
}

impl std::error::Error for FsError {}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};

    use super::*;

    #[test]
    fn test_kind_survives_context() {
        let err = Err::<(), _>(anyhow!(FsError::DirectoryNotEmpty))
            .context("unlinking")
            .context("request")
            .unwrap_err();

        assert_eq!(FsError::of(&err), Some(FsError::DirectoryNotEmpty));
    }

    #[test]
    fn test_plain_errors_have_no_kind() {
        assert_eq!(FsError::of(&anyhow!("disk on fire")), None);
    }
}
