// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    Checksum,
};

/// Represents errors that can occur in the storage core
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// The allocator could not satisfy a request
    ///
    /// Operations are transactional at the granularity of a single call;
    /// when this is returned, no partial mutation has been applied.
    OutOfMemory,

    /// A header or ref violates the persisted-format invariants
    CorruptData(&'static str),

    /// Operation on a subtable wrapper that has been invalidated
    StaleSubtable,

    /// Invalid or unparsable data format version
    InvalidVersion(u8),

    /// Invalid checksum value (got, expected)
    InvalidChecksum((Checksum, Checksum)),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ColonnadeError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Crate result
pub type Result<T> = std::result::Result<T, Error>;
