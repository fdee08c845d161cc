// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    Checksum, FormatVersion, Ref,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::{Read, Write},
    path::Path,
};

pub const MAGIC_BYTES: [u8; 4] = [b'C', b'L', b'N', 1];

/// Header of a persisted arena file
///
/// Followed by the raw arena bytes and a trailing checksum over header and
/// arena.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileHeader {
    /// On-disk format version
    pub version: FormatVersion,

    /// Ref of the top-level array at the time the file was written
    pub root: Ref,

    /// Arena length in bytes
    pub arena_len: u64,
}

impl FileHeader {
    #[must_use]
    pub const fn serialized_len() -> usize {
        MAGIC_BYTES.len()
            // Version
            + std::mem::size_of::<u8>()
            // Padding
            + 3
            // Root ref
            + std::mem::size_of::<u64>()
            // Arena length
            + std::mem::size_of::<u64>()
    }
}

impl Encode for FileHeader {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&MAGIC_BYTES)?;

        writer.write_u8(self.version.into())?;
        writer.write_all(&[0; 3])?;

        writer.write_u64::<LittleEndian>(*self.root)?;
        writer.write_u64::<LittleEndian>(self.arena_len)?;

        Ok(())
    }
}

impl Decode for FileHeader {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; MAGIC_BYTES.len()];
        reader.read_exact(&mut magic)?;

        if magic != MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("ArenaFile"));
        }

        let version = reader.read_u8()?;
        let version = FormatVersion::try_from(version)
            .map_err(|()| DecodeError::InvalidTag(("FormatVersion", version)))?;

        let mut pad = [0u8; 3];
        reader.read_exact(&mut pad)?;

        let root = reader.read_u64::<LittleEndian>()?;
        let arena_len = reader.read_u64::<LittleEndian>()?;

        Ok(Self {
            version,
            root: Ref(root),
            arena_len,
        })
    }
}

/// Atomically rewrites a file.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    #[allow(clippy::expect_used)]
    let folder = path.parent().expect("should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;

    Ok(())
}

/// Appends the trailing checksum to a serialized arena file.
#[must_use]
pub fn seal(mut bytes: Vec<u8>) -> Vec<u8> {
    let checksum = Checksum::of(&bytes);

    #[allow(clippy::expect_used)]
    bytes
        .write_u64::<LittleEndian>(*checksum)
        .expect("cannot fail");

    bytes
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_log::test;

    #[test]
    fn file_header_roundtrip() -> crate::Result<()> {
        let header = FileHeader {
            version: FormatVersion::V1,
            root: Ref(16),
            arena_len: 1_024,
        };

        let bytes = header.encode_into_vec();
        assert_eq!(FileHeader::serialized_len(), bytes.len());

        let decoded = FileHeader::decode_from(&mut Cursor::new(bytes))?;
        assert_eq!(header, decoded);

        Ok(())
    }

    #[test]
    fn file_header_bad_magic() {
        let mut bytes = FileHeader {
            version: FormatVersion::V1,
            root: Ref(16),
            arena_len: 0,
        }
        .encode_into_vec();

        bytes[0] = b'X';

        assert!(matches!(
            FileHeader::decode_from(&mut Cursor::new(bytes)),
            Err(DecodeError::InvalidHeader("ArenaFile"))
        ));
    }
}
