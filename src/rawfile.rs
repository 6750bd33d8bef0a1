//! A file stored as a contiguous run of sectors.
//!
//! This is the smallest thing that can stand in for a file system: the caller
//! says where the file starts and how long it is, and gets back an
//! [`embedded_io`] byte stream. Each read turns into partial-sector reads on
//! the [`BlockDevice`], so no sector buffer is needed.

use core::fmt::Debug;

use embedded_io::{ErrorKind, ErrorType, Read, Seek, SeekFrom};

use crate::blockdevice::{BlockDevice, BlockIdx, BLOCK_LEN, BLOCK_LEN_U32};
use crate::trace;

/// The errors a [`RawFile`] can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RawFileError<E>
where
    E: Debug,
{
    /// The underlying block device gave an error
    Device(E),
    /// Tried to seek before the start of the file
    InvalidOffset,
}

impl<E: Debug> embedded_io::Error for RawFileError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            RawFileError::Device(_) => ErrorKind::Other,
            RawFileError::InvalidOffset => ErrorKind::InvalidInput,
        }
    }
}

/// A read-only file of `len` bytes, starting at the first byte of `start`.
pub struct RawFile<'d, D>
where
    D: BlockDevice,
{
    device: &'d mut D,
    start: BlockIdx,
    len: u32,
    offset: u32,
}

impl<'d, D> RawFile<'d, D>
where
    D: BlockDevice,
{
    /// Create a new `RawFile`, positioned at the start.
    pub fn new(device: &'d mut D, start: BlockIdx, len: u32) -> RawFile<'d, D> {
        RawFile {
            device,
            start,
            len,
            offset: 0,
        }
    }

    /// How long is the file?
    pub fn length(&self) -> u32 {
        self.len
    }

    /// Amount of file left to read.
    pub fn left(&self) -> u32 {
        self.len - self.offset
    }

    /// Are we at the end of the file?
    pub fn eof(&self) -> bool {
        self.offset == self.len
    }
}

impl<D> ErrorType for RawFile<'_, D>
where
    D: BlockDevice,
{
    type Error = RawFileError<D::Error>;
}

impl<D> Read for RawFile<'_, D>
where
    D: BlockDevice,
{
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut space = buf.len();
        let mut read = 0;
        while space > 0 && !self.eof() {
            let block_idx = self.start + self.offset / BLOCK_LEN_U32;
            let block_offset = (self.offset % BLOCK_LEN_U32) as usize;
            let to_copy = (BLOCK_LEN - block_offset)
                .min(space)
                .min(self.left() as usize);
            trace!(
                "Reading {} bytes @ {} of block {}",
                to_copy,
                block_offset,
                block_idx.0
            );
            self.device
                .read_partial(
                    Some(&mut buf[read..read + to_copy]),
                    block_idx,
                    block_offset,
                    to_copy,
                )
                .map_err(RawFileError::Device)?;
            read += to_copy;
            space -= to_copy;
            self.offset += to_copy as u32;
        }
        Ok(read)
    }
}

impl<D> Seek for RawFile<'_, D>
where
    D: BlockDevice,
{
    /// Seeking past the end leaves the file at the end.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64, Self::Error> {
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset).unwrap_or(i64::MAX),
            SeekFrom::End(offset) => i64::from(self.len).saturating_add(offset),
            SeekFrom::Current(offset) => i64::from(self.offset).saturating_add(offset),
        };
        if target < 0 {
            return Err(RawFileError::InvalidOffset);
        }
        self.offset = target.min(i64::from(self.len)) as u32;
        Ok(u64::from(self.offset))
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
