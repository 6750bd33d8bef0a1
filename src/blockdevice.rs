//! Traits and types for working with Block Devices.
//!
//! This is the narrow, partial-sector interface that small FAT
//! implementations are written against. A file system never asks for a whole
//! sector at once: it reads a window of a sector (or skips one) and writes a
//! sector as a stream of small pieces between an open and a close.

/// A standard 512 byte block (also known as a sector).
///
/// Almost all SD/MMC cards have 512 byte blocks, and byte-addressed cards are
/// told to use this size during initialisation.
pub type Block = [u8; BLOCK_LEN];

/// All our blocks are a fixed length of 512 bytes.
pub const BLOCK_LEN: usize = 512;

/// Sometimes we want `LEN` as a `u32` and the casts don't look nice.
pub const BLOCK_LEN_U32: u32 = 512;

/// The linear numeric address of a block (or sector).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIdx(pub u32);

impl BlockIdx {
    /// The byte offset of the start of this block.
    ///
    /// Byte-addressed cards take this value as their command argument.
    pub const fn into_bytes(self) -> u32 {
        self.0 << 9
    }
}

impl core::ops::Add<u32> for BlockIdx {
    type Output = BlockIdx;
    fn add(self, rhs: u32) -> BlockIdx {
        BlockIdx(self.0 + rhs)
    }
}

/// Whether a device can currently service requests.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// The device has been initialised.
    Ready,
    /// The device needs [`BlockDevice::initialize`] before use.
    NotReady,
}

/// One step of a streaming sector write.
///
/// A sector is written as `Open`, then any number of `Data` steps, then
/// `Close`. Only one sector can be open at a time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteOp<'a> {
    /// Start writing the given block.
    Open(BlockIdx),
    /// Append bytes to the open block. Anything past the end of the block is
    /// dropped.
    Data(&'a [u8]),
    /// Finish the open block. Any bytes not yet supplied are written as
    /// zero.
    Close,
}

/// Represents a block device - a device which can read and write 512 byte
/// sectors, one window at a time.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;

    /// Bring the device into a state where it can service requests.
    ///
    /// Any write left open by a previous session is finished first.
    fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Read `count` bytes, starting `offset` bytes into the given block.
    ///
    /// With `dest` set to `None` the bytes are clocked past and thrown away,
    /// which is how a file system skips forward. `offset + count` must not
    /// exceed [`BLOCK_LEN`].
    fn read_partial(
        &mut self,
        dest: Option<&mut [u8]>,
        block_idx: BlockIdx,
        offset: usize,
        count: usize,
    ) -> Result<(), Self::Error>;

    /// Perform one step of a streaming sector write.
    fn write_partial(&mut self, op: WriteOp<'_>) -> Result<(), Self::Error>;

    /// Report whether the device has been initialised.
    fn status(&self) -> Status;

    /// Read one whole block.
    fn read_block(&mut self, block: &mut Block, block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.read_partial(Some(&mut block[..]), block_idx, 0, BLOCK_LEN)
    }

    /// Write one whole block.
    fn write_block(&mut self, block: &Block, block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.write_partial(WriteOp::Open(block_idx))?;
        self.write_partial(WriteOp::Data(&block[..]))?;
        self.write_partial(WriteOp::Close)
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
