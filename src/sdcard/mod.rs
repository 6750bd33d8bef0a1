//! The SD/MMC Protocol
//!
//! Implements the SD/MMC protocol in SPI mode on some generic byte-wide
//! transport, and exposes it as a partial-sector [`BlockDevice`].
//!
//! This is currently optimised for readability and debugability, not
//! performance.

pub mod proto;
pub mod transport;

use embedded_hal::delay::DelayNs;

use crate::blockdevice::{BlockDevice, BlockIdx, Status, WriteOp, BLOCK_LEN, BLOCK_LEN_U32};
use proto::*;
use transport::SdTransport;

// ****************************************************************************
// Imports
// ****************************************************************************

use crate::{debug, trace, warn};

// ****************************************************************************
// Constants
// ****************************************************************************

/// Every data block is followed by a 16-bit CRC. We never check it.
const CRC_LEN: usize = 2;

/// A card answers a command within 8 bytes; we give it 10.
const RESPONSE_POLLS: usize = 10;

/// We clock at least 74 cycles with chip-select released at power-up.
const POWER_UP_BYTES: usize = 10;

// ****************************************************************************
// Types and Implementations
// ****************************************************************************

/// Driver for an SD or MMC card on a serial transport.
///
/// This is the session object: it holds what we learned about the card
/// during [`SdCard::acquire`] and the state of any sector write in progress.
/// Only one sector write may be open at a time.
pub struct SdCard<T, DELAYER>
where
    T: SdTransport,
    DELAYER: DelayNs,
{
    transport: T,
    delayer: DELAYER,
    card_type: Option<CardType>,
    write_remaining: Option<usize>,
    options: AcquireOpts,
}

impl<T, DELAYER> SdCard<T, DELAYER>
where
    T: SdTransport,
    DELAYER: DelayNs,
{
    /// Create a new SD/MMC Card driver.
    ///
    /// The card will not be initialised at this time. Call
    /// [`BlockDevice::initialize`] (or [`SdCard::acquire`]) first.
    ///
    /// Uses the default options.
    pub fn new(transport: T, delayer: DELAYER) -> SdCard<T, DELAYER> {
        Self::new_with_options(transport, delayer, AcquireOpts::default())
    }

    /// Construct a new SD/MMC Card driver, using the given options.
    pub fn new_with_options(
        transport: T,
        delayer: DELAYER,
        options: AcquireOpts,
    ) -> SdCard<T, DELAYER> {
        SdCard {
            transport,
            delayer,
            card_type: None,
            write_remaining: None,
            options,
        }
    }

    /// Get a temporary borrow on the underlying transport.
    pub fn transport<R, F>(&mut self, func: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        func(&mut self.transport)
    }

    /// Get the card type, if the card has been initialised.
    pub fn card_type(&self) -> Option<CardType> {
        self.card_type
    }

    /// Does the card take block numbers (rather than byte offsets) as
    /// addresses?
    pub fn is_block_addressed(&self) -> bool {
        self.card_type
            .map(CardType::is_block_addressed)
            .unwrap_or(false)
    }

    /// Mark the card as requiring a reset.
    ///
    /// The next operation will fail with [`Error::NotReady`] until the card
    /// is initialised again.
    pub fn mark_card_uninit(&mut self) {
        self.card_type = None;
    }

    /// Give back the transport and the delayer.
    pub fn free(self) -> (T, DELAYER) {
        (self.transport, self.delayer)
    }

    /// Initializes the card into a known state (or at least tries to).
    ///
    /// Any sector write left open is finished first, as the reset would
    /// otherwise lose it.
    pub fn acquire(&mut self) -> Result<CardType, Error> {
        debug!("acquiring card with opts: {:?}", self.options);
        if self.write_remaining.is_some() {
            debug!("Finishing open write before reset");
            if let Err(_e) = self.finish_write() {
                warn!("Open write lost: {:?}", _e);
            }
        }
        self.card_type = None;
        let result = self.identify();
        self.transport.deselect();
        match result {
            Ok(card_type) => {
                debug!("Card version: {:?}", card_type);
                self.transport.set_fast_mode();
                self.card_type = Some(card_type);
                Ok(card_type)
            }
            Err(_e) => {
                warn!("Card not found: {:?}", _e);
                Err(Error::NotReady)
            }
        }
    }

    /// Work out what kind of card we have and get it out of the idle state.
    fn identify(&mut self) -> Result<CardType, Error> {
        trace!("Reset card..");
        self.transport.init();
        self.transport.deselect();
        for _ in 0..POWER_UP_BYTES {
            self.transport.receive();
        }

        // Enter SPI mode
        let limit = self.options.idle_retries;
        self.retry_until(limit.into(), Error::TimeoutCommand(CMD0), |s| {
            let r1 = s.send_command(Command::Plain(CMD0), 0);
            if !r1.is_idle() {
                trace!("Enter SPI mode, got {:x}", r1.0);
            }
            r1.is_idle()
        })?;

        // Check card version
        let card_type = if self
            .send_command(Command::Plain(CMD8), CMD8_VOLTAGE_PATTERN)
            .is_idle()
        {
            let mut ocr = [0xFF; 4];
            self.receive_bytes(&mut ocr);
            if ocr[2..4] != [0x01, 0xAA] {
                warn!("Bad CMD8 echo: {:?}", ocr);
                return Err(Error::CommandRejected {
                    command: CMD8,
                    response: ocr[3],
                });
            }
            self.wait_ready(Command::App(ACMD41), HCS_BIT)?;
            let r1 = self.send_command(Command::Plain(CMD58), 0);
            if !r1.is_ready() {
                return Err(Error::CommandRejected {
                    command: CMD58,
                    response: r1.0,
                });
            }
            self.receive_bytes(&mut ocr);
            if (ocr[0] & OCR_CCS_BIT) != 0 {
                CardType::SDHC
            } else {
                CardType::SD2
            }
        } else {
            match self.wait_ready(Command::App(ACMD41), 0) {
                Ok(()) => CardType::SD1,
                Err(_e) => {
                    debug!("ACMD41 failed ({:?}), trying MMC", _e);
                    self.wait_ready(Command::Plain(CMD1), 0)?;
                    CardType::MMC
                }
            }
        };

        if !card_type.is_block_addressed() {
            let r1 = self.send_command(Command::Plain(CMD16), BLOCK_LEN_U32);
            if !r1.is_ready() {
                warn!("SET_BLOCKLEN got {:x}", r1.0);
            }
        }
        Ok(card_type)
    }

    /// Repeat an initialisation command until the card leaves the idle
    /// state.
    fn wait_ready(&mut self, command: Command, arg: u32) -> Result<(), Error> {
        let limit = self.options.init_retries;
        self.retry_until(limit.into(), Error::TimeoutCommand(command.index()), |s| {
            s.send_command(command, arg).is_ready()
        })
    }

    /// Perform a command, and return the card's R1 response.
    ///
    /// Application-specific commands are preceded by `CMD55`; if that fails
    /// its response is returned instead. Leaves the card selected.
    ///
    /// If the card never answers, the last byte read comes back, which will
    /// have its top bit set.
    pub fn send_command(&mut self, command: Command, arg: u32) -> R1 {
        if let Command::App(_) = command {
            // CMD55 takes the relative card address, which is zero in SPI mode
            let r1 = self.send_frame(Command::Plain(CMD55), 0);
            if r1.has_error() {
                return r1;
            }
        }
        self.send_frame(command, arg)
    }

    fn send_frame(&mut self, command: Command, arg: u32) -> R1 {
        // Give the card some extra clocks while re-selecting it, so it
        // doesn't lose sync.
        self.transport.deselect();
        self.transport.select();
        self.transport.receive();

        for b in command.frame(arg) {
            self.transport.send(b);
        }

        let mut r1 = R1(IDLE_LINE);
        for _ in 0..RESPONSE_POLLS {
            r1 = R1(self.transport.receive());
            if r1.is_valid() {
                break;
            }
        }
        trace!("CMD{} {:x} -> {:x}", command.index(), arg, r1.0);
        r1
    }

    /// Read a run of the 512 + 2 byte data block at `address`.
    fn read_window(
        &mut self,
        dest: Option<&mut [u8]>,
        address: u32,
        offset: usize,
        count: usize,
    ) -> Result<(), Error> {
        let r1 = self.send_command(Command::Plain(CMD17), address);
        if !r1.is_ready() {
            return Err(Error::CommandRejected {
                command: CMD17,
                response: r1.0,
            });
        }

        // Get first non-FF byte.
        let mut token = IDLE_LINE;
        let limit = self.options.read_token_retries;
        self.retry_until(limit.into(), Error::TimeoutReadBuffer, |s| {
            token = s.transport.receive();
            token != IDLE_LINE
        })?;
        if token != DATA_START_BLOCK {
            return Err(Error::BadToken(token));
        }

        self.skip_bytes(offset);
        match dest {
            Some(buffer) => self.receive_bytes(&mut buffer[..count]),
            None => self.skip_bytes(count),
        }
        // Leave the card at the end of the block, CRC included
        self.skip_bytes(BLOCK_LEN + CRC_LEN - offset - count);
        Ok(())
    }

    /// Start writing a block. On success the card stays selected and is
    /// waiting for data.
    fn open_write(&mut self, block_idx: BlockIdx) -> Result<(), Error> {
        let card_type = self.card_type.ok_or(Error::NotReady)?;
        if self.write_remaining.is_some() {
            return Err(Error::WriteAlreadyOpen);
        }
        trace!("Open write of block {}", block_idx.0);
        let r1 = self.send_command(Command::Plain(CMD24), card_type.address(block_idx));
        if !r1.is_ready() {
            self.transport.deselect();
            return Err(Error::CommandRejected {
                command: CMD24,
                response: r1.0,
            });
        }
        self.transport.send(IDLE_LINE);
        self.transport.send(DATA_START_BLOCK);
        self.write_remaining = Some(BLOCK_LEN);
        Ok(())
    }

    /// Send bytes into the open block. Anything which doesn't fit is
    /// dropped.
    fn append_write(&mut self, data: &[u8]) -> Result<(), Error> {
        let remaining = self.write_remaining.as_mut().ok_or(Error::WriteNotOpen)?;
        let count = data.len().min(*remaining);
        for &b in &data[..count] {
            self.transport.send(b);
        }
        *remaining -= count;
        Ok(())
    }

    /// Pad out the open block, then wait for the card to program it.
    fn finish_write(&mut self) -> Result<(), Error> {
        let remaining = self.write_remaining.take().ok_or(Error::WriteNotOpen)?;
        trace!("Close write, padding {} bytes", remaining);
        for _ in 0..(remaining + CRC_LEN) {
            self.transport.send(0x00);
        }
        let result = self.wait_write_done();
        self.transport.deselect();
        result
    }

    fn wait_write_done(&mut self) -> Result<(), Error> {
        let status = self.transport.receive();
        if (status & DATA_RES_MASK) != DATA_RES_ACCEPTED {
            return Err(Error::WriteRejected(status));
        }
        let limit = self.options.write_busy_retries;
        self.retry_until(limit.into(), Error::TimeoutWaitNotBusy, |s| {
            s.transport.receive() == IDLE_LINE
        })
    }

    /// Call `done` until it returns true, or until `delay` runs out of
    /// retries, in which case `err` is returned.
    fn retry_until<F>(&mut self, mut delay: Delay, err: Error, mut done: F) -> Result<(), Error>
    where
        F: FnMut(&mut Self) -> bool,
    {
        loop {
            if done(self) {
                return Ok(());
            }
            delay.delay(&mut self.delayer, err)?;
        }
    }

    /// Fill the buffer with bytes from the card.
    fn receive_bytes(&mut self, buffer: &mut [u8]) {
        for b in buffer.iter_mut() {
            *b = self.transport.receive();
        }
    }

    /// Clock past bytes from the card.
    fn skip_bytes(&mut self, count: usize) {
        for _ in 0..count {
            self.transport.receive();
        }
    }
}

impl<T, DELAYER> BlockDevice for SdCard<T, DELAYER>
where
    T: SdTransport,
    DELAYER: DelayNs,
{
    type Error = Error;

    fn initialize(&mut self) -> Result<(), Self::Error> {
        self.acquire().map(|_| ())
    }

    fn read_partial(
        &mut self,
        dest: Option<&mut [u8]>,
        block_idx: BlockIdx,
        offset: usize,
        count: usize,
    ) -> Result<(), Self::Error> {
        let card_type = self.card_type.ok_or(Error::NotReady)?;
        if self.write_remaining.is_some() {
            // Selecting the card for a read would abandon the open block
            return Err(Error::WriteAlreadyOpen);
        }
        match offset.checked_add(count) {
            Some(end) if end <= BLOCK_LEN => {}
            _ => return Err(Error::ParameterError),
        }
        if dest.as_ref().is_some_and(|buffer| buffer.len() < count) {
            return Err(Error::ParameterError);
        }
        trace!(
            "Read {} bytes @ {} of block {}",
            count,
            offset,
            block_idx.0
        );
        let result = self.read_window(dest, card_type.address(block_idx), offset, count);
        self.transport.deselect();
        result
    }

    fn write_partial(&mut self, op: WriteOp<'_>) -> Result<(), Self::Error> {
        match op {
            WriteOp::Open(block_idx) => self.open_write(block_idx),
            WriteOp::Data(data) => self.append_write(data),
            WriteOp::Close => self.finish_write(),
        }
    }

    fn status(&self) -> Status {
        if self.card_type.is_some() {
            Status::Ready
        } else {
            Status::NotReady
        }
    }
}

/// A retry ceiling and the pause between attempts.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryLimit {
    /// How many times to retry before giving up
    pub retries: u32,
    /// How long to wait between attempts, in microseconds
    pub interval_us: u32,
}

impl From<RetryLimit> for Delay {
    fn from(limit: RetryLimit) -> Delay {
        Delay::new(limit.retries, limit.interval_us)
    }
}

/// Options for acquiring and talking to the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone)]
pub struct AcquireOpts {
    /// Sending `CMD0` until the card goes idle. ~100ms by default.
    pub idle_retries: RetryLimit,

    /// Sending `ACMD41` or `CMD1` until the card is ready. The SD specification
    /// allows the card up to a second, which is the default.
    pub init_retries: RetryLimit,

    /// Waiting for the start of a data block. ~100ms by default.
    ///
    /// See `Part1_Physical_Layer_Simplified_Specification_Ver9.00-1.pdf` Section 4.6.2.1
    pub read_token_retries: RetryLimit,

    /// Waiting for the card to finish programming a block. ~500ms by default.
    ///
    /// See `Part1_Physical_Layer_Simplified_Specification_Ver9.00-1.pdf` Section 4.6.2.2
    pub write_busy_retries: RetryLimit,
}

impl Default for AcquireOpts {
    fn default() -> Self {
        AcquireOpts {
            idle_retries: RetryLimit {
                retries: 1_000,
                interval_us: 100,
            },
            init_retries: RetryLimit {
                retries: 10_000,
                interval_us: 100,
            },
            read_token_retries: RetryLimit {
                retries: 10_000,
                interval_us: 10,
            },
            write_busy_retries: RetryLimit {
                retries: 50_000,
                interval_us: 10,
            },
        }
    }
}

/// The possible errors the card driver can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The card has not been (successfully) initialised
    NotReady,
    /// The offset and count don't fit inside a block, or the buffer is too
    /// small
    ParameterError,
    /// We didn't get the response we wanted to this command in time
    TimeoutCommand(u8),
    /// The card rejected this command
    CommandRejected {
        /// The command index
        command: u8,
        /// What the card said
        response: u8,
    },
    /// We didn't get a data token when reading a block
    TimeoutReadBuffer,
    /// We got something other than a data token when reading a block
    BadToken(u8),
    /// We didn't get a response when waiting for the card to not be busy
    TimeoutWaitNotBusy,
    /// The card did not accept the block we wrote
    WriteRejected(u8),
    /// A block write is already in progress
    WriteAlreadyOpen,
    /// There is no block write in progress
    WriteNotOpen,
}

impl Error {
    /// Did we give up waiting on the card?
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::TimeoutCommand(_) | Error::TimeoutReadBuffer | Error::TimeoutWaitNotBusy
        )
    }
}

/// The different types of card we support.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardType {
    /// An standard-capacity SD Card supporting v1.x of the standard.
    ///
    /// Uses byte-addressing internally, so limited to 2GiB in size.
    SD1,
    /// An standard-capacity SD Card supporting v2.x of the standard.
    ///
    /// Uses byte-addressing internally, so limited to 2GiB in size.
    SD2,
    /// An high-capacity 'SDHC' or 'SDXC' Card.
    ///
    /// Uses block-addressing internally to support capacities above 2GiB.
    SDHC,
    /// A MultiMediaCard, version 3.
    ///
    /// Uses byte-addressing internally.
    MMC,
}

impl CardType {
    /// Does this card take block numbers as addresses?
    pub const fn is_block_addressed(self) -> bool {
        matches!(self, CardType::SDHC)
    }

    /// The command argument which addresses the given block.
    fn address(self, block_idx: BlockIdx) -> u32 {
        if self.is_block_addressed() {
            block_idx.0
        } else {
            block_idx.into_bytes()
        }
    }
}

/// This an object you can use to busy-wait with a timeout.
///
/// Will let you call `delay` up to `max_retries` times before `delay` returns
/// an error.
struct Delay {
    retries_left: u32,
    interval_us: u32,
}

impl Delay {
    /// Create a new Delay object with the given maximum number of retries.
    fn new(max_retries: u32, interval_us: u32) -> Delay {
        Delay {
            retries_left: max_retries,
            interval_us,
        }
    }

    /// Wait for a while.
    ///
    /// Checks the retry counter first, and if we hit the max retry limit, the
    /// value `err` is returned. Otherwise we wait for the interval and then
    /// return `Ok(())`.
    fn delay<T>(&mut self, delayer: &mut T, err: Error) -> Result<(), Error>
    where
        T: DelayNs,
    {
        if self.retries_left == 0 {
            Err(err)
        } else {
            if self.interval_us != 0 {
                delayer.delay_us(self.interval_us);
            }
            self.retries_left -= 1;
            Ok(())
        }
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
