//! Constants from the SD Specifications
//!
//! Based on SdFat, under the following terms:
//!
//! > Copyright (c) 2011-2018 Bill Greiman
//! > This file is part of the SdFat library for SD memory cards.
//! >
//! > MIT License
//! >
//! > Permission is hereby granted, free of charge, to any person obtaining a
//! > copy of this software and associated documentation files (the "Software"),
//! > to deal in the Software without restriction, including without limitation
//! > the rights to use, copy, modify, merge, publish, distribute, sublicense,
//! > and/or sell copies of the Software, and to permit persons to whom the
//! > Software is furnished to do so, subject to the following conditions:
//! >
//! > The above copyright notice and this permission notice shall be included
//! > in all copies or substantial portions of the Software.
//! >
//! > THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
//! > OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//! > FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//! > AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//! > LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
//! > FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
//! > DEALINGS IN THE SOFTWARE.

use byteorder::{BigEndian, ByteOrder};

//==============================================================================

// SD Card Commands

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - activates the initialization process of an MMC card
pub const CMD1: u8 = 0x01;
/// SEND_IF_COND - verify SD Memory Card interface operating condition.
pub const CMD8: u8 = 0x08;
/// SET_BLOCKLEN - set the block length of a byte-addressed card
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;
/// SD_SEND_OP_COMD - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = 0x29;

//==============================================================================

/// Argument for CMD8: 2.7-3.6V window, check pattern 0xAA
pub const CMD8_VOLTAGE_PATTERN: u32 = 0x0000_01AA;

/// Host Capacity Support bit, in the ACMD41 argument
pub const HCS_BIT: u32 = 0x4000_0000;

/// Card Capacity Status bit, in the first byte of the OCR
pub const OCR_CCS_BIT: u8 = 0x40;

/// Trailer sent in place of a CRC once the card is past CMD8
pub const DUMMY_CRC: u8 = 0xFF;

/// start data token for read or write single block
pub const DATA_START_BLOCK: u8 = 0xFE;

/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x1F;

/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// The byte the card drives when it has nothing to say
pub const IDLE_LINE: u8 = 0xFF;

//==============================================================================

/// A command we can send to the card.
///
/// Application-specific commands need `CMD55` sent immediately before them.
/// That is a property of the command, so it lives in the type.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    /// An ordinary `CMDn`
    Plain(u8),
    /// An application-specific `ACMDn`
    App(u8),
}

impl Command {
    /// The 6-bit command index
    pub const fn index(self) -> u8 {
        match self {
            Command::Plain(idx) | Command::App(idx) => idx & 0x3F,
        }
    }

    /// Build the six byte frame for this command.
    ///
    /// Only `CMD0` and `CMD8` are checked by a card in SPI mode, and they
    /// are sent before we could turn checking off, so only they get a real
    /// CRC.
    pub fn frame(self, arg: u32) -> [u8; 6] {
        let idx = self.index();
        let mut buf = [0x40 | idx, 0, 0, 0, 0, DUMMY_CRC];
        BigEndian::write_u32(&mut buf[1..5], arg);
        if matches!(self, Command::Plain(CMD0) | Command::Plain(CMD8)) {
            buf[5] = crc7(&buf[0..5]);
        }
        buf
    }
}

/// An R1 response - the status byte every command returns.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct R1(pub u8);

impl R1 {
    /// status for card in the ready state
    pub const READY_STATE: u8 = 0x00;
    /// status for card in the idle state
    pub const IDLE_STATE: u8 = 0x01;
    /// status bit for erase reset
    pub const ERASE_RESET: u8 = 0x02;
    /// status bit for illegal command
    pub const ILLEGAL_COMMAND: u8 = 0x04;
    /// status bit for command CRC error
    pub const COMMAND_CRC_ERROR: u8 = 0x08;
    /// status bit for erase sequence error
    pub const ERASE_SEQUENCE_ERROR: u8 = 0x10;
    /// status bit for address error
    pub const ADDRESS_ERROR: u8 = 0x20;
    /// status bit for parameter error
    pub const PARAMETER_ERROR: u8 = 0x40;

    /// Is this a status byte at all? The top bit is always clear.
    pub const fn is_valid(self) -> bool {
        (self.0 & 0x80) == 0
    }

    /// Card is ready and reported no errors
    pub const fn is_ready(self) -> bool {
        self.0 == Self::READY_STATE
    }

    /// Card is idle and reported no errors
    pub const fn is_idle(self) -> bool {
        self.0 == Self::IDLE_STATE
    }

    /// Anything other than the idle flag is set (including an invalid byte)
    pub const fn has_error(self) -> bool {
        self.0 > Self::IDLE_STATE
    }
}

/// Perform the 7-bit CRC used on the SD card
pub fn crc7(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for mut d in data.iter().cloned() {
        for _bit in 0..8 {
            crc <<= 1;
            if ((d & 0x80) ^ (crc & 0x80)) != 0 {
                crc ^= 0x09;
            }
            d <<= 1;
        }
    }
    (crc << 1) | 1
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
