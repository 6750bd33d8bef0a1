//! # embedded-wavplay
//!
//! > An SD/MMC WAV player written in Embedded Rust
//!
//! This crate plays 8-bit mono PCM WAV files from an SD or MMC card on a
//! microcontroller with no operating system. It is written in pure-Rust, is
//! `#![no_std]` and does not use `alloc`.
//!
//! It is made of two parts:
//!
//! * An SD/MMC protocol engine ([`SdCard`]) which talks to the card over a
//!   byte-wide serial transport ([`SdTransport`]) and exposes the narrow,
//!   partial-sector [`BlockDevice`] contract that small FAT implementations
//!   expect.
//! * A double-buffered streaming engine ([`Player`]) which refills two small
//!   buffers from a file in the foreground while a sample-rate interrupt
//!   drains them into a PWM duty register.
//!
//! ## Using the crate
//!
//! ```rust
//! use embedded_wavplay::{
//!     load_header, BlockDevice, BlockIdx, Player, PwmOutput, RawFile, SampleStream,
//!     SampleTimer, SdCard, SdTransport, TimerClock, WavLimits,
//! };
//!
//! static STREAM: SampleStream<128> = SampleStream::new();
//!
//! fn play<T, D, TIM, PWM>(transport: T, delay: D, timer: &mut TIM, pwm: &mut PWM)
//! where
//!     T: SdTransport,
//!     D: embedded_hal::delay::DelayNs,
//!     TIM: SampleTimer,
//!     PWM: PwmOutput,
//! {
//!     let mut card = SdCard::new(transport, delay);
//!     if card.initialize().is_err() {
//!         return;
//!     }
//!     // A WAV file stored raw, 200 sectors long, starting at sector 2048.
//!     let mut file = RawFile::new(&mut card, BlockIdx(2048), 200 * 512);
//!     let limits = WavLimits::default();
//!     if load_header(&mut file, timer, pwm, &limits, &TimerClock::default()).is_ok() {
//!         let mut player = Player::new(&STREAM);
//!         let _ = player.play(&mut file, timer, pwm);
//!     }
//! }
//!
//! // In the sample-rate timer interrupt:
//! fn on_timer_interrupt<PWM: PwmOutput>(pwm: &mut PWM) {
//!     STREAM.on_sample_tick(pwm);
//! }
//! ```
//!
//! ## Features
//!
//! * `log`: Enabled by default. Generates log messages using the `log` crate.
//! * `defmt-log`: By turning off the default features and enabling the
//!   `defmt-log` feature you can configure this crate to log messages over defmt
//!   instead.
//! * `embassy-sync-06`: Enabled by default. Provides a transport which shares
//!   an SPI bus through an `embassy-sync` blocking mutex.
//!
//! You cannot enable both the `log` feature and the `defmt-log` feature.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

#[cfg(test)]
#[macro_use]
extern crate hex_literal;

#[macro_use]
mod structure;

pub mod blockdevice;
pub mod player;
pub mod rawfile;
pub mod sdcard;
pub mod wav;

#[doc(inline)]
pub use crate::blockdevice::{Block, BlockDevice, BlockIdx, Status, WriteOp, BLOCK_LEN};

#[doc(inline)]
pub use crate::sdcard::{
    transport::{BusClock, BusSpeed, SdTransport, SpiTransport},
    AcquireOpts, CardType, Error as SdCardError, SdCard,
};

#[cfg(feature = "embassy-sync-06")]
#[doc(inline)]
pub use crate::sdcard::transport::SharedSpiTransport;

#[doc(inline)]
pub use crate::wav::{load_header, FormatError, TimerClock, WavHeader, WavLimits};

#[doc(inline)]
pub use crate::player::{
    stream::SampleStream, Error as PlayError, PlaybackStats, Player, PlayerState, PwmOutput,
    SampleTimer,
};

#[doc(inline)]
pub use crate::rawfile::{RawFile, RawFileError};

// ****************************************************************************
//
// Logging
//
// ****************************************************************************

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::debug! but does nothing at all
macro_rules! debug {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::trace! but does nothing at all
macro_rules! trace {
    ($($arg:tt)+) => {};
}

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
#[macro_export]
/// Like log::warn! but does nothing at all
macro_rules! warn {
    ($($arg:tt)+) => {};
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
