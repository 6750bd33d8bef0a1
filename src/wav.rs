//! WAV header handling.
//!
//! We only play one kind of file: a canonical 44 byte RIFF/WAVE header with
//! a 16 byte `fmt ` chunk describing 8-bit mono PCM, followed directly by the
//! `data` chunk.

use byteorder::{ByteOrder, LittleEndian};
use embedded_io::Read;

use crate::player::{read_full, Error, PwmOutput, SampleTimer};
use crate::{debug, warn};

/// The size of the header we parse.
pub const HEADER_LEN: usize = 44;

/// `WAVE_FORMAT_PCM`
const FORMAT_PCM: u16 = 1;

/// The smallest `fmt ` chunk that describes PCM.
const MIN_FMT_LEN: u32 = 16;

/// Which files we are prepared to play.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WavLimits {
    /// The lowest sample rate the sample timer can produce, in Hz.
    pub min_rate: u32,
    /// The highest sample rate the PWM carrier can carry, in Hz.
    pub max_rate: u32,
    /// Files with less audio data than this, in bytes, are refused.
    pub min_data_len: u32,
}

impl Default for WavLimits {
    fn default() -> Self {
        WavLimits {
            min_rate: 8_000,
            max_rate: 10_000,
            min_data_len: 1024,
        }
    }
}

/// How the sample-rate timer is clocked.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimerClock {
    /// The timer's input clock, in Hz.
    pub input_hz: u32,
    /// The prescaler between the input clock and the counter.
    pub prescaler: u32,
}

impl TimerClock {
    /// The compare value which makes a clear-on-match timer fire at `rate`
    /// Hz.
    pub fn divisor(&self, rate: u32) -> u32 {
        (self.input_hz / self.prescaler.max(1) / rate.max(1)).saturating_sub(1)
    }
}

impl Default for TimerClock {
    fn default() -> Self {
        TimerClock {
            input_hz: 16_000_000,
            prescaler: 8,
        }
    }
}

/// Reasons a WAV header is refused.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Doesn't start with `RIFF`
    NotRiff,
    /// The RIFF form type isn't `WAVE`
    NotWave,
    /// The first chunk isn't `fmt `
    NoFormatChunk,
    /// The `fmt ` chunk is too small to describe PCM
    FormatChunkTooSmall(u32),
    /// The coding type isn't PCM
    NotPcm(u16),
    /// This many channels, instead of one
    NotMono(u16),
    /// This many bits per sample, instead of eight
    Not8Bit(u16),
    /// A sample rate outside the supported range
    UnsupportedRate(u32),
    /// The `data` chunk doesn't follow the `fmt ` chunk
    NoDataChunk,
    /// Too little audio to bother with
    TooShort(u32),
}

/// A WAV file header.
#[derive(Clone, PartialEq, Eq)]
pub struct WavHeader {
    data: [u8; HEADER_LEN],
}

impl WavHeader {
    /// Wrap up the first bytes of a file.
    pub fn new(data: [u8; HEADER_LEN]) -> WavHeader {
        WavHeader { data }
    }

    define_field!(riff_id, fourcc, 0);
    define_field!(riff_len, u32, 4);
    define_field!(form_type, fourcc, 8);
    define_field!(fmt_id, fourcc, 12);
    define_field!(fmt_len, u32, 16);
    define_field!(audio_format, u16, 20);
    define_field!(num_channels, u16, 22);
    define_field!(sample_rate, u32, 24);
    define_field!(byte_rate, u32, 28);
    define_field!(block_align, u16, 32);
    define_field!(bits_per_sample, u16, 34);
    define_field!(data_id, fourcc, 36);
    define_field!(data_len, u32, 40);

    /// Check this is a file we can play.
    pub fn validate(&self, limits: &WavLimits) -> Result<(), FormatError> {
        if &self.riff_id() != b"RIFF" {
            return Err(FormatError::NotRiff);
        }
        if &self.form_type() != b"WAVE" {
            return Err(FormatError::NotWave);
        }
        if &self.fmt_id() != b"fmt " {
            return Err(FormatError::NoFormatChunk);
        }
        if self.fmt_len() < MIN_FMT_LEN {
            return Err(FormatError::FormatChunkTooSmall(self.fmt_len()));
        }
        if self.audio_format() != FORMAT_PCM {
            return Err(FormatError::NotPcm(self.audio_format()));
        }
        if self.num_channels() != 1 {
            return Err(FormatError::NotMono(self.num_channels()));
        }
        if self.bits_per_sample() != 8 {
            return Err(FormatError::Not8Bit(self.bits_per_sample()));
        }
        let rate = self.sample_rate();
        if rate < limits.min_rate || rate > limits.max_rate {
            return Err(FormatError::UnsupportedRate(rate));
        }
        if &self.data_id() != b"data" {
            return Err(FormatError::NoDataChunk);
        }
        if self.data_len() < limits.min_data_len {
            return Err(FormatError::TooShort(self.data_len()));
        }
        Ok(())
    }
}

impl core::fmt::Debug for WavHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WavHeader")
            .field("audio_format", &self.audio_format())
            .field("num_channels", &self.num_channels())
            .field("sample_rate", &self.sample_rate())
            .field("bits_per_sample", &self.bits_per_sample())
            .field("data_len", &self.data_len())
            .finish()
    }
}

/// Read and check the header at the start of `file`, then set up the
/// hardware to play it.
///
/// On success the sample timer has been given the divisor for the file's
/// sample rate, the PWM output has been initialised, the file is positioned
/// at the first sample and the length of the audio data in bytes is
/// returned. A file the hardware can't play gives [`Error::Format`], and a
/// file too short to hold a header gives [`Error::ShortRead`].
pub fn load_header<F, TIM, PWM>(
    file: &mut F,
    timer: &mut TIM,
    pwm: &mut PWM,
    limits: &WavLimits,
    clock: &TimerClock,
) -> Result<u32, Error<F::Error>>
where
    F: Read,
    TIM: SampleTimer,
    PWM: PwmOutput,
{
    let mut data = [0u8; HEADER_LEN];
    let count = read_full(file, &mut data).map_err(Error::Io)?;
    if count != HEADER_LEN {
        return Err(Error::ShortRead {
            expected: HEADER_LEN,
            actual: count,
        });
    }
    let header = WavHeader::new(data);
    debug!(
        "WAV: {} Hz, {} bit, {} channel(s), {} bytes",
        header.sample_rate(),
        header.bits_per_sample(),
        header.num_channels(),
        header.data_len()
    );
    header.validate(limits).map_err(|e| {
        warn!("Can't play file: {:?}", e);
        Error::Format(e)
    })?;
    timer.set_divisor(clock.divisor(header.sample_rate()));
    pwm.init();
    Ok(header.data_len())
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
