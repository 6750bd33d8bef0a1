//! The audio streaming engine.
//!
//! Playback runs in two contexts. The foreground ([`Player::play`]) reads the
//! file in buffer-sized pieces, and a periodic interrupt at the sample rate
//! ([`SampleStream::on_sample_tick`]) pushes one byte per tick into the PWM
//! duty register. The two meet in a [`SampleStream`].

pub mod stream;

use embedded_io::{Read, Seek, SeekFrom};

use crate::blockdevice::BLOCK_LEN;
use crate::wav::FormatError;
use crate::{debug, warn};
use stream::SampleStream;

/// The duty value which puts the output at mid-scale.
pub const SILENCE: u8 = 0x80;

/// The periodic timer which fires once per sample.
pub trait SampleTimer {
    /// Set the compare value the counter is cleared at.
    fn set_divisor(&mut self, divisor: u32);

    /// Start the timer and enable its interrupt.
    fn start(&mut self);

    /// Stop the timer and disable its interrupt.
    fn stop(&mut self);

    /// Called while the foreground has nothing to do but wait for the
    /// interrupt. Firmware may sleep until the next interrupt here.
    fn idle(&mut self) {
        core::hint::spin_loop()
    }
}

/// An 8-bit PWM output used as a DAC.
pub trait PwmOutput {
    /// Configure the output pin and carrier.
    fn init(&mut self);

    /// Start the carrier.
    fn start(&mut self);

    /// Stop the carrier.
    fn stop(&mut self);

    /// Set the output level for the next sample period.
    fn set_duty(&mut self, duty: u8);
}

/// Where a [`Player`] is in playing a file.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing played yet
    Idle,
    /// Filling both buffers
    Priming,
    /// The interrupt is running and we are refilling buffers
    Playing,
    /// The file is exhausted and the interrupt is emptying the buffers
    Draining,
    /// Playback finished and the hardware is stopped
    Stopped,
}

/// What happened during a call to [`Player::play`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Samples written to the PWM output
    pub samples: u32,
    /// Sample periods which found nothing to play
    pub underruns: u32,
    /// Bytes read from the file, after the alignment skip
    pub bytes_read: u32,
}

/// The errors that loading or playing a file can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error<E> {
    /// The file could not be read or seeked
    Io(E),
    /// The file ended before the header did
    ShortRead {
        /// How many bytes we wanted
        expected: usize,
        /// How many bytes we got
        actual: usize,
    },
    /// The file isn't one we can play
    Format(FormatError),
}

impl<E> From<FormatError> for Error<E> {
    fn from(value: FormatError) -> Self {
        Error::Format(value)
    }
}

/// Plays files through a [`SampleStream`].
///
/// The sample-rate interrupt must call [`SampleStream::on_sample_tick`] on
/// the same stream.
pub struct Player<'s, const N: usize> {
    stream: &'s SampleStream<N>,
    state: PlayerState,
}

impl<'s, const N: usize> Player<'s, N> {
    /// Create a new `Player` feeding the given stream.
    pub const fn new(stream: &'s SampleStream<N>) -> Player<'s, N> {
        Player {
            stream,
            state: PlayerState::Idle,
        }
    }

    /// Where playback has got to.
    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Play the rest of `file`, which must be positioned just after its
    /// header (see [`crate::load_header`]).
    ///
    /// Returns once every sample read from the file has been played and the
    /// timer and PWM output are stopped. A read which fails part way through
    /// ends playback early, and is returned once the buffered samples have
    /// played out.
    pub fn play<F, TIM, PWM>(
        &mut self,
        file: &mut F,
        timer: &mut TIM,
        pwm: &mut PWM,
    ) -> Result<PlaybackStats, Error<F::Error>>
    where
        F: Read + Seek,
        TIM: SampleTimer,
        PWM: PwmOutput,
    {
        self.set_state(PlayerState::Priming);
        let primed = match self.prime(file) {
            Ok(primed) => primed,
            Err(e) => {
                self.set_state(PlayerState::Stopped);
                return Err(Error::Io(e));
            }
        };

        self.set_state(PlayerState::Playing);
        pwm.set_duty(SILENCE);
        pwm.start();
        timer.start();

        let mut bytes_read = primed;
        // Both buffers were filled, or the file is already exhausted
        let mut last_read = if primed as usize == 2 * N { N } else { 0 };
        let mut failure = None;
        while last_read == N {
            match self.stream.refill(|buffer| read_full(file, buffer)) {
                Ok(Some(count)) => {
                    last_read = count;
                    bytes_read += count as u32;
                }
                Ok(None) => timer.idle(),
                Err(e) => {
                    warn!("Read failed during playback");
                    failure = Some(e);
                    break;
                }
            }
        }
        self.stream.finish();

        self.set_state(PlayerState::Draining);
        while self.stream.remaining() > 0 {
            timer.idle();
        }
        timer.stop();
        pwm.stop();
        self.set_state(PlayerState::Stopped);

        let stats = PlaybackStats {
            samples: self.stream.emitted(),
            underruns: self.stream.underruns(),
            bytes_read,
        };
        debug!(
            "Played {} samples, {} underruns",
            stats.samples, stats.underruns
        );
        match failure {
            Some(e) => Err(Error::Io(e)),
            None => Ok(stats),
        }
    }

    /// Move to the first whole sector and fill both buffers.
    fn prime<F>(&mut self, file: &mut F) -> Result<u32, F::Error>
    where
        F: Read + Seek,
    {
        let sector = BLOCK_LEN as u64;
        let position = file.stream_position()?;
        let skip = (sector - position % sector) % sector;
        if skip != 0 {
            debug!("Skipping {} bytes to sector boundary", skip);
            file.seek(SeekFrom::Current(skip as i64))?;
        }
        self.stream.prime(|buffer| read_full(file, buffer))
    }

    fn set_state(&mut self, state: PlayerState) {
        debug!("Player {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

/// Read until `buffer` is full or the file ends.
///
/// Returns the number of bytes read, which is only short of the buffer
/// length at the end of the file.
pub(crate) fn read_full<F>(file: &mut F, buffer: &mut [u8]) -> Result<usize, F::Error>
where
    F: Read + ?Sized,
{
    let mut total = 0;
    while total < buffer.len() {
        match file.read(&mut buffer[total..])? {
            0 => break,
            count => total += count,
        }
    }
    Ok(total)
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
