//! The ping-pong buffer shared between the foreground and the sample-rate
//! interrupt.
//!
//! The foreground owns the contents of the buffer the interrupt is *not*
//! reading. The interrupt owns which buffer is active, the read cursor and
//! the count of samples left. All of that bookkeeping is only touched inside
//! a critical section, so the interrupt never sees it half-updated.
//!
//! The interrupt reads its sample and writes the duty register inside one
//! critical section. The buffer contents are written outside any critical
//! section, so a card read doesn't hold off the interrupt. That is sound
//! because:
//!
//! * the interrupt only reads the active buffer, and never past the samples
//!   the foreground has committed;
//! * the interrupt only changes which buffer is active when the other one has
//!   been refilled (`swap_pending` is clear), and the foreground only writes
//!   to the inactive buffer while `swap_pending` is set.

use core::cell::{Cell, UnsafeCell};

use critical_section::{CriticalSection, Mutex};

use super::PwmOutput;

/// Bookkeeping shared with the interrupt.
#[derive(Debug, Copy, Clone)]
struct Control {
    /// Index of the buffer the interrupt is reading
    active: u8,
    /// Next byte to emit from the active buffer
    cursor: usize,
    /// Samples committed but not yet emitted
    remaining: u32,
    /// The interrupt moved on and the inactive buffer needs refilling
    swap_pending: bool,
    /// The foreground won't commit any more samples
    end_of_stream: bool,
    /// Samples emitted since the stream was primed
    emitted: u32,
    /// Ticks which found nothing to play before the end of the stream
    underruns: u32,
}

impl Control {
    const fn new() -> Control {
        Control {
            active: 0,
            cursor: 0,
            remaining: 0,
            swap_pending: true,
            end_of_stream: true,
            emitted: 0,
            underruns: 0,
        }
    }
}

/// A double buffer of 8-bit samples, with `N` bytes in each half.
///
/// Put one of these in a `static` so the sample-rate interrupt can reach it.
pub struct SampleStream<const N: usize = 128> {
    buffers: [UnsafeCell<[u8; N]>; 2],
    control: Mutex<Cell<Control>>,
}

// SAFETY: The buffers are only accessed according to the rules in the module
// documentation, and everything else is behind a critical section.
unsafe impl<const N: usize> Sync for SampleStream<N> {}

impl<const N: usize> SampleStream<N> {
    /// The size of each half of the buffer.
    pub const BUFFER_LEN: usize = N;

    /// Create a new, empty, stream.
    pub const fn new() -> SampleStream<N> {
        SampleStream {
            buffers: [UnsafeCell::new([0; N]), UnsafeCell::new([0; N])],
            control: Mutex::new(Cell::new(Control::new())),
        }
    }

    /// Take the next sample, if there is one ready.
    ///
    /// Call this from the sample-rate interrupt. It runs in a critical
    /// section and does a bounded amount of work.
    pub fn next_sample(&self) -> Option<u8> {
        critical_section::with(|cs| self.take_sample(cs))
    }

    /// Take the next sample and write it to the PWM duty register.
    ///
    /// The duty register is written in the same critical section that
    /// advances the cursor. The output is left alone if there is nothing to
    /// play.
    pub fn on_sample_tick<PWM>(&self, pwm: &mut PWM)
    where
        PWM: PwmOutput,
    {
        critical_section::with(|cs| {
            if let Some(sample) = self.take_sample(cs) {
                pwm.set_duty(sample);
            }
        })
    }

    fn take_sample(&self, cs: CriticalSection<'_>) -> Option<u8> {
        let cell = self.control.borrow(cs);
        let mut ctl = cell.get();
        if ctl.remaining == 0 {
            if !ctl.end_of_stream {
                ctl.underruns += 1;
                cell.set(ctl);
            }
            return None;
        }
        if ctl.cursor == N {
            if ctl.swap_pending {
                // The other half is still being filled.
                ctl.underruns += 1;
                cell.set(ctl);
                return None;
            }
            ctl.swap_pending = true;
            ctl.cursor = 0;
            ctl.active ^= 1;
        }
        // SAFETY: The foreground doesn't write to the active buffer.
        let buffer = unsafe { &*self.buffers[usize::from(ctl.active)].get() };
        let sample = buffer[ctl.cursor];
        ctl.cursor += 1;
        ctl.remaining -= 1;
        ctl.emitted += 1;
        cell.set(ctl);
        Some(sample)
    }

    /// How many committed samples haven't been played yet.
    pub fn remaining(&self) -> u32 {
        self.with_control(|ctl| ctl.remaining)
    }

    /// Does the inactive buffer need refilling?
    pub fn swap_pending(&self) -> bool {
        self.with_control(|ctl| ctl.swap_pending)
    }

    /// How many samples have been played since the stream was primed.
    pub fn emitted(&self) -> u32 {
        self.with_control(|ctl| ctl.emitted)
    }

    /// How many sample periods went by with nothing to play, since the
    /// stream was primed.
    pub fn underruns(&self) -> u32 {
        self.with_control(|ctl| ctl.underruns)
    }

    /// Reset the stream and fill both buffers.
    ///
    /// `fill` is called once per buffer and returns how many bytes it
    /// wrote. A short first fill is the end of the stream, so the second
    /// buffer is left empty. Returns the total number of bytes committed.
    pub(crate) fn prime<E, F>(&self, mut fill: F) -> Result<u32, E>
    where
        F: FnMut(&mut [u8]) -> Result<usize, E>,
    {
        critical_section::with(|cs| {
            let mut ctl = Control::new();
            ctl.end_of_stream = false;
            self.control.borrow(cs).set(ctl);
        });
        // SAFETY: Nothing is committed, so the interrupt reads neither buffer.
        let first = fill(unsafe { &mut *self.buffers[0].get() })?;
        if first < N {
            self.commit(first, true);
            return Ok(self.with_control(|ctl| ctl.remaining));
        }
        self.commit(first, false);
        // SAFETY: `swap_pending` is still set, so the interrupt stays on
        // buffer 0.
        let second = fill(unsafe { &mut *self.buffers[1].get() })?;
        self.commit(second, true);
        Ok(self.with_control(|ctl| ctl.remaining))
    }

    /// Refill the inactive buffer, if the interrupt has moved on from it.
    ///
    /// Returns `None` if no refill was needed, otherwise the number of bytes
    /// `fill` wrote. If `fill` fails nothing is committed and the interrupt
    /// will stop at the end of the active buffer.
    pub(crate) fn refill<E, F>(&self, fill: F) -> Result<Option<usize>, E>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, E>,
    {
        let inactive = critical_section::with(|cs| {
            let ctl = self.control.borrow(cs).get();
            ctl.swap_pending.then_some(usize::from(ctl.active ^ 1))
        });
        let Some(inactive) = inactive else {
            return Ok(None);
        };
        // SAFETY: `swap_pending` is set, so the interrupt stays on the other
        // buffer until we commit.
        let count = fill(unsafe { &mut *self.buffers[inactive].get() })?;
        self.commit(count, true);
        Ok(Some(count))
    }

    /// Tell the interrupt no more samples are coming.
    pub(crate) fn finish(&self) {
        critical_section::with(|cs| {
            let cell = self.control.borrow(cs);
            let mut ctl = cell.get();
            ctl.end_of_stream = true;
            cell.set(ctl);
        });
    }

    /// Hand `count` freshly written samples over to the interrupt.
    fn commit(&self, count: usize, buffer_ready: bool) {
        let count = count.min(N) as u32;
        critical_section::with(|cs| {
            let cell = self.control.borrow(cs);
            let mut ctl = cell.get();
            ctl.remaining += count;
            if buffer_ready {
                ctl.swap_pending = false;
            }
            cell.set(ctl);
        });
    }

    fn with_control<T, F>(&self, func: F) -> T
    where
        F: FnOnce(&Control) -> T,
    {
        critical_section::with(|cs| func(&self.control.borrow(cs).get()))
    }
}

impl<const N: usize> Default for SampleStream<N> {
    fn default() -> Self {
        Self::new()
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
