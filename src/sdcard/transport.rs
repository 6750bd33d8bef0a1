//! The byte-wide serial transport between the MCU and the card.
//!
//! The protocol engine only ever needs to swap one byte at a time and to
//! drive chip-select itself, so the transport is a small trait rather than an
//! [`embedded_hal::spi::SpiDevice`] (which owns chip-select and can't clock
//! bytes with it deasserted).

use embedded_hal::{digital::OutputPin, spi::SpiBus};

use crate::warn;

/// Trait for the serial bus a card is attached to.
///
/// None of these calls fail. A transport which hits a bus fault should log it
/// and carry on; a dead bus reads as an idle line (`0xFF`), which the layers
/// above treat as a card that isn't answering.
pub trait SdTransport {
    /// Configure the bus as master, at the slow initialisation clock, with
    /// chip-select released.
    fn init(&mut self);

    /// Switch to the fast data-transfer clock.
    fn set_fast_mode(&mut self);

    /// Clock one byte out and return the byte clocked in.
    fn exchange(&mut self, out: u8) -> u8;

    /// Assert chip-select.
    fn select(&mut self);

    /// Release chip-select, then clock one dummy byte so the card lets go of
    /// the data line.
    fn deselect(&mut self);

    /// Is chip-select currently asserted?
    fn is_selected(&self) -> bool;

    /// Receive a byte by clocking out `0xFF`.
    #[inline]
    fn receive(&mut self) -> u8 {
        self.exchange(0xFF)
    }

    /// Send a byte and ignore what comes back.
    #[inline]
    fn send(&mut self, out: u8) {
        let _ = self.exchange(out);
    }
}

/// The two clock rates the transport runs at.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusSpeed {
    /// At most 400 kHz, for card identification.
    Slow,
    /// As fast as the card and board allow, for data transfer.
    Fast,
}

/// Something which can re-clock an SPI bus.
///
/// `embedded-hal` has no way to change a bus clock, so the board support code
/// provides one. Any `FnMut(&mut BUS, BusSpeed)` closure will do.
pub trait BusClock<BUS> {
    /// Set the bus to the given speed.
    fn set_speed(&mut self, bus: &mut BUS, speed: BusSpeed);
}

impl<BUS, F> BusClock<BUS> for F
where
    F: FnMut(&mut BUS, BusSpeed),
{
    fn set_speed(&mut self, bus: &mut BUS, speed: BusSpeed) {
        self(bus, speed)
    }
}

/// A [`BusClock`] for buses which can't be re-clocked. Everything runs at the
/// slow rate.
#[derive(Debug, Default, Copy, Clone)]
pub struct FixedClock;

impl<BUS> BusClock<BUS> for FixedClock {
    fn set_speed(&mut self, _bus: &mut BUS, _speed: BusSpeed) {}
}

/// A transport which owns an SPI bus and the card's chip-select pin.
pub struct SpiTransport<BUS, CS, CLK = FixedClock> {
    bus: BUS,
    cs: CS,
    clock: CLK,
    selected: bool,
}

impl<BUS, CS> SpiTransport<BUS, CS, FixedClock>
where
    BUS: SpiBus,
    CS: OutputPin,
{
    /// Create a new `SpiTransport` on a bus that stays at one clock rate.
    pub fn new(bus: BUS, cs: CS) -> Self {
        Self::new_with_clock(bus, cs, FixedClock)
    }
}

impl<BUS, CS, CLK> SpiTransport<BUS, CS, CLK>
where
    BUS: SpiBus,
    CS: OutputPin,
    CLK: BusClock<BUS>,
{
    /// Create a new `SpiTransport`, using `clock` to switch bus speeds.
    pub fn new_with_clock(bus: BUS, cs: CS, clock: CLK) -> Self {
        SpiTransport {
            bus,
            cs,
            clock,
            selected: false,
        }
    }

    /// Get a temporary borrow on the underlying SPI bus.
    pub fn bus<T, F>(&mut self, func: F) -> T
    where
        F: FnOnce(&mut BUS) -> T,
    {
        func(&mut self.bus)
    }

    /// Give back the bus, the chip-select pin and the clock.
    pub fn free(self) -> (BUS, CS, CLK) {
        (self.bus, self.cs, self.clock)
    }
}

impl<BUS, CS, CLK> SdTransport for SpiTransport<BUS, CS, CLK>
where
    BUS: SpiBus,
    CS: OutputPin,
    CLK: BusClock<BUS>,
{
    fn init(&mut self) {
        flush(&mut self.bus);
        set_cs(&mut self.cs, true);
        self.selected = false;
        self.clock.set_speed(&mut self.bus, BusSpeed::Slow);
    }

    fn set_fast_mode(&mut self) {
        flush(&mut self.bus);
        self.clock.set_speed(&mut self.bus, BusSpeed::Fast);
    }

    fn exchange(&mut self, out: u8) -> u8 {
        bus_exchange(&mut self.bus, out)
    }

    fn select(&mut self) {
        flush(&mut self.bus);
        set_cs(&mut self.cs, false);
        self.selected = true;
    }

    fn deselect(&mut self) {
        flush(&mut self.bus);
        set_cs(&mut self.cs, true);
        self.selected = false;
        bus_exchange(&mut self.bus, 0xFF);
    }

    fn is_selected(&self) -> bool {
        self.selected
    }
}

#[cfg(feature = "embassy-sync-06")]
mod embassy_sync_06 {
    use core::cell::RefCell;

    use ::embassy_sync_06::blocking_mutex;

    use super::*;

    /// A transport on an SPI bus shared with other devices, through an
    /// `embassy-sync` blocking mutex.
    ///
    /// The bus is only locked for the duration of each call, so another
    /// device may use it between two bytes. Other devices must keep their
    /// own chip-selects released while the card is selected.
    ///
    /// See [`blocking_mutex::Mutex`] for more details.
    pub struct SharedSpiTransport<'a, BUS, CS, M, CLK = FixedClock> {
        bus: &'a blocking_mutex::Mutex<M, RefCell<BUS>>,
        cs: CS,
        clock: CLK,
        selected: bool,
    }

    impl<'a, BUS, CS, M> SharedSpiTransport<'a, BUS, CS, M, FixedClock> {
        /// Create a new `SharedSpiTransport`.
        pub fn new(bus: &'a blocking_mutex::Mutex<M, RefCell<BUS>>, cs: CS) -> Self {
            Self::new_with_clock(bus, cs, FixedClock)
        }
    }

    impl<'a, BUS, CS, M, CLK> SharedSpiTransport<'a, BUS, CS, M, CLK> {
        /// Create a new `SharedSpiTransport`, using `clock` to switch bus
        /// speeds.
        pub fn new_with_clock(
            bus: &'a blocking_mutex::Mutex<M, RefCell<BUS>>,
            cs: CS,
            clock: CLK,
        ) -> Self {
            Self {
                bus,
                cs,
                clock,
                selected: false,
            }
        }
    }

    impl<BUS, CS, M, CLK> SdTransport for SharedSpiTransport<'_, BUS, CS, M, CLK>
    where
        BUS: SpiBus,
        CS: OutputPin,
        M: blocking_mutex::raw::RawMutex,
        CLK: BusClock<BUS>,
    {
        fn init(&mut self) {
            set_cs(&mut self.cs, true);
            self.selected = false;
            let clock = &mut self.clock;
            self.bus.lock(|bus| {
                let mut bus = bus.borrow_mut();
                flush(&mut *bus);
                clock.set_speed(&mut *bus, BusSpeed::Slow);
            })
        }

        fn set_fast_mode(&mut self) {
            let clock = &mut self.clock;
            self.bus.lock(|bus| {
                let mut bus = bus.borrow_mut();
                flush(&mut *bus);
                clock.set_speed(&mut *bus, BusSpeed::Fast);
            })
        }

        fn exchange(&mut self, out: u8) -> u8 {
            self.bus.lock(|bus| {
                let mut bus = bus.borrow_mut();
                let value = bus_exchange(&mut *bus, out);
                flush(&mut *bus);
                value
            })
        }

        fn select(&mut self) {
            set_cs(&mut self.cs, false);
            self.selected = true;
        }

        fn deselect(&mut self) {
            set_cs(&mut self.cs, true);
            self.selected = false;
            self.exchange(0xFF);
        }

        fn is_selected(&self) -> bool {
            self.selected
        }
    }
}

#[cfg(feature = "embassy-sync-06")]
pub use embassy_sync_06::*;

/// Swap one byte on the bus. A failed transfer reads as an idle line.
fn bus_exchange<BUS>(bus: &mut BUS, out: u8) -> u8
where
    BUS: SpiBus,
{
    let mut buf = [out];
    match bus.transfer_in_place(&mut buf) {
        Ok(()) => buf[0],
        Err(_e) => {
            warn!("SPI transfer failed");
            0xFF
        }
    }
}

/// Wait for the bus to finish, so chip-select changes land between bytes.
fn flush<BUS>(bus: &mut BUS)
where
    BUS: SpiBus,
{
    if bus.flush().is_err() {
        warn!("SPI flush failed");
    }
}

fn set_cs<CS>(cs: &mut CS, high: bool)
where
    CS: OutputPin,
{
    let result = if high { cs.set_high() } else { cs.set_low() };
    if result.is_err() {
        warn!("Failed to drive chip-select");
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
