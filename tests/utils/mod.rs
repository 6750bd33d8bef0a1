//! Useful library code for tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use embedded_wavplay::{
    AcquireOpts, PwmOutput, SampleStream, SampleTimer, SdCard, SdTransport, BLOCK_LEN,
};

/// Turn on `log` output, at whatever level `RUST_LOG` asks for.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ****************************************************************************
//
// A simulated card
//
// ****************************************************************************

/// What sort of card to pretend to be.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Profile {
    /// Rejects CMD8, accepts ACMD41
    SdV1,
    /// Accepts CMD8; the OCR says whether it is high capacity
    SdV2 { high_capacity: bool },
    /// Rejects CMD8 and CMD55, accepts CMD1
    Mmc,
    /// Never drives the data line
    Dead,
    /// Accepts CMD8 but echoes the wrong check pattern
    BadEcho,
}

/// Ways an identified card can misbehave during block I/O.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Answer CMD17 and CMD24 with an address error
    RejectAddress,
    /// Accept CMD17 but never send a data token
    NoToken,
    /// Send an error token where the data token should be
    ErrorToken,
    /// Answer a written block with a CRC error
    RejectData,
    /// Accept a written block, then stay busy
    StuckBusy,
}

#[derive(Debug)]
enum Phase {
    /// Collecting command frames
    Command,
    /// CMD24 accepted, waiting for the start token
    WriteToken { block: u32 },
    /// Collecting a block, plus its CRC
    WriteData { block: u32, data: Vec<u8> },
}

/// A card on the end of an SPI bus, answering in SPI mode.
///
/// Responses are queued as each command frame completes and clocked out by
/// later exchanges, one byte each, with one idle byte before every R1.
/// Releasing chip-select throws away anything not yet clocked out.
pub struct SimCard {
    profile: Profile,
    /// How many times ACMD41/CMD1 answer "idle" before "ready"
    busy_polls: u32,
    polls_left: u32,
    idle: bool,
    ready: bool,
    app_cmd: bool,
    selected: bool,
    frame: Vec<u8>,
    outgoing: VecDeque<u8>,
    phase: Phase,
    blocks: HashMap<u32, Vec<u8>>,
    /// Misbehaviour to inject into block reads and writes
    pub fault: Option<Fault>,
    /// Every complete command frame, as (index, argument)
    pub commands: Vec<(u8, u32)>,
    /// How many times the bus was set up
    pub inits: usize,
    /// Is the bus at the fast clock rate?
    pub fast: bool,
    /// How many bytes have crossed the bus
    pub exchanges: usize,
}

impl SimCard {
    pub fn new(profile: Profile) -> SimCard {
        SimCard {
            profile,
            busy_polls: 3,
            polls_left: 3,
            idle: false,
            ready: false,
            app_cmd: false,
            selected: false,
            frame: Vec::new(),
            outgoing: VecDeque::new(),
            phase: Phase::Command,
            blocks: HashMap::new(),
            fault: None,
            commands: Vec::new(),
            inits: 0,
            fast: false,
            exchanges: 0,
        }
    }

    /// Does this card take block numbers as addresses?
    fn high_capacity(&self) -> bool {
        matches!(
            self.profile,
            Profile::SdV2 {
                high_capacity: true
            }
        )
    }

    /// Store `data` starting at the first byte of `block`.
    pub fn load(&mut self, block: u32, data: &[u8]) {
        for (i, chunk) in data.chunks(BLOCK_LEN).enumerate() {
            let mut contents = vec![0u8; BLOCK_LEN];
            contents[..chunk.len()].copy_from_slice(chunk);
            self.blocks.insert(block + i as u32, contents);
        }
    }

    /// The contents of a block. Blocks never written are zero.
    pub fn block(&self, block: u32) -> Vec<u8> {
        self.blocks
            .get(&block)
            .cloned()
            .unwrap_or_else(|| vec![0u8; BLOCK_LEN])
    }

    /// The indices of the commands received, in order.
    pub fn command_indices(&self) -> Vec<u8> {
        self.commands.iter().map(|(idx, _)| *idx).collect()
    }

    fn block_for(&self, address: u32) -> u32 {
        if self.high_capacity() {
            address
        } else {
            assert_eq!(address % 512, 0, "unaligned byte address {address:#x}");
            address / 512
        }
    }

    fn r1(&mut self, r1: u8) {
        self.outgoing.push_back(0xFF);
        self.outgoing.push_back(r1);
    }

    fn idle_or_ready(&self) -> u8 {
        if self.ready {
            0x00
        } else {
            0x01
        }
    }

    fn poll_init(&mut self) -> u8 {
        if self.polls_left == 0 {
            self.ready = true;
        } else {
            self.polls_left -= 1;
        }
        self.idle_or_ready()
    }

    fn handle_command(&mut self) {
        let index = self.frame[0] & 0x3F;
        let arg = u32::from_be_bytes([self.frame[1], self.frame[2], self.frame[3], self.frame[4]]);
        let crc = self.frame[5];
        self.frame.clear();
        self.commands.push((index, arg));
        let app_cmd = std::mem::take(&mut self.app_cmd);

        if index == 0 {
            assert_eq!(crc, 0x95, "CMD0 needs a valid CRC");
            self.idle = true;
            self.ready = false;
            self.polls_left = self.busy_polls;
            self.r1(0x01);
            return;
        }
        if !self.idle {
            // Not in SPI mode, so ignore everything
            return;
        }
        match (index, app_cmd, self.profile) {
            (8, false, Profile::SdV2 { .. } | Profile::BadEcho) => {
                assert_eq!(crc, 0x87, "CMD8 needs a valid CRC");
                let check = if self.profile == Profile::BadEcho {
                    0x55
                } else {
                    (arg & 0xFF) as u8
                };
                self.r1(0x01);
                self.outgoing.extend([0x00, 0x00, ((arg >> 8) & 0x0F) as u8, check]);
            }
            (55, false, Profile::Mmc) => self.r1(0x05),
            (55, false, _) => {
                self.app_cmd = true;
                let r1 = self.idle_or_ready();
                self.r1(r1);
            }
            (41, true, _) => {
                let r1 = self.poll_init();
                self.r1(r1);
            }
            (1, false, Profile::Mmc) => {
                let r1 = self.poll_init();
                self.r1(r1);
            }
            (58, false, Profile::SdV2 { .. }) => {
                let ocr0 = if self.high_capacity() { 0xC0 } else { 0x80 };
                self.r1(self.idle_or_ready());
                self.outgoing.extend([ocr0, 0xFF, 0x80, 0x00]);
            }
            (16, false, _) if self.ready => {
                assert_eq!(arg, 512);
                self.r1(0x00);
            }
            (17 | 24, false, _) if self.ready && self.fault == Some(Fault::RejectAddress) => {
                self.r1(0x20);
            }
            (17, false, _) if self.ready => {
                let block = self.block_for(arg);
                self.r1(0x00);
                match self.fault {
                    Some(Fault::NoToken) => {}
                    Some(Fault::ErrorToken) => self.outgoing.extend([0xFF, 0x08]),
                    _ => {
                        // Make the host wait a little for the token
                        self.outgoing.extend([0xFF, 0xFF, 0xFE]);
                        let contents = self.block(block);
                        self.outgoing.extend(contents);
                        self.outgoing.extend([0x12, 0x34]);
                    }
                }
            }
            (24, false, _) if self.ready => {
                let block = self.block_for(arg);
                self.r1(0x00);
                self.phase = Phase::WriteToken { block };
            }
            _ => self.r1(0x05),
        }
    }

    fn accept(&mut self, byte: u8) {
        match &mut self.phase {
            Phase::Command => {
                if self.frame.is_empty() && (byte & 0xC0) != 0x40 {
                    return;
                }
                self.frame.push(byte);
                if self.frame.len() == 6 {
                    self.handle_command();
                }
            }
            Phase::WriteToken { block } => {
                if byte == 0xFE {
                    let block = *block;
                    self.phase = Phase::WriteData {
                        block,
                        data: Vec::new(),
                    };
                }
            }
            Phase::WriteData { block, data } => {
                data.push(byte);
                if data.len() == BLOCK_LEN + 2 {
                    let block = *block;
                    let mut data = std::mem::take(data);
                    data.truncate(BLOCK_LEN);
                    self.phase = Phase::Command;
                    match self.fault {
                        Some(Fault::RejectData) => self.outgoing.push_back(0xEB),
                        Some(Fault::StuckBusy) => {
                            self.blocks.insert(block, data);
                            self.outgoing.push_back(0xE5);
                            self.outgoing.extend([0x00; 64]);
                        }
                        _ => {
                            self.blocks.insert(block, data);
                            // Accepted, then busy for a while
                            self.outgoing.extend([0xE5, 0x00, 0x00, 0x00]);
                        }
                    }
                }
            }
        }
    }
}

impl SdTransport for SimCard {
    fn init(&mut self) {
        self.inits += 1;
        self.fast = false;
        self.selected = false;
    }

    fn set_fast_mode(&mut self) {
        self.fast = true;
    }

    fn exchange(&mut self, out: u8) -> u8 {
        self.exchanges += 1;
        if !self.selected || self.profile == Profile::Dead {
            return 0xFF;
        }
        let response = self.outgoing.pop_front().unwrap_or(0xFF);
        self.accept(out);
        response
    }

    fn select(&mut self) {
        self.selected = true;
    }

    fn deselect(&mut self) {
        self.selected = false;
        self.outgoing.clear();
        self.frame.clear();
        self.phase = Phase::Command;
        self.exchange(0xFF);
    }

    fn is_selected(&self) -> bool {
        self.selected
    }
}

/// A delayer which doesn't.
pub struct NoDelay;

impl embedded_hal::delay::DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Options with retry limits small enough that failures are quick.
pub fn quick_opts() -> AcquireOpts {
    let mut opts = AcquireOpts::default();
    opts.idle_retries.retries = 20;
    opts.init_retries.retries = 20;
    opts.read_token_retries.retries = 20;
    opts.write_busy_retries.retries = 20;
    opts
}

/// A card driver talking to a simulated card.
pub fn make_card(profile: Profile) -> SdCard<SimCard, NoDelay> {
    SdCard::new_with_options(SimCard::new(profile), NoDelay, quick_opts())
}

// ****************************************************************************
//
// Simulated playback hardware
//
// ****************************************************************************

/// Everything the PWM output was told to do.
#[derive(Debug, Default)]
pub struct PwmLog {
    pub inits: usize,
    pub running: bool,
    pub duties: Vec<u8>,
}

/// A PWM output that writes to a shared log. Clone it to get a second
/// handle, as the interrupt handler would have.
#[derive(Clone, Default)]
pub struct SimPwm {
    pub log: Rc<RefCell<PwmLog>>,
}

impl PwmOutput for SimPwm {
    fn init(&mut self) {
        self.log.borrow_mut().inits += 1;
    }

    fn start(&mut self) {
        self.log.borrow_mut().running = true;
    }

    fn stop(&mut self) {
        self.log.borrow_mut().running = false;
    }

    fn set_duty(&mut self, duty: u8) {
        self.log.borrow_mut().duties.push(duty);
    }
}

/// The sample-rate interrupt. It only fires while the timer is running.
pub struct SimInterrupt<const N: usize> {
    stream: &'static SampleStream<N>,
    pwm: SimPwm,
    enabled: bool,
    pub ticks: usize,
}

impl<const N: usize> SimInterrupt<N> {
    pub fn new(stream: &'static SampleStream<N>, pwm: SimPwm) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(SimInterrupt {
            stream,
            pwm,
            enabled: false,
            ticks: 0,
        }))
    }

    pub fn fire(&mut self, times: usize) {
        if !self.enabled {
            return;
        }
        for _ in 0..times {
            self.ticks += 1;
            self.stream.on_sample_tick(&mut self.pwm);
        }
    }
}

/// A timer which fires the interrupt once every time the foreground idles.
pub struct SimTimer<const N: usize> {
    pub irq: Rc<RefCell<SimInterrupt<N>>>,
    pub divisor: Option<u32>,
    pub idles: usize,
}

impl<const N: usize> SimTimer<N> {
    pub fn new(irq: Rc<RefCell<SimInterrupt<N>>>) -> Self {
        SimTimer {
            irq,
            divisor: None,
            idles: 0,
        }
    }
}

impl<const N: usize> SampleTimer for SimTimer<N> {
    fn set_divisor(&mut self, divisor: u32) {
        self.divisor = Some(divisor);
    }

    fn start(&mut self) {
        self.irq.borrow_mut().enabled = true;
    }

    fn stop(&mut self) {
        self.irq.borrow_mut().enabled = false;
    }

    fn idle(&mut self) {
        self.idles += 1;
        assert!(self.idles < 1_000_000, "playback never finished");
        self.irq.borrow_mut().fire(1);
    }
}

/// A file in RAM which lets the interrupt fire while it is being read, and
/// hands out at most `chunk` bytes per read.
pub struct SimFile<const N: usize> {
    data: Vec<u8>,
    position: usize,
    pub chunk: usize,
    pub ticks_per_read: usize,
    /// Reads at or beyond this position fail
    pub fail_at: Option<usize>,
    irq: Option<Rc<RefCell<SimInterrupt<N>>>>,
}

impl<const N: usize> SimFile<N> {
    pub fn new(data: Vec<u8>) -> Self {
        SimFile {
            data,
            position: 0,
            chunk: usize::MAX,
            ticks_per_read: 0,
            fail_at: None,
            irq: None,
        }
    }

    pub fn with_interrupt(mut self, irq: Rc<RefCell<SimInterrupt<N>>>, ticks: usize) -> Self {
        self.irq = Some(irq);
        self.ticks_per_read = ticks;
        self
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl<const N: usize> embedded_io::ErrorType for SimFile<N> {
    type Error = embedded_io::ErrorKind;
}

impl<const N: usize> embedded_io::Read for SimFile<N> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if let Some(irq) = &self.irq {
            irq.borrow_mut().fire(self.ticks_per_read);
        }
        if self.fail_at.is_some_and(|at| self.position >= at) {
            return Err(embedded_io::ErrorKind::Other);
        }
        let left = &self.data[self.position..];
        let count = buf.len().min(left.len()).min(self.chunk);
        buf[..count].copy_from_slice(&left[..count]);
        self.position += count;
        Ok(count)
    }
}

impl<const N: usize> embedded_io::Seek for SimFile<N> {
    fn seek(&mut self, pos: embedded_io::SeekFrom) -> Result<u64, Self::Error> {
        let target = match pos {
            embedded_io::SeekFrom::Start(offset) => offset as i64,
            embedded_io::SeekFrom::End(offset) => self.data.len() as i64 + offset,
            embedded_io::SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(embedded_io::ErrorKind::InvalidInput);
        }
        self.position = (target as usize).min(self.data.len());
        Ok(self.position as u64)
    }
}

// ****************************************************************************
//
// WAV files
//
// ****************************************************************************

/// A canonical 44 byte header for 8-bit mono PCM.
pub fn wav_header(rate: u32, data_len: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(36 + data_len).to_le_bytes());
    header.extend_from_slice(b"WAVEfmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&rate.to_le_bytes());
    header.extend_from_slice(&rate.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&8u16.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_len.to_le_bytes());
    header
}

/// A whole WAV file: the header, padding to the first sector boundary, then
/// `audio`.
///
/// Playback starts at the first whole sector after the header, so only
/// `audio` is ever heard.
pub fn wav_file(rate: u32, audio: &[u8]) -> Vec<u8> {
    let mut file = wav_header(rate, (BLOCK_LEN - 44 + audio.len()) as u32);
    file.resize(BLOCK_LEN, 0x80);
    file.extend_from_slice(audio);
    file
}

/// Some audio which doesn't repeat within a buffer.
pub fn ramp(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
