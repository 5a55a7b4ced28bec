//! Programmable interval timer and CMOS real-time clock.

use crate::config::PIT_RELOAD;
use spin::Mutex;
use x86_64::instructions::port::Port;

const PIT_COMMAND: u16 = 0x43;
const PIT_CHANNEL0: u16 = 0x40;

/// Channel 0, low byte then high byte, square wave.
const PIT_SQUARE_WAVE: u8 = 0x36;

const CMOS_INDEX: u16 = 0x70;
const CMOS_DATA: u16 = 0x71;

/// Keeps NMIs off while a CMOS register is selected.
const NMI_DISABLE: u8 = 0x80;

const RTC_REGISTER_A: u8 = 0x0A;
const RTC_REGISTER_B: u8 = 0x0B;
const RTC_REGISTER_C: u8 = 0x0C;

/// Register B: periodic interrupt enable.
const RTC_PERIODIC: u8 = 0x40;

struct Cmos {
    index: Port<u8>,
    data: Port<u8>,
}

impl Cmos {
    const fn new() -> Self {
        Cmos {
            index: Port::new(CMOS_INDEX),
            data: Port::new(CMOS_DATA),
        }
    }

    fn read(&mut self, register: u8) -> u8 {
        // SAFETY: index/data is the documented CMOS access sequence.
        unsafe {
            self.index.write(NMI_DISABLE | register);
            self.data.read()
        }
    }

    fn write(&mut self, register: u8, value: u8) {
        // SAFETY: as in `read`.
        unsafe {
            self.index.write(NMI_DISABLE | register);
            self.data.write(value);
        }
    }
}

static CMOS: Mutex<Cmos> = Mutex::new(Cmos::new());

/// Starts the PIT at about 100 Hz.
pub fn init_pit() {
    let mut command = Port::<u8>::new(PIT_COMMAND);
    let mut channel = Port::<u8>::new(PIT_CHANNEL0);
    let [low, high] = PIT_RELOAD.to_le_bytes();
    // SAFETY: programming channel 0 only affects IRQ 0.
    unsafe {
        command.write(PIT_SQUARE_WAVE);
        channel.write(low);
        channel.write(high);
    }
}

/// Turns on the RTC periodic interrupt.
pub fn enable_rtc() {
    let mut cmos = CMOS.lock();
    let b = cmos.read(RTC_REGISTER_B);
    cmos.write(RTC_REGISTER_B, b | RTC_PERIODIC);
}

/// Sets the periodic rate divider.
pub fn set_rtc_rate(rate: u8) {
    let mut cmos = CMOS.lock();
    let a = cmos.read(RTC_REGISTER_A);
    cmos.write(RTC_REGISTER_A, (a & 0xF0) | (rate & 0x0F));
}

/// Re-arms the RTC; it raises no further interrupt until register C is read.
pub fn acknowledge_rtc() {
    CMOS.lock().read(RTC_REGISTER_C);
}
