//! PL011 UART console and `log` backend.
use core::fmt::{self, Write};

use arm_pl011::Pl011Uart;
use kspin::SpinNoIrq;
use log::{LevelFilter, Log, Metadata, Record};

use crate::sdhost::PERIPHERAL_BASE_PI2;

const UART_BASE: usize = PERIPHERAL_BASE_PI2 + 0x20_1000;

static UART: SpinNoIrq<Pl011Uart> =
    SpinNoIrq::new(Pl011Uart::new(UART_BASE as *mut u8));

/// Writes a byte to the console.
pub fn putchar(c: u8) {
    let mut uart = UART.lock();
    match c {
        b'\n' => {
            uart.putchar(b'\r');
            uart.putchar(b'\n');
        }
        c => uart.putchar(c),
    }
}

/// Write a slice of bytes to the console.
pub fn write_bytes(bytes: &[u8]) {
    for c in bytes {
        putchar(*c);
    }
}

/// Initialize the UART
pub fn init_early() {
    UART.lock().init();
}

struct Console;

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_bytes(s.as_bytes());
        Ok(())
    }
}

struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = writeln!(
            Console,
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Bring up the UART and route `log` output to it.
pub fn init_logger(level: LevelFilter) {
    init_early();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
