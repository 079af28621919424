// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Console output and the `log` facade sink.
//!
//! The log sink is an ordinary VFS file.  At boot it is the first
//! serial port; anything that speaks the file protocol would do.

use crate::result::Result;
use crate::vfs::File;
use core::fmt;
use spin::Mutex;

static CONSOLE: Mutex<Option<File>> = Mutex::new(None);

struct KernelLog;

static LOGGER: KernelLog = KernelLog;

/// Attaches `console` as the kernel console and routes the `log`
/// macros to it.  Called once during boot, as soon as a character
/// device is usable.
pub fn init(console: File) -> Result<()> {
    *CONSOLE.lock() = Some(console);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Info);
    Ok(())
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    if let Some(cons) = CONSOLE.lock().as_mut() {
        let _ = cons.write_fmt(args);
    }
}

impl log::Log for KernelLog {
    fn enabled(&self, _metadata: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        _print(format_args!(
            "{:>5} {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

/// A simple println!().
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[macro_export]
macro_rules! print {
    ($($args:tt)*) => ({
        $crate::logger::_print(format_args!($($args)*));
    })
}

/// Logs the outcome of a fallible step: the message at info level on
/// success, the message plus the error at warn level on failure.
macro_rules! log_result {
    ($res:expr, $($arg:tt)*) => {
        match &$res {
            Ok(_) => ::log::info!($($arg)*),
            Err(e) => ::log::warn!("{} failed: {:?}", format_args!($($arg)*), e),
        }
    };
}

pub(crate) use log_result;

#[cfg(test)]
mod tests {
    use crate::dev::{DevNum, MAJ_SERIAL};
    use crate::fakes;
    use crate::vfs;

    #[test]
    fn console_print_and_log() {
        let _g = fakes::lock();
        crate::serial::init().unwrap();
        let cons = vfs::open_dev(DevNum::new(MAJ_SERIAL, 2)).unwrap();
        super::init(cons).unwrap();

        fakes::take_tx(2);
        crate::println!("boot {}", 42);
        let out = fakes::take_tx(2);
        assert_eq!(out, b"boot 42\n");

        log::info!(target: "selftest", "logger attached");
        let out = fakes::take_tx(2);
        let text = core::str::from_utf8(&out).unwrap();
        assert!(text.contains("INFO"));
        assert!(text.contains("selftest"));
        assert!(text.contains("logger attached"));
    }
}
