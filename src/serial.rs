// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Polled driver for the PC NS16550-compatible serial UARTs.
//!
//! Two units, addressed by minor number 1 and 2.  Reads are
//! non-blocking: when the line status register shows no byte ready
//! and nothing has been accumulated yet, the caller gets
//! [`Error::TryAgain`].  Writes busy-wait on transmit-holding-empty
//! before each byte.

use crate::cpu;
use crate::dev;
use crate::result::{Error, Result};
use crate::vfs::{File, FileOps, Ioctl};
use bitflags::bitflags;
use spin::Mutex;

const PORTS: [u16; 2] = [0x3f8, 0x2f8];

/* I/O port offsets for the UART registers. */
const POFF_DATA: u16 = 0;
const POFF_MODEMCTL: u16 = 4;
const POFF_LINESTAT: u16 = 5;

bitflags! {
    /// Per-unit line translation flags, set via ioctl.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct SerialFlags: u32 {
        /// Input: translate incoming `\r` to `\n`.
        const ICRNL = 1 << 0;
        /// Output: translate outgoing `\n` to `\r\n`.
        const OCRNL = 1 << 1;
    }
}

bitflags! {
    /// Line status register.
    #[derive(Clone, Copy)]
    struct LineStatus: u8 {
        const DATA_READY = 1 << 0;
        const OVERRUN_ERR = 1 << 1;
        const PARITY_ERR = 1 << 2;
        const FRAMING_ERR = 1 << 3;
        const BREAK_INTR = 1 << 4;
        const THR_EMPTY = 1 << 5;
        const XMTR_EMPTY = 1 << 6;
    }
}

bitflags! {
    /// Modem control register.
    #[derive(Clone, Copy)]
    struct ModemCtl: u8 {
        const DTR = 1 << 0;
        const RTS = 1 << 1;
        const OUT1 = 1 << 2;
        const OUT2 = 1 << 3;
        const LOOPBACK = 1 << 4;
    }
}

struct Serial {
    port: u16,
    flags: SerialFlags,
    inited: bool,
}

static SERIALS: Mutex<[Serial; 2]> = Mutex::new([
    Serial { port: 0x3f8, flags: SerialFlags::empty(), inited: false },
    Serial { port: 0x2f8, flags: SerialFlags::empty(), inited: false },
]);

fn unit_index(minor: u8) -> Result<usize> {
    if minor == 0 || minor as usize > PORTS.len() {
        return Err(Error::NoDev);
    }
    Ok(minor as usize - 1)
}

fn minor_of(f: &File) -> Result<u8> {
    Ok(f.stat.rdev.ok_or(Error::NoDev)?.minor())
}

fn linestat(s: &Serial) -> LineStatus {
    let bits = unsafe { cpu::inb(s.port + POFF_LINESTAT) };
    LineStatus::from_bits_truncate(bits)
}

/// Wire the unit into loopback, bounce a sentinel byte through it,
/// and compare.  A mismatch means broken or absent hardware.
fn selftest(port: u16) -> Result<()> {
    const SENTINEL: u8 = 0x0a;
    unsafe {
        let probe = ModemCtl::RTS | ModemCtl::LOOPBACK;
        cpu::outb(port + POFF_MODEMCTL, probe.bits());
        cpu::outb(port + POFF_DATA, SENTINEL);
        if cpu::inb(port + POFF_DATA) != SENTINEL {
            return Err(Error::Io);
        }
        let normal =
            ModemCtl::DTR | ModemCtl::RTS | ModemCtl::OUT1 | ModemCtl::OUT2;
        cpu::outb(port + POFF_MODEMCTL, normal.bits());
    }
    Ok(())
}

fn readch(s: &Serial) -> Result<u8> {
    if !linestat(s).contains(LineStatus::DATA_READY) {
        return Err(Error::TryAgain);
    }
    Ok(unsafe { cpu::inb(s.port + POFF_DATA) })
}

fn writech(s: &Serial, ch: u8) {
    while !linestat(s).contains(LineStatus::THR_EMPTY) {
        core::hint::spin_loop();
    }
    unsafe {
        cpu::outb(s.port + POFF_DATA, ch);
    }
}

fn ifilter(s: &Serial, ch: u8) -> u8 {
    if s.flags.contains(SerialFlags::ICRNL) && ch == b'\r' { b'\n' } else { ch }
}

struct SerialOps;

static SERIAL_OPS: SerialOps = SerialOps;

impl FileOps for SerialOps {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn open_dev(&self, _f: &mut File, minor: u8) -> Result<()> {
        let idx = unit_index(minor)?;
        let mut units = SERIALS.lock();
        let s = &mut units[idx];
        if s.inited {
            return Ok(());
        }
        selftest(s.port)?;
        s.inited = true;
        Ok(())
    }

    fn read(
        &self,
        f: &mut File,
        dst: &mut [u8],
        _pos: &mut i64,
    ) -> Result<usize> {
        let idx = unit_index(minor_of(f)?)?;
        let mut units = SERIALS.lock();
        let s = &mut units[idx];
        let mut n = 0;
        while n < dst.len() {
            match readch(s) {
                Ok(ch) => {
                    dst[n] = ifilter(s, ch);
                    n += 1;
                }
                // Out of data for now; report what we have, if
                // anything.
                Err(Error::TryAgain) if n > 0 => return Ok(n),
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }

    fn write(
        &self,
        f: &mut File,
        src: &[u8],
        _pos: &mut i64,
    ) -> Result<usize> {
        let idx = unit_index(minor_of(f)?)?;
        let units = SERIALS.lock();
        let s = &units[idx];
        for &ch in src {
            if s.flags.contains(SerialFlags::OCRNL) && ch == b'\n' {
                writech(s, b'\r');
            }
            writech(s, ch);
        }
        Ok(src.len())
    }

    fn ioctl(&self, f: &mut File, cmd: Ioctl) -> Result<u32> {
        let idx = unit_index(minor_of(f)?)?;
        let mut units = SERIALS.lock();
        let s = &mut units[idx];
        match cmd {
            Ioctl::GetFlags => Ok(s.flags.bits()),
            Ioctl::SetFlags(bits) => {
                s.flags =
                    SerialFlags::from_bits(bits).ok_or(Error::Invalid)?;
                Ok(0)
            }
        }
    }
}

pub fn init() -> Result<()> {
    dev::chrdev_register(dev::MAJ_SERIAL, &SERIAL_OPS)
}

/// Forgets a unit's initialized state so a test can drive the
/// self-test path again.
#[cfg(test)]
pub(crate) fn reset_unit(minor: u8) {
    let idx = unit_index(minor).unwrap();
    let mut units = SERIALS.lock();
    units[idx].inited = false;
    units[idx].flags = SerialFlags::empty();
}
