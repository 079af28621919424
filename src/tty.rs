// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TTY line discipline.
//!
//! A TTY wraps another character device, its port device, and layers
//! line editing on top of it.  Minor 1 and up wrap the serial unit
//! with the same minor; minor 0 is reserved for a console device.
//!
//! In cooked mode input is collected into a line buffer with editing
//! (backspace, kill-line, `^D`) and handed out one line at a time.
//! In raw mode bytes pass through the buffer unedited.  Echo is
//! optional and can render control bytes in caret notation.

use crate::dev::{self, DevNum};
use crate::logger::log_result;
use crate::result::{Error, Result};
use crate::vfs::{self, File, FileOps, Ioctl};
use bitflags::bitflags;
use spin::Mutex;

/// Input line buffer size.  A cooked-mode line, including its
/// newline, never exceeds this.
pub const IBUFSZ: usize = 256;

const TTY_CT: usize = 3;

pub const CTRL_D: u8 = 0x04;
pub const CTRL_U: u8 = 0x15;
const BS: u8 = 0x08;
const DEL: u8 = 0x7f;

bitflags! {
    /// Line discipline flags, set via ioctl.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct TtyFlags: u32 {
        /// Echo input bytes back to the port.
        const ECHO = 1 << 0;
        /// Echo non-printable bytes in caret or hex notation.
        const ECHOCTL = 1 << 1;
        /// Line-buffered editing mode.
        const COOKED = 1 << 2;
    }
}

struct Tty {
    /// Wrapped port device; `Some` once the TTY is initialized.
    port: Option<File>,
    flags: TtyFlags,
    /// Input has reached the end of a line.
    ibuf_eol: bool,
    /// Input has reached an EOF (`^D` on an empty line).
    ibuf_eof: bool,
    ilen: usize,
    ibuf: [u8; IBUFSZ],
}

impl Tty {
    const fn new() -> Tty {
        Tty {
            port: None,
            flags: TtyFlags::empty(),
            ibuf_eol: false,
            ibuf_eof: false,
            ilen: 0,
            ibuf: [0; IBUFSZ],
        }
    }

    fn cooked(&self) -> bool {
        self.flags.contains(TtyFlags::COOKED)
    }

    fn echoc(&mut self, ch: u8) {
        if !self.flags.contains(TtyFlags::ECHO) {
            return;
        }
        let Some(port) = self.port.as_mut() else {
            return;
        };
        let printable = (0x20..0x7f).contains(&ch);
        if !self.flags.contains(TtyFlags::ECHOCTL)
            || printable
            || matches!(ch, b'\n' | b'\r' | b'\t')
        {
            let _ = port.write(&[ch]);
        } else if ch < 0x20 {
            // Control bytes 0x00..0x1f echo in caret notation: the
            // letter after the caret is the code plus 0x40, so NUL
            // is ^@, SOH is ^A, and so on.
            let _ = port.write(&[b'^', ch + 0x40]);
        } else if ch == DEL {
            // Delete has its own caret spelling.
            let _ = port.write(b"^?");
        } else {
            let _ = crate::fprint!(port, "\\x{:02x}", ch);
        }
    }

    fn echos(&mut self, s: &str) {
        if self.flags.contains(TtyFlags::ECHO) {
            if let Some(port) = self.port.as_mut() {
                let _ = port.write(s.as_bytes());
            }
        }
    }

    fn add_to_inbuf(&mut self, ch: u8) -> Result<()> {
        if self.ilen == IBUFSZ {
            return Err(Error::NoBufs);
        }
        self.ibuf[self.ilen] = ch;
        self.ilen += 1;
        self.echoc(ch);
        Ok(())
    }

    fn backspace(&mut self) {
        if self.ilen == 0 {
            return;
        }
        self.ilen -= 1;
        self.echos("\x08 \x08");
    }

    fn clearline(&mut self) {
        while self.ilen > 0 {
            self.backspace();
        }
    }

    fn on_eof(&mut self) {
        self.ibuf_eol = true;
        if self.ilen == 0 {
            self.ibuf_eof = true;
        }
    }

    /// Folds one byte received from the port into the line buffer,
    /// interpreting special characters in cooked mode.
    fn inchar(&mut self, ch: u8) -> Result<()> {
        if !self.cooked() {
            return self.add_to_inbuf(ch);
        }
        // A finished line must be read out before new input.
        if self.ibuf_eol {
            return Err(Error::NoBufs);
        }
        match ch {
            b'\n' => {
                self.ibuf_eol = true;
                self.add_to_inbuf(ch)
            }
            CTRL_D => {
                self.echos("^D\n");
                self.on_eof();
                Ok(())
            }
            BS | DEL => {
                self.backspace();
                Ok(())
            }
            CTRL_U => {
                self.clearline();
                Ok(())
            }
            _ => self.add_to_inbuf(ch),
        }
    }
}

static TTYS: [Mutex<Tty>; TTY_CT] = [const { Mutex::new(Tty::new()) }; TTY_CT];

fn tty_of(f: &File) -> Result<&'static Mutex<Tty>> {
    let minor = f.stat.rdev.ok_or(Error::NoDev)?.minor();
    TTYS.get(minor as usize).ok_or(Error::NoDev)
}

struct TtyOps;

static TTY_OPS: TtyOps = TtyOps;

impl FileOps for TtyOps {
    fn name(&self) -> &'static str {
        "tty"
    }

    fn open_dev(&self, _f: &mut File, minor: u8) -> Result<()> {
        let slot = TTYS.get(minor as usize).ok_or(Error::NoDev)?;
        {
            let tty = slot.lock();
            if tty.port.is_some() {
                return Ok(());
            }
        }
        if minor == 0 {
            // TODO: console port device (text framebuffer plus
            // keyboard) behind minor 0.
            return Err(Error::NoDev);
        }
        let res = vfs::open_dev(DevNum::new(dev::MAJ_SERIAL, minor));
        log_result!(res, "init tty {} on serial {}", minor, minor);
        let port = res?;
        let mut tty = slot.lock();
        tty.port = Some(port);
        tty.ilen = 0;
        Ok(())
    }

    fn read(
        &self,
        f: &mut File,
        dst: &mut [u8],
        _pos: &mut i64,
    ) -> Result<usize> {
        let mut tty = tty_of(f)?.lock();
        let tty = &mut *tty;

        // Pull bytes from the port until the buffer is full, a line
        // is complete, or the port runs dry.
        let mut port_eof = false;
        while tty.ilen < IBUFSZ && !tty.ibuf_eol {
            let mut ch = [0u8; 1];
            let port = tty.port.as_mut().ok_or(Error::NoDev)?;
            match port.read(&mut ch) {
                Ok(0) => {
                    port_eof = true;
                    break;
                }
                Ok(_) => tty.inchar(ch[0])?,
                Err(Error::TryAgain) => break,
                Err(e) => return Err(e),
            }
        }

        // Nothing buffered: end of input, or just no new data?
        if tty.ilen == 0 {
            if port_eof {
                return Ok(0);
            }
            if tty.cooked() && tty.ibuf_eof {
                tty.ibuf_eof = false;
                tty.ibuf_eol = false;
                return Ok(0);
            }
            return Err(Error::TryAgain);
        }

        // Cooked mode holds the data back until the line is whole.
        if tty.cooked() && !tty.ibuf_eol {
            return Err(Error::TryAgain);
        }

        let n = usize::min(tty.ilen, dst.len());
        dst[..n].copy_from_slice(&tty.ibuf[..n]);
        // Keep whatever the caller did not take, front-aligned for
        // the next read.
        tty.ibuf.copy_within(n..tty.ilen, 0);
        tty.ilen -= n;
        if tty.ilen == 0 {
            tty.ibuf_eol = false;
        }
        Ok(n)
    }

    fn write(
        &self,
        f: &mut File,
        src: &[u8],
        _pos: &mut i64,
    ) -> Result<usize> {
        let mut tty = tty_of(f)?.lock();
        let port = tty.port.as_mut().ok_or(Error::NoDev)?;
        port.write(src)
    }

    fn ioctl(&self, f: &mut File, cmd: Ioctl) -> Result<u32> {
        let mut tty = tty_of(f)?.lock();
        match cmd {
            Ioctl::GetFlags => Ok(tty.flags.bits()),
            Ioctl::SetFlags(bits) => {
                tty.flags = TtyFlags::from_bits(bits).ok_or(Error::Invalid)?;
                Ok(0)
            }
        }
    }
}

pub fn init() -> Result<()> {
    dev::chrdev_register(dev::MAJ_TTY, &TTY_OPS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes;

    fn open_tty1(flags: TtyFlags) -> File {
        crate::serial::init().unwrap();
        init().unwrap();
        let mut f = vfs::open_dev(DevNum::new(dev::MAJ_TTY, 1)).unwrap();
        f.ioctl(Ioctl::SetFlags(flags.bits())).unwrap();
        f
    }

    fn drain(tty: &mut File) {
        let mut buf = [0u8; IBUFSZ];
        loop {
            match tty.read(&mut buf) {
                Ok(0) | Err(Error::TryAgain) => break,
                Ok(_) => continue,
                Err(e) => panic!("drain: {e:?}"),
            }
        }
    }

    #[test]
    fn cooked_editing_echo_and_line() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::ECHO | TtyFlags::COOKED);
        drain(&mut tty);
        fakes::take_tx(1);

        fakes::push_rx(1, b"ab\x08\x08cd\n");
        let mut buf = [0u8; IBUFSZ];
        let n = tty.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"cd\n");
        assert_eq!(fakes::take_tx(1), b"ab\x08 \x08\x08 \x08cd\n");
    }

    #[test]
    fn kill_line_discards_pending_input() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::ECHO | TtyFlags::COOKED);
        drain(&mut tty);
        fakes::take_tx(1);

        fakes::push_rx(1, b"oops\x15ok\n");
        let mut buf = [0u8; IBUFSZ];
        let n = tty.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok\n");
        assert_eq!(
            fakes::take_tx(1),
            b"oops\x08 \x08\x08 \x08\x08 \x08\x08 \x08ok\n"
        );
    }

    #[test]
    fn ctrl_d_on_empty_line_reads_as_eof_once() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::COOKED);
        drain(&mut tty);

        fakes::push_rx(1, &[CTRL_D]);
        let mut buf = [0u8; 16];
        assert_eq!(tty.read(&mut buf), Ok(0));
        // The EOF condition is consumed by the read that saw it.
        assert_eq!(tty.read(&mut buf), Err(Error::TryAgain));
    }

    #[test]
    fn ctrl_d_with_pending_input_finishes_the_line() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::COOKED);
        drain(&mut tty);

        fakes::push_rx(1, b"hi\x04");
        let mut buf = [0u8; 16];
        let n = tty.read(&mut buf).unwrap();
        // The line is yielded without a newline and without EOF.
        assert_eq!(&buf[..n], b"hi");
        assert_eq!(tty.read(&mut buf), Err(Error::TryAgain));
    }

    #[test]
    fn one_line_per_read() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::COOKED);
        drain(&mut tty);

        fakes::push_rx(1, b"one\ntwo\n");
        let mut buf = [0u8; IBUFSZ];
        let n = tty.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"one\n");
        let n = tty.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"two\n");
        assert_eq!(tty.read(&mut buf), Err(Error::TryAgain));
    }

    #[test]
    fn short_reads_drain_a_line_in_pieces() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::COOKED);
        drain(&mut tty);

        fakes::push_rx(1, b"abcdef\n");
        let mut buf = [0u8; 3];
        assert_eq!(tty.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(tty.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"def");
        assert_eq!(tty.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'\n');
    }

    #[test]
    fn incomplete_cooked_line_is_try_again() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::COOKED);
        drain(&mut tty);

        fakes::push_rx(1, b"partial");
        let mut buf = [0u8; 16];
        assert_eq!(tty.read(&mut buf), Err(Error::TryAgain));
        fakes::push_rx(1, b"\n");
        let n = tty.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"partial\n");
    }

    #[test]
    fn raw_mode_passes_bytes_through() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::empty());
        drain(&mut tty);
        fakes::take_tx(1);

        fakes::push_rx(1, b"x\x04y");
        let mut buf = [0u8; 16];
        let n = tty.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"x\x04y");
        // No echo in effect.
        assert_eq!(fakes::take_tx(1), b"");
    }

    #[test]
    fn echoctl_renders_control_bytes() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::ECHO | TtyFlags::ECHOCTL);
        drain(&mut tty);
        fakes::take_tx(1);

        fakes::push_rx(1, &[0x01, 0x7f, 0x90, b'\t']);
        let mut buf = [0u8; 16];
        tty.read(&mut buf).unwrap();
        assert_eq!(fakes::take_tx(1), b"^A^?\\x90\t");
    }

    #[test]
    fn write_passes_through_to_the_port() {
        let _g = fakes::lock();
        let mut tty = open_tty1(TtyFlags::empty());
        fakes::take_tx(1);
        assert_eq!(tty.write(b"hi there"), Ok(8));
        assert_eq!(fakes::take_tx(1), b"hi there");
    }

    #[test]
    fn reserved_and_out_of_range_minors() {
        let _g = fakes::lock();
        crate::serial::init().unwrap();
        init().unwrap();
        let con = vfs::open_dev(DevNum::new(dev::MAJ_TTY, 0));
        assert_eq!(con.err(), Some(Error::NoDev));
        let oob = vfs::open_dev(DevNum::new(dev::MAJ_TTY, 9));
        assert_eq!(oob.err(), Some(Error::NoDev));
    }
}
