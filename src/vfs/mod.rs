// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The virtual filesystem core: one uniform `File` object over every
//! driver in the system.
//!
//! A `File` may represent a character device (serial port, TTY,
//! ramdisk) opened by device number, or a member of a mounted
//! filesystem opened by path.  The driver behind it supplies a
//! [`FileOps`] capability set; operations the driver does not
//! implement report [`Error::NotSup`] from the trait's default
//! bodies.

pub mod mount;

use crate::dev::{self, DevNum};
use crate::result::{Error, Result};
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use core::any::Any;
use core::fmt;

/// Longest path, in bytes, the kernel will route or store.
pub const PATH_MAX: usize = 128;

/// Default format buffer for `File::write_fmt`.  Output that does
/// not fit is retried with an exactly-sized allocation, so a bigger
/// value only saves that retry.
const FMT_BUFSZ: usize = 256;

/// What kind of object a directory entry or file is.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DirType {
    #[default]
    Unknown,
    /// Character device.
    Chr,
    /// Directory.
    Dir,
    /// Regular file.
    Reg,
}

/// Metadata snapshot taken when a file is opened.
#[derive(Clone, Copy, Debug, Default)]
pub struct FStat {
    pub ino: u64,
    pub kind: DirType,
    pub rdev: Option<DevNum>,
    pub size: i64,
}

/// One entry of a directory listing.
#[derive(Clone, Debug)]
pub struct Dirent {
    pub ino: u64,
    pub kind: DirType,
    pub name: String,
}

/// Origin for [`File::lseek`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Device control requests.  Both flag-bearing drivers (serial and
/// TTY) interpret the bits with their own flag type.
#[derive(Clone, Copy, Debug)]
pub enum Ioctl {
    GetFlags,
    SetFlags(u32),
}

/// The capability set a driver supplies for its files.
///
/// Default method bodies stand in for absent table entries and
/// report not-supported, except `release` (a successful no-op) and
/// `lseek` (a validation hook; the VFS itself applies the whence
/// arithmetic afterwards).
pub trait FileOps: Sync {
    fn name(&self) -> &'static str;

    fn open_dev(&self, _f: &mut File, _minor: u8) -> Result<()> {
        Err(Error::NotSup)
    }

    fn open_path(
        &self,
        _f: &mut File,
        _sb: &mount::Superblock,
        _relpath: &str,
    ) -> Result<()> {
        Err(Error::NotSup)
    }

    fn release(&self, _f: &mut File) -> Result<()> {
        Ok(())
    }

    fn debugstr(&self, _f: &File) -> Option<String> {
        None
    }

    fn read(
        &self,
        _f: &mut File,
        _dst: &mut [u8],
        _pos: &mut i64,
    ) -> Result<usize> {
        Err(Error::NotSup)
    }

    fn write(
        &self,
        _f: &mut File,
        _src: &[u8],
        _pos: &mut i64,
    ) -> Result<usize> {
        Err(Error::NotSup)
    }

    fn readdir(&self, _f: &mut File) -> Result<Option<Dirent>> {
        Err(Error::NotSup)
    }

    fn lseek(&self, _f: &mut File, _off: i64, _whence: Whence) -> Result<()> {
        Ok(())
    }

    fn ioctl(&self, _f: &mut File, _cmd: Ioctl) -> Result<u32> {
        Err(Error::NotSup)
    }
}

/// An open file handle.
///
/// While open, `ops` is set and `pos` is non-negative.  The driver
/// may park per-open state in `data`; the file owns it until release.
pub struct File {
    pub(crate) stat: FStat,
    pub(crate) pos: i64,
    pub(crate) ops: Option<&'static dyn FileOps>,
    pub(crate) data: Option<Box<dyn Any + Send>>,
}

/// Opens the character device `rdev` by looking up its driver in the
/// major-number registry.
pub fn open_dev(rdev: DevNum) -> Result<File> {
    let ops = dev::chrdev(rdev.major()).ok_or(Error::NoDev)?;
    let mut f = File::with_ops(ops);
    f.stat.kind = DirType::Chr;
    f.stat.rdev = Some(rdev);
    ops.open_dev(&mut f, rdev.minor())?;
    Ok(f)
}

impl File {
    pub(crate) fn with_ops(ops: &'static dyn FileOps) -> File {
        File { stat: FStat::default(), pos: 0, ops: Some(ops), data: None }
    }

    pub fn stat(&self) -> &FStat {
        &self.stat
    }

    pub fn pos(&self) -> i64 {
        self.pos
    }

    /// Reads at the file's own position, advancing it.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        let ops = self.ops.ok_or(Error::Invalid)?;
        if dst.is_empty() {
            return Ok(0);
        }
        let mut pos = self.pos;
        let n = ops.read(self, dst, &mut pos)?;
        self.pos = pos;
        Ok(n)
    }

    /// Reads at `off` without touching the file's own position.
    pub fn pread(&mut self, dst: &mut [u8], off: i64) -> Result<usize> {
        let ops = self.ops.ok_or(Error::Invalid)?;
        if dst.is_empty() {
            return Ok(0);
        }
        let mut pos = off;
        ops.read(self, dst, &mut pos)
    }

    /// Writes at the file's own position.
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        let ops = self.ops.ok_or(Error::Invalid)?;
        if src.is_empty() {
            return Ok(0);
        }
        let mut pos = self.pos;
        let n = ops.write(self, src, &mut pos)?;
        self.pos = pos;
        Ok(n)
    }

    /// Writes at `off` without touching the file's own position.
    pub fn pwrite(&mut self, src: &[u8], off: i64) -> Result<usize> {
        let ops = self.ops.ok_or(Error::Invalid)?;
        if src.is_empty() {
            return Ok(0);
        }
        let mut pos = off;
        ops.write(self, src, &mut pos)
    }

    /// Reads into `buf` and returns the bytes as text.
    pub fn read_str<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a str> {
        let n = self.read(buf)?;
        core::str::from_utf8(&buf[..n]).map_err(|_| Error::Utf8)
    }

    /// Repositions the file and returns the new position.
    ///
    /// The driver's `lseek` hook runs first so a wrapped stream can
    /// validate or seek itself; the whence arithmetic then applies
    /// here.  A resulting position below zero is refused with no
    /// side effect.
    pub fn lseek(&mut self, off: i64, whence: Whence) -> Result<i64> {
        let ops = self.ops.ok_or(Error::Invalid)?;
        ops.lseek(self, off, whence)?;
        let newpos = match whence {
            Whence::Set => off,
            Whence::Cur => self.pos + off,
            Whence::End => self.stat.size + off,
        };
        if newpos < 0 {
            return Err(Error::Invalid);
        }
        self.pos = newpos;
        Ok(newpos)
    }

    /// Yields the next directory entry, or `None` at the end of the
    /// directory.
    pub fn readdir(&mut self) -> Result<Option<Dirent>> {
        let ops = self.ops.ok_or(Error::Invalid)?;
        if self.stat.kind != DirType::Dir {
            return Err(Error::NotDir);
        }
        ops.readdir(self)
    }

    pub fn ioctl(&mut self, cmd: Ioctl) -> Result<u32> {
        let ops = self.ops.ok_or(Error::Invalid)?;
        ops.ioctl(self, cmd)
    }

    /// A short human-readable description of the file for banners
    /// and diagnostics.
    pub fn debugstr(&self) -> String {
        let Some(ops) = self.ops else {
            return String::from("file{closed}");
        };
        if let Some(s) = ops.debugstr(self) {
            return s;
        }
        match self.stat.rdev {
            Some(rdev) => format!("{}{}", ops.name(), rdev.minor()),
            None => format!("file{{{}}}", ops.name()),
        }
    }

    /// Formats into the file with a single write.
    ///
    /// Formatting goes through a fixed stack buffer first; when the
    /// output does not fit, it is redone into an allocation of the
    /// exact required size, so truncated partial writes never happen.
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<usize> {
        let mut fb = FmtBuf::new();
        fmt::write(&mut fb, args).map_err(|_| Error::Invalid)?;
        if fb.needed <= FMT_BUFSZ {
            return self.write(&fb.buf[..fb.len]);
        }
        let mut full = String::with_capacity(fb.needed);
        fmt::write(&mut full, args).map_err(|_| Error::Invalid)?;
        self.write(full.as_bytes())
    }

    /// Releases the file.  The handle is reusable (reopenable state,
    /// not poisoned) afterwards.
    pub fn close(&mut self) -> Result<()> {
        let Some(ops) = self.ops.take() else {
            return Ok(());
        };
        let res = ops.release(self);
        self.data = None;
        self.stat = FStat::default();
        self.pos = 0;
        res
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Bounded formatting buffer that records how much output the full
/// rendering would need instead of failing on overflow.
struct FmtBuf {
    buf: [u8; FMT_BUFSZ],
    len: usize,
    needed: usize,
}

impl FmtBuf {
    fn new() -> FmtBuf {
        FmtBuf { buf: [0; FMT_BUFSZ], len: 0, needed: 0 }
    }
}

impl fmt::Write for FmtBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bs = s.as_bytes();
        self.needed += bs.len();
        let n = usize::min(FMT_BUFSZ - self.len, bs.len());
        self.buf[self.len..self.len + n].copy_from_slice(&bs[..n]);
        self.len += n;
        Ok(())
    }
}

/// Formatted output into a file, `print!`-style.
#[macro_export]
macro_rules! fprint {
    ($f:expr, $($arg:tt)*) => {
        $f.write_fmt(format_args!($($arg)*))
    };
}

/// Formatted output into a file with a trailing newline.
#[macro_export]
macro_rules! fprintln {
    ($f:expr) => {
        $crate::fprint!($f, "\n")
    };
    ($f:expr, $($arg:tt)*) => {
        $crate::fprint!($f, "{}\n", format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::MAJ_SERIAL;
    use crate::fakes;

    fn open_hello() -> File {
        fakes::mount_fixture();
        mount::open_path("/", "bin/hello").unwrap()
    }

    #[test]
    fn lseek_cur_zero_is_identity() {
        let _g = fakes::lock();
        let mut f = open_hello();
        assert_eq!(f.lseek(0, Whence::Cur), Ok(0));
        let mut buf = [0u8; 10];
        assert_eq!(f.read(&mut buf), Ok(10));
        assert_eq!(f.lseek(0, Whence::Cur), Ok(10));
        assert_eq!(f.pos(), 10);
    }

    #[test]
    fn lseek_set_and_end() {
        let _g = fakes::lock();
        let mut f = open_hello();
        let size = f.stat().size;
        assert_eq!(f.lseek(5, Whence::Set), Ok(5));
        assert_eq!(f.lseek(0, Whence::End), Ok(size));
        assert_eq!(f.lseek(-2, Whence::End), Ok(size - 2));
    }

    #[test]
    fn lseek_below_zero_has_no_side_effect() {
        let _g = fakes::lock();
        let mut f = open_hello();
        assert_eq!(f.lseek(3, Whence::Set), Ok(3));
        assert_eq!(f.lseek(-10, Whence::Cur), Err(Error::Invalid));
        assert_eq!(f.pos(), 3);
    }

    #[test]
    fn closed_file_refuses_operations() {
        let _g = fakes::lock();
        let mut f = open_hello();
        f.close().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(f.read(&mut buf), Err(Error::Invalid));
        assert_eq!(f.lseek(0, Whence::Cur), Err(Error::Invalid));
        assert_eq!(f.debugstr(), "file{closed}");
    }

    #[test]
    fn write_fmt_is_a_single_complete_write() {
        let _g = fakes::lock();
        crate::serial::init().unwrap();
        let mut cons = open_dev(DevNum::new(MAJ_SERIAL, 1)).unwrap();
        fakes::take_tx(1);

        // Short output goes through the stack buffer.
        fprint!(cons, "pos={}", 7).unwrap();
        assert_eq!(fakes::take_tx(1), b"pos=7");

        // Long output exceeds the stack buffer and is retried with
        // an exactly-sized allocation; nothing is truncated.
        let long = "x".repeat(5 * FMT_BUFSZ / 2);
        fprint!(cons, "<{}>", long).unwrap();
        let out = fakes::take_tx(1);
        assert_eq!(out.len(), long.len() + 2);
        assert!(out.starts_with(b"<x"));
        assert!(out.ends_with(b"x>"));
    }
}
