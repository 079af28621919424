// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CPIO "newc" filesystem driver.
//!
//! The initrd is a CPIO archive in the New ASCII ("newc") format:
//! the magic `070701`, thirteen 8-character hex fields, the NUL
//! terminated pathname, then the file data, with both pathname and
//! data padded to 4-byte alignment.  The archive ends at a header
//! named `TRAILER!!!` with a zero file size.
//!
//! The driver never touches the backing memory directly; it reads
//! the archive through an ordinary VFS file on the backing block
//! device.  Every open file reopens that device, so each handle
//! carries its own independent cursor into the archive.

use crate::dev::DevNum;
use crate::result::{Error, Result};
use crate::vfs::mount::{FsOps, Superblock};
use crate::vfs::{
    self, Dirent, DirType, FStat, File, FileOps, PATH_MAX, Whence,
};
use alloc::boxed::Box;
use alloc::string::String;
use static_assertions::const_assert_eq;

const NEWC_MAGIC: &[u8; 6] = b"070701";

/// Header length: magic plus thirteen 8-char hex fields.
const NEWC_HLEN: usize = 110;
const_assert_eq!(NEWC_HLEN, 6 + 13 * 8);

/* File type bits of the mode field. */
const CM_FT_MASK: u32 = 0o60000;
const CM_FT_DIR: u32 = 0o40000;
const CM_FT_CHR: u32 = 0o20000;
const CM_FT_BLK: u32 = 0o60000;

/// One decoded archive header.
struct Header {
    /// Archive offset of the start of this header.
    hoff: i64,
    ino: u64,
    mode: u32,
    rdevmajor: u32,
    rdevminor: u32,
    /// File data size.
    fsize: i64,
    /// Pathname length including the NUL terminator.
    psize: usize,
    /// Padding after the pathname, before the file data.
    ppad: usize,
    /// Padding after the file data, before the next header.
    fpad: usize,
    pathname: String,
    /// Is this the `TRAILER!!!` end-of-archive marker?
    is_trailer: bool,
}

/// Decodes an ASCII numeral field by left-to-right multiply and
/// accumulate.  Digits at or beyond the base, and bytes that are not
/// hex digits at all, are malformed.
fn cpio_atoi(field: &[u8], base: u64) -> Result<u64> {
    let mut val: u64 = 0;
    for &b in field {
        let digit = match b {
            b'0'..=b'9' => (b - b'0') as u64,
            b'a'..=b'f' => (b - b'a') as u64 + 0xa,
            b'A'..=b'F' => (b - b'A') as u64 + 0xa,
            _ => return Err(Error::Invalid),
        };
        if digit >= base {
            return Err(Error::Invalid);
        }
        val = val * base + digit;
    }
    Ok(val)
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Reads exactly `buf.len()` bytes; a short archive is malformed.
fn read_full(af: &mut File, buf: &mut [u8]) -> Result<()> {
    let mut got = 0;
    while got < buf.len() {
        let n = af.read(&mut buf[got..])?;
        if n == 0 {
            return Err(Error::Invalid);
        }
        got += n;
    }
    Ok(())
}

/// Reads and decodes the header at the archive file's position,
/// leaving the position at the start of the entry's file data.
fn read_header(af: &mut File) -> Result<Header> {
    let hoff = af.pos();
    let mut raw = [0u8; NEWC_HLEN];
    read_full(af, &mut raw[..6])?;
    if &raw[..6] != NEWC_MAGIC {
        return Err(Error::Invalid);
    }
    read_full(af, &mut raw[6..])?;

    // Fields, in order: ino mode uid gid nlink mtime filesize
    // devmajor devminor rdevmajor rdevminor namesize check.
    let field = |i: usize| cpio_atoi(&raw[6 + i * 8..6 + (i + 1) * 8], 16);
    let ino = field(0)?;
    let mode = field(1)? as u32;
    let fsize = field(6)? as i64;
    let rdevmajor = field(9)? as u32;
    let rdevminor = field(10)? as u32;
    let psize = field(11)? as usize;

    if psize == 0 {
        return Err(Error::Invalid);
    }
    if psize > PATH_MAX {
        return Err(Error::Overflow);
    }
    let ppad = align4(NEWC_HLEN + psize) - (NEWC_HLEN + psize);
    let fpad = align4(fsize as usize) - fsize as usize;

    let mut namebuf = [0u8; PATH_MAX];
    read_full(af, &mut namebuf[..psize])?;
    let name = &namebuf[..psize];
    let end = name.iter().position(|&b| b == 0).unwrap_or(psize);
    let pathname = core::str::from_utf8(&name[..end])
        .map_err(|_| Error::Utf8)?
        .into();
    if ppad != 0 {
        af.lseek(ppad as i64, Whence::Cur)?;
    }

    let is_trailer = fsize == 0 && pathname == "TRAILER!!!";
    Ok(Header {
        hoff,
        ino,
        mode,
        rdevmajor,
        rdevminor,
        fsize,
        psize,
        ppad,
        fpad,
        pathname,
        is_trailer,
    })
}

/// Seeks from the start of an entry's file data to the next header.
fn skip_fdata(af: &mut File, h: &Header) -> Result<()> {
    af.lseek(h.fsize + h.fpad as i64, Whence::Cur)?;
    Ok(())
}

/// Scans forward for the entry whose pathname equals `path` exactly.
/// Returns the entry's sequence number in the archive and its
/// header.
fn find_path(af: &mut File, path: &str) -> Result<(u64, Header)> {
    let mut seq = 0;
    loop {
        let h = read_header(af)?;
        if h.pathname == path {
            return Ok((seq, h));
        }
        if h.is_trailer {
            return Err(Error::NoEnt);
        }
        skip_fdata(af, &h)?;
        seq += 1;
    }
}

fn mode_to_dirtype(mode: u32) -> Result<DirType> {
    match mode & CM_FT_MASK {
        0 => Ok(DirType::Reg),
        CM_FT_DIR => Ok(DirType::Dir),
        CM_FT_CHR => Ok(DirType::Chr),
        // Block devices collapse onto the character kind; nothing in
        // this kernel can address one anyway.
        CM_FT_BLK => Ok(DirType::Chr),
        _ => Err(Error::Invalid),
    }
}

fn header_fstat(h: &Header) -> Result<FStat> {
    let kind = mode_to_dirtype(h.mode)?;
    let rdev = if kind == DirType::Chr {
        Some(DevNum::new(h.rdevmajor as u8, h.rdevminor as u8))
    } else {
        None
    };
    Ok(FStat { ino: h.ino, kind, rdev, size: h.fsize })
}

/// Per-open driver state: a private handle on the backing device
/// plus the located entry.
struct CpioFile {
    /// Archive file.  Each open file gets its own, so cursors on
    /// different handles never disturb each other.
    af: File,
    hdr: Header,
    /// Archive offset of the entry's file data.
    foff: i64,
}

fn ctx_mut(f: &mut File) -> Result<&mut CpioFile> {
    f.data
        .as_mut()
        .and_then(|d| d.downcast_mut::<CpioFile>())
        .ok_or(Error::Invalid)
}

/// Decides whether `entry` is a direct child of the directory named
/// `dirpath` (already root-normalized to `""`), and if so returns
/// the child's name.  The byte after the directory prefix must be a
/// path separator, so `foo` does not claim `foobar`; entries with
/// deeper components are left for their own directories.
fn child_name<'a>(entry: &'a str, dirpath: &str) -> Option<&'a str> {
    let rel = if dirpath.is_empty() {
        entry
    } else {
        entry.strip_prefix(dirpath)?.strip_prefix('/')?
    };
    if rel.is_empty() || rel.contains('/') {
        return None;
    }
    Some(rel)
}

struct CpioFileOps;

static CPIO_FILE_OPS: CpioFileOps = CpioFileOps;

impl FileOps for CpioFileOps {
    fn name(&self) -> &'static str {
        "cpio_file"
    }

    fn open_path(
        &self,
        f: &mut File,
        sb: &Superblock,
        relpath: &str,
    ) -> Result<()> {
        // An empty remainder is the filesystem root, which the
        // archive spells ".".
        let path = if relpath.is_empty() { "." } else { relpath };
        let mut af = vfs::open_dev(sb.bdev)?;
        let (_seq, hdr) = find_path(&mut af, path)?;
        f.stat = header_fstat(&hdr)?;
        let foff =
            hdr.hoff + (NEWC_HLEN + hdr.psize + hdr.ppad) as i64;
        f.data = Some(Box::new(CpioFile { af, hdr, foff }));
        Ok(())
    }

    fn read(
        &self,
        f: &mut File,
        dst: &mut [u8],
        pos: &mut i64,
    ) -> Result<usize> {
        let size = f.stat.size;
        let ctx = ctx_mut(f)?;
        if *pos < 0 {
            *pos = 0;
        }
        if *pos >= size {
            return Ok(0);
        }
        // Clamp against the entry size at the effective offset, then
        // translate into the archive.
        let count = usize::min(dst.len(), (size - *pos) as usize);
        let aoff = *pos + ctx.foff;
        let n = ctx.af.pread(&mut dst[..count], aoff)?;
        *pos = aoff + n as i64 - ctx.foff;
        Ok(n)
    }

    fn readdir(&self, f: &mut File) -> Result<Option<Dirent>> {
        let started = f.pos != 0;
        let ctx = ctx_mut(f)?;
        // On the first call the archive cursor sits just past the
        // directory's own header; step over its (empty) data block.
        if !started {
            skip_fdata(&mut ctx.af, &ctx.hdr)?;
        }
        let dirpath = if ctx.hdr.pathname == "." {
            ""
        } else {
            ctx.hdr.pathname.as_str()
        };
        let entry = loop {
            let h = read_header(&mut ctx.af)?;
            skip_fdata(&mut ctx.af, &h)?;
            if h.is_trailer {
                break None;
            }
            if let Some(name) = child_name(&h.pathname, dirpath) {
                break Some(Dirent {
                    ino: h.ino,
                    kind: mode_to_dirtype(h.mode)?,
                    name: String::from(name),
                });
            }
        };
        if entry.is_some() {
            // A directory's position counts entries yielded.
            f.pos += 1;
        }
        Ok(entry)
    }
}

struct CpioFs;

static CPIO_FS_OPS: CpioFs = CpioFs;

impl FsOps for CpioFs {
    fn name(&self) -> &'static str {
        "cpiofs"
    }

    fn sb_open(&self, sb: &mut Superblock) -> Result<()> {
        let mut af = vfs::open_dev(sb.bdev)?;
        sb.name = af.debugstr();
        // The root directory's sequence number works as a find-again
        // token; it is not an inode in any meaningful sense.
        let (seq, _hdr) = find_path(&mut af, ".")?;
        sb.root_ino = seq;
        Ok(())
    }

    fn file_ops(&self) -> &'static dyn FileOps {
        &CPIO_FILE_OPS
    }
}

pub fn init() -> Result<()> {
    crate::dev::fs_register(crate::dev::FS_CPIO, &CPIO_FS_OPS)
}
