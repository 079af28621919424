// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ramdisk block devices.
//!
//! A ramdisk is a byte-addressable window onto memory somebody else
//! owns, typically the initrd the bootloader left behind.  Slots are
//! handed out by [`create`]; the minor number is the slot index.
//! Ramdisks are read-only.

use crate::dev;
use crate::logger::log_result;
use crate::result::{Error, Result};
use crate::vfs::{File, FileOps};
use alloc::format;
use alloc::string::String;
use spin::Mutex;

pub const RAMDISKS_MAX: usize = 8;

/// A destructured slice: the backing memory outlives the kernel and
/// is never written, so carrying the raw parts avoids tangling the
/// pool's lifetime with the borrow of the boot image.
struct Ramdisk {
    base: *const u8,
    len: usize,
    name: &'static str,
}

// Safety: `base` points at static, immutable memory.
unsafe impl Send for Ramdisk {}

impl Ramdisk {
    fn as_slice(&self) -> &'static [u8] {
        unsafe { core::slice::from_raw_parts(self.base, self.len) }
    }
}

static RAMDISKS: Mutex<[Option<Ramdisk>; RAMDISKS_MAX]> =
    Mutex::new([const { None }; RAMDISKS_MAX]);

fn create_inner(bs: &'static [u8], name: &'static str) -> Result<u8> {
    if bs.is_empty() {
        return Err(Error::Invalid);
    }
    let mut disks = RAMDISKS.lock();
    for (i, slot) in disks.iter_mut().enumerate() {
        if slot.is_none() {
            *slot =
                Some(Ramdisk { base: bs.as_ptr(), len: bs.len(), name });
            return Ok(i as u8);
        }
    }
    Err(Error::NoMem)
}

/// Registers `bs` as a new ramdisk and returns its minor number.
pub fn create(bs: &'static [u8], name: &'static str) -> Result<u8> {
    let res = create_inner(bs, name);
    log_result!(
        res,
        "create ramdisk device for {} at {:p}, size {:#x}",
        name,
        bs.as_ptr(),
        bs.len()
    );
    res
}

struct RamdiskOps;

static RAMDISK_OPS: RamdiskOps = RamdiskOps;

fn disk_of(f: &File) -> Result<usize> {
    let minor = f.stat.rdev.ok_or(Error::NoDev)?.minor() as usize;
    if minor >= RAMDISKS_MAX {
        return Err(Error::NoDev);
    }
    Ok(minor)
}

impl FileOps for RamdiskOps {
    fn name(&self) -> &'static str {
        "ramdisk"
    }

    fn open_dev(&self, f: &mut File, minor: u8) -> Result<()> {
        let disks = RAMDISKS.lock();
        let rd = disks
            .get(minor as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or(Error::NoDev)?;
        f.stat.size = rd.len as i64;
        Ok(())
    }

    fn debugstr(&self, f: &File) -> Option<String> {
        let disks = RAMDISKS.lock();
        let rd = disks.get(disk_of(f).ok()?).and_then(|slot| slot.as_ref())?;
        Some(format!("ramdisk{{{} {:p}}}", rd.name, rd.base))
    }

    fn read(
        &self,
        f: &mut File,
        dst: &mut [u8],
        pos: &mut i64,
    ) -> Result<usize> {
        let disks = RAMDISKS.lock();
        let rd = disks
            .get(disk_of(f)?)
            .and_then(|slot| slot.as_ref())
            .ok_or(Error::NoDev)?;
        let size = f.stat.size;
        if *pos < 0 {
            *pos = 0;
        }
        if *pos >= size {
            return Ok(0);
        }
        let at = *pos as usize;
        let n = usize::min(dst.len(), (size - *pos) as usize);
        dst[..n].copy_from_slice(&rd.as_slice()[at..at + n]);
        *pos += n as i64;
        Ok(n)
    }
}

pub fn init() -> Result<()> {
    dev::chrdev_register(dev::MAJ_RAMDISK, &RAMDISK_OPS)
}
