// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device numbers and the driver registries.
//!
//! Two fixed-size tables dispatch opens to drivers: character
//! drivers indexed by major number, filesystem drivers indexed by
//! filesystem type id.  Entries are set once and never change; a
//! re-registration of the same driver is a no-op, and registering a
//! different driver over a live slot reports busy.

use crate::logger::log_result;
use crate::result::{Error, Result};
use crate::vfs::FileOps;
use crate::vfs::mount::FsOps;
use spin::Mutex;

/// A device number: driver class in the major, instance in the
/// minor, eight bits each.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct DevNum(u16);

impl DevNum {
    pub const fn new(major: u8, minor: u8) -> DevNum {
        DevNum(((major as u16) << 8) | minor as u16)
    }

    pub fn major(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn minor(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl core::fmt::Debug for DevNum {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

pub const MAJ_SERIAL: u8 = 1;
pub const MAJ_TTY: u8 = 2;
pub const MAJ_RAMDISK: u8 = 3;
pub const MAJORS_MAX: usize = 8;

pub const FS_CPIO: u32 = 1;
pub const FSTYPES_MAX: usize = 4;

static CHRDEVS: Mutex<[Option<&'static dyn FileOps>; MAJORS_MAX]> =
    Mutex::new([None; MAJORS_MAX]);

static FSDRIVERS: Mutex<[Option<&'static dyn FsOps>; FSTYPES_MAX]> =
    Mutex::new([None; FSTYPES_MAX]);

// Driver identity is the address of the registered static; the
// vtable part of the fat pointer is irrelevant for the comparison.
fn same_driver<T: ?Sized>(a: &T, b: &T) -> bool {
    core::ptr::eq(a as *const T as *const (), b as *const T as *const ())
}

fn chrdev_register_inner(major: u8, ops: &'static dyn FileOps) -> Result<()> {
    if major == 0 || major as usize >= MAJORS_MAX {
        return Err(Error::Invalid);
    }
    let mut tbl = CHRDEVS.lock();
    match tbl[major as usize] {
        None => {
            tbl[major as usize] = Some(ops);
            Ok(())
        }
        Some(cur) if same_driver(cur, ops) => Ok(()),
        Some(_) => Err(Error::Busy),
    }
}

pub fn chrdev_register(major: u8, ops: &'static dyn FileOps) -> Result<()> {
    let res = chrdev_register_inner(major, ops);
    log_result!(
        res,
        "registered device driver: major #{} = {}",
        major,
        ops.name()
    );
    res
}

pub(crate) fn chrdev(major: u8) -> Option<&'static dyn FileOps> {
    CHRDEVS.lock().get(major as usize).copied().flatten()
}

fn fs_register_inner(fstype: u32, ops: &'static dyn FsOps) -> Result<()> {
    if fstype == 0 || fstype as usize >= FSTYPES_MAX {
        return Err(Error::Invalid);
    }
    let mut tbl = FSDRIVERS.lock();
    match tbl[fstype as usize] {
        None => {
            tbl[fstype as usize] = Some(ops);
            Ok(())
        }
        Some(cur) if same_driver(cur, ops) => Ok(()),
        Some(_) => Err(Error::Busy),
    }
}

pub fn fs_register(fstype: u32, ops: &'static dyn FsOps) -> Result<()> {
    let res = fs_register_inner(fstype, ops);
    log_result!(
        res,
        "registered filesystem driver: fstype #{} = {}",
        fstype,
        ops.name()
    );
    res
}

pub(crate) fn fsdriver(fstype: u32) -> Option<&'static dyn FsOps> {
    FSDRIVERS.lock().get(fstype as usize).copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes;

    struct NullDev;

    impl FileOps for NullDev {
        fn name(&self) -> &'static str {
            "nulldev"
        }
    }

    static NULL_A: NullDev = NullDev;
    static NULL_B: NullDev = NullDev;

    const TEST_MAJ: u8 = 6;

    #[test]
    fn devnum_packs_major_minor() {
        let d = DevNum::new(3, 7);
        assert_eq!(d.major(), 3);
        assert_eq!(d.minor(), 7);
    }

    #[test]
    fn register_is_set_once() {
        let _g = fakes::lock();
        assert_eq!(chrdev_register(TEST_MAJ, &NULL_A), Ok(()));
        // Same driver again is fine.
        assert_eq!(chrdev_register(TEST_MAJ, &NULL_A), Ok(()));
        // A different driver is refused and the table is unchanged.
        assert_eq!(chrdev_register(TEST_MAJ, &NULL_B), Err(Error::Busy));
        let cur = chrdev(TEST_MAJ).unwrap();
        assert!(super::same_driver(cur, &NULL_A as &dyn FileOps));
    }

    #[test]
    fn register_rejects_bad_ids() {
        let _g = fakes::lock();
        assert_eq!(chrdev_register(0, &NULL_A), Err(Error::Invalid));
        assert_eq!(
            chrdev_register(MAJORS_MAX as u8, &NULL_A),
            Err(Error::Invalid)
        );
        assert!(chrdev(0).is_none());
        assert!(chrdev(200).is_none());
    }
}
