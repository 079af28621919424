// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The mount table and path router.
//!
//! Mounts live in a small table kept sorted ascending by mountpath.
//! Routing an absolute path walks the table in reverse and takes the
//! first mount whose mountpath is a prefix of the path, which is the
//! longest-prefix match.  The mountpath (and one following `/`) is
//! stripped before the filesystem driver sees the path; an empty
//! remainder names the filesystem root.

use crate::dev::{self, DevNum};
use crate::logger::log_result;
use crate::path;
use crate::result::{Error, Result};
use crate::vfs::{FStat, File, FileOps, PATH_MAX};
use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

/// Size of the mount table.
pub const SB_MAX: usize = 4;

/// The capability set a filesystem driver supplies for its mounts.
pub trait FsOps: Sync {
    fn name(&self) -> &'static str;

    fn sb_open(&self, _sb: &mut Superblock) -> Result<()> {
        Ok(())
    }

    fn sb_release(&self, _sb: &mut Superblock) -> Result<()> {
        Ok(())
    }

    /// The file capability set used to open files inside the mount.
    fn file_ops(&self) -> &'static dyn FileOps;
}

/// The live record of one mount.
#[derive(Clone)]
pub struct Superblock {
    /// Find-again token for the root directory, from the filesystem.
    pub root_ino: u64,
    /// Device number of the filesystem's backing block device.
    pub bdev: DevNum,
    /// Human-readable description of the backing store.
    pub name: String,
    /// Absolute path the filesystem root is attached at.
    pub mountpath: String,
    pub(crate) ops: &'static dyn FsOps,
}

impl Superblock {
    pub fn fsname(&self) -> &'static str {
        self.ops.name()
    }
}

static MOUNTS: Mutex<Vec<Superblock>> = Mutex::new(Vec::new());

fn mountdev_inner(bdev: DevNum, fstype: u32, mountpath: &str) -> Result<()> {
    let ops = dev::fsdriver(fstype).ok_or(Error::NoDev)?;
    if mountpath.is_empty() || mountpath.len() > PATH_MAX {
        return Err(Error::Invalid);
    }
    let mut sb = Superblock {
        root_ino: 0,
        bdev,
        name: String::new(),
        mountpath: String::from(mountpath),
        ops,
    };
    ops.sb_open(&mut sb)?;

    let mut mounts = MOUNTS.lock();
    if mounts.len() >= SB_MAX {
        drop(mounts);
        let _ = ops.sb_release(&mut sb);
        return Err(Error::NoMem);
    }
    // Insert before the first strictly greater mountpath to keep the
    // table sorted.
    let at = mounts
        .iter()
        .position(|m| m.mountpath.as_str() > mountpath)
        .unwrap_or(mounts.len());
    mounts.insert(at, sb);
    Ok(())
}

/// Mounts the filesystem of type `fstype` found on `bdev` at
/// `mountpath`.
pub fn mountdev(bdev: DevNum, fstype: u32, mountpath: &str) -> Result<()> {
    let res = mountdev_inner(bdev, fstype, mountpath);
    log_result!(res, "mount device {:?} on {}", bdev, mountpath);
    res
}

/// Detaches the mount at exactly `mountpath`.
pub fn unmount(mountpath: &str) -> Result<()> {
    let mut sb = {
        let mut mounts = MOUNTS.lock();
        let at = mounts
            .iter()
            .position(|m| m.mountpath == mountpath)
            .ok_or(Error::NoEnt)?;
        mounts.remove(at)
    };
    sb.ops.sb_release(&mut sb)
}

/// Snapshot of the mount table in mountpath order.
pub fn mounts() -> Vec<Superblock> {
    MOUNTS.lock().clone()
}

fn find_mount_for_path(abspath: &str) -> Option<Superblock> {
    MOUNTS
        .lock()
        .iter()
        .rev()
        .find(|sb| abspath.starts_with(sb.mountpath.as_str()))
        .cloned()
}

/// Opens `path`, relative to `cwd` unless absolute, by routing the
/// joined path to the covering mount.
pub fn open_path(cwd: &str, path: &str) -> Result<File> {
    let abspath = path::join(cwd, path);
    if abspath.len() > PATH_MAX {
        return Err(Error::Overflow);
    }
    let sb = find_mount_for_path(&abspath).ok_or(Error::NoEnt)?;
    let relpath =
        path::strip_prefix(&abspath, &sb.mountpath).ok_or(Error::NoEnt)?;
    let ops = sb.ops.file_ops();
    let mut f = File::with_ops(ops);
    ops.open_path(&mut f, &sb, relpath)?;
    Ok(f)
}

/// Open-then-close: returns the metadata snapshot for `path`.
pub fn stat(cwd: &str, path: &str) -> Result<FStat> {
    let f = open_path(cwd, path)?;
    Ok(f.stat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::{FS_CPIO, MAJ_RAMDISK};
    use crate::fakes;
    use crate::vfs::DirType;

    #[test]
    fn mount_table_stays_sorted_and_bounded() {
        let _g = fakes::lock();
        fakes::mount_fixture();
        let bdev = fakes::fixture_bdev();

        mountdev(bdev, FS_CPIO, "/mnt/c").unwrap();
        mountdev(bdev, FS_CPIO, "/mnt/a").unwrap();
        mountdev(bdev, FS_CPIO, "/mnt/b").unwrap();

        let paths: Vec<String> =
            mounts().iter().map(|m| m.mountpath.clone()).collect();
        assert_eq!(paths, ["/", "/mnt/a", "/mnt/b", "/mnt/c"]);
        for pair in paths.windows(2) {
            assert!(pair[0] <= pair[1]);
        }

        // The table is a fixed pool; a fifth mount does not fit.
        assert_eq!(mountdev(bdev, FS_CPIO, "/mnt/d"), Err(Error::NoMem));

        unmount("/mnt/a").unwrap();
        unmount("/mnt/b").unwrap();
        unmount("/mnt/c").unwrap();
        assert_eq!(mounts().len(), 1);
        assert_eq!(unmount("/mnt/a"), Err(Error::NoEnt));
    }

    #[test]
    fn longest_prefix_mount_wins() {
        let _g = fakes::lock();
        fakes::mount_fixture();

        // A second archive whose root holds its own "hello".
        let archive = fakes::ArchiveBuilder::new()
            .dir(".")
            .file("hello", b"from the bin mount\n")
            .finish_static();
        let minor = crate::ramdisk::create(archive, "bindisk").unwrap();
        mountdev(DevNum::new(MAJ_RAMDISK, minor), FS_CPIO, "/bin").unwrap();

        // /bin/hello now routes through the /bin mount with relpath
        // "hello", not through / with relpath "bin/hello".
        let mut f = open_path("/", "/bin/hello").unwrap();
        let mut buf = [0u8; 64];
        let text = f.read_str(&mut buf).unwrap();
        assert_eq!(text, "from the bin mount\n");

        // Paths outside the /bin subtree still route through /.
        let st = stat("/", "/sbin/init").unwrap();
        assert_eq!(st.kind, DirType::Reg);

        drop(f);
        unmount("/bin").unwrap();
        let mut f = open_path("/", "/bin/hello").unwrap();
        let text = f.read_str(&mut buf).unwrap();
        assert_eq!(text.as_bytes(), fakes::HELLO_TEXT);
    }

    #[test]
    fn relative_path_without_cwd_finds_no_mount() {
        let _g = fakes::lock();
        fakes::mount_fixture();
        // Nothing can cover a path that is not absolute.
        assert_eq!(open_path("", "hello").err(), Some(Error::NoEnt));
    }

    #[test]
    fn overlong_path_is_refused() {
        let _g = fakes::lock();
        fakes::mount_fixture();
        let long = alloc::format!("/{}", "a".repeat(PATH_MAX + 8));
        assert_eq!(open_path("/", &long).err(), Some(Error::Overflow));
    }
}
