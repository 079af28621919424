// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process loading.
//!
//! This kernel does not run user-space programs yet: loading parses
//! the executable and records its entry point, and starting reports
//! not-supported.  The shell still goes through this path so the
//! plumbing from path lookup to ELF validation is exercised.

use crate::elf;
use crate::path;
use crate::result::{Error, Result};
use crate::vfs::File;
use crate::vfs::mount;
use alloc::string::String;
use core::sync::atomic::{AtomicU32, Ordering};
use goblin::elf::program_header::PT_LOAD;

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

pub struct Process {
    pub pid: u32,
    pub name: String,
    /// ELF entry point, once user-space execution exists.
    pub entry: u64,
    /// The executable stays open for the process's lifetime.
    #[allow(dead_code)]
    exec: File,
}

impl Process {
    /// Opens and validates the executable at `path` (relative to
    /// `cwd`) and builds a process record for it.
    pub fn load_path(cwd: &str, path: &str) -> Result<Process> {
        let pid = NEXT_PID.fetch_add(1, Ordering::Relaxed);
        let name = String::from(path::basename(path));
        let mut exec = mount::open_path(cwd, path)?;
        let image = elf::read_image(&mut exec)?;
        log::info!(
            "{} (pid {}): entry {:#x}, {} program headers",
            name,
            pid,
            image.entry,
            image.phdrs.len()
        );
        for phdr in image.phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
            log::info!(
                "  LOAD file {:#x}+{:#x} -> vaddr {:#x}+{:#x}",
                phdr.p_offset,
                phdr.p_filesz,
                phdr.p_vaddr,
                phdr.p_memsz
            );
            // TODO: copy the segment into place once address-space
            // management exists to put it somewhere.
        }
        Ok(Process { pid, name, entry: image.entry, exec })
    }

    /// Transfers control to the process.
    pub fn start(&mut self, _argv: &[&str]) -> Result<i32> {
        // TODO: jump to self.entry with an argv-carrying stack.
        Err(Error::NotSup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes;

    #[test]
    fn load_records_entry_and_start_is_stubbed() {
        let _g = fakes::lock();
        fakes::mount_fixture();
        let mut p = Process::load_path("/sbin", "init").unwrap();
        assert_eq!(p.name, "init");
        assert_eq!(p.entry, fakes::ELF_ENTRY);
        assert_eq!(p.start(&["init"]), Err(Error::NotSup));
    }

    #[test]
    fn load_propagates_lookup_failures() {
        let _g = fakes::lock();
        fakes::mount_fixture();
        assert_eq!(
            Process::load_path("/sbin", "absent").err(),
            Some(Error::NoEnt)
        );
    }
}
