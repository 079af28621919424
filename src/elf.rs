// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reads ELF executables out of the filesystem.
//!
//! Only the pieces the process loader needs: the validated header
//! and the program header table.  The heavy lifting of parsing is
//! left to the library; this module enforces what the kernel will
//! accept (32-bit little-endian i386 executables with a nonzero
//! entry point).

use crate::result::{Error, Result};
use crate::vfs::File;
use alloc::vec;
use alloc::vec::Vec;
use goblin::container::{Container, Ctx, Endian};
use goblin::elf::{self, Elf, ProgramHeader};

/// A parsed executable image.
pub struct Image {
    pub entry: u64,
    pub phdrs: Vec<ProgramHeader>,
}

/// Reads and parses the executable open in `f`.
pub fn read_image(f: &mut File) -> Result<Image> {
    let size = usize::try_from(f.stat().size).map_err(|_| Error::Invalid)?;
    let mut bytes = vec![0u8; size];
    let mut off = 0;
    while off < size {
        let n = f.pread(&mut bytes[off..], off as i64)?;
        if n == 0 {
            return Err(Error::Io);
        }
        off += n;
    }
    parse(&bytes)
}

fn parse(bytes: &[u8]) -> Result<Image> {
    let header = parse_header(bytes)?;
    let phdrs = parse_program_headers(bytes, header)?;
    Ok(Image { entry: header.e_entry, phdrs })
}

/// Parses and validates the ELF header.  Most structural checking
/// happens inside the parsing library; the rest is kernel policy.
fn parse_header(bytes: &[u8]) -> Result<elf::Header> {
    let header = Elf::parse_header(bytes).map_err(|_| Error::Invalid)?;
    if header.e_machine != elf::header::EM_386 {
        return Err(Error::NotSup);
    }
    let container = header.container().map_err(|_| Error::Invalid)?;
    if container != Container::Little {
        return Err(Error::NotSup);
    }
    let endian = header.endianness().map_err(|_| Error::Invalid)?;
    if endian != Endian::Little {
        return Err(Error::NotSup);
    }
    if header.e_type != elf::header::ET_EXEC {
        return Err(Error::NotSup);
    }
    if header.e_entry == 0 {
        return Err(Error::Invalid);
    }
    Ok(header)
}

/// Parses just the program header table.  Symbol and string tables
/// are of no use to the loader, so they are never touched.
fn parse_program_headers(
    bytes: &[u8],
    header: elf::Header,
) -> Result<Vec<ProgramHeader>> {
    let container = header.container().map_err(|_| Error::Invalid)?;
    let endian = header.endianness().map_err(|_| Error::Invalid)?;
    let ctx = Ctx::new(container, endian);
    ProgramHeader::parse(
        bytes,
        header.e_phoff as usize,
        header.e_phnum as usize,
        ctx,
    )
    .map_err(|_| Error::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes;
    use crate::vfs::mount;
    use goblin::elf::program_header::PT_LOAD;

    #[test]
    fn parses_the_fixture_executable() {
        let _g = fakes::lock();
        fakes::mount_fixture();
        let mut f = mount::open_path("/", "sbin/init").unwrap();
        let image = read_image(&mut f).unwrap();
        assert_eq!(image.entry, fakes::ELF_ENTRY);
        assert_eq!(image.phdrs.len(), 1);
        assert_eq!(image.phdrs[0].p_type, PT_LOAD);
    }

    #[test]
    fn rejects_files_that_are_not_elf() {
        let _g = fakes::lock();
        fakes::mount_fixture();
        let mut f = mount::open_path("/", "bin/hello").unwrap();
        assert!(read_image(&mut f).is_err());
    }
}
