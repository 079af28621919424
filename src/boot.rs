// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot information and kernel bring-up.
//!
//! The Multiboot2 bootloader leaves a tag stream in memory; the
//! kernel reads it once, keeps the handful of values it consumes
//! (the initrd module and the optional text framebuffer geometry),
//! and logs the rest for the curious.
//!
//! Bring-up is strictly ordered and synchronous: serial first so
//! there is a log sink, then the remaining drivers, then the initrd
//! mount, then the shell.

use crate::dev::{DevNum, FS_CPIO, MAJ_RAMDISK, MAJ_SERIAL};
use crate::logger::{self, log_result};
use crate::result::{Error, Result};
use crate::serial::{self, SerialFlags};
use crate::vfs::{self, Ioctl, mount};
use crate::{cpio, ramdisk, shell, tty};
use multiboot2::{BootInformation, BootInformationHeader, MemoryAreaType};

/// Text framebuffer geometry, when the bootloader set one up.
#[derive(Clone, Copy, Debug)]
pub struct FbInfo {
    pub addr: u64,
    pub pitch: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: u8,
}

/// What the kernel keeps from the bootloader handoff.
#[derive(Clone, Copy, Debug, Default)]
pub struct BootInfo {
    pub initrd: Option<&'static [u8]>,
    pub framebuffer: Option<FbInfo>,
}

fn mmap_typestr(t: MemoryAreaType) -> &'static str {
    match t {
        MemoryAreaType::Available => "AVAILABLE",
        MemoryAreaType::Reserved => "RESERVED",
        MemoryAreaType::AcpiAvailable => "ACPI_RECLAIMABLE",
        MemoryAreaType::ReservedHibernate => "NVS",
        MemoryAreaType::Defective => "BAD_RAM",
        MemoryAreaType::Custom(_) => "unknown",
    }
}

/// Walks the Multiboot2 tag stream, logging each tag and collecting
/// the values the kernel consumes.
///
/// # Safety
/// `mbi` must point at the boot information structure the bootloader
/// handed over, still intact.
pub unsafe fn read_boot_info(
    magic: u32,
    mbi: *const BootInformationHeader,
) -> BootInfo {
    let mut info = BootInfo::default();

    if magic != multiboot2::MAGIC {
        log::warn!("bad multiboot2 magic {:#x}", magic);
        return info;
    }
    let bi: BootInformation<'_> = match unsafe { BootInformation::load(mbi) } {
        Ok(bi) => bi,
        Err(_) => {
            log::warn!("multiboot2 boot information is unreadable");
            return info;
        }
    };

    log::info!("reading multiboot2 boot info...");
    if let Some(tag) = bi.command_line_tag() {
        if let Ok(cmdline) = tag.cmdline() {
            log::info!("tag: cmdline = \"{}\"", cmdline);
        }
    }
    if let Some(tag) = bi.boot_loader_name_tag() {
        if let Ok(name) = tag.name() {
            log::info!("tag: bootloader name = \"{}\"", name);
        }
    }
    if let Some(tag) = bi.basic_memory_info_tag() {
        log::info!(
            "tag: mem info: lower={}k, upper={}k",
            tag.memory_lower(),
            tag.memory_upper()
        );
    }
    if let Some(mmap) = bi.memory_map_tag() {
        log::info!("tag: memory map:");
        for area in mmap.memory_areas() {
            log::info!(
                "\tentry: {:#10x}: {:#10x} bytes {}",
                area.start_address(),
                area.size(),
                mmap_typestr(area.typ().into())
            );
        }
    }
    for module in bi.module_tags() {
        let start = module.start_address() as usize;
        let len = module.end_address() as usize - start;
        log::info!("tag: module at {:#x}, {:#x} bytes", start, len);
        if info.initrd.is_none() {
            // The first module is the initrd; identity addressing,
            // there is no paging to get in the way.
            info.initrd = Some(unsafe {
                core::slice::from_raw_parts(start as *const u8, len)
            });
        }
    }
    if let Some(Ok(fb)) = bi.framebuffer_tag() {
        let fbinfo = FbInfo {
            addr: fb.address(),
            pitch: fb.pitch(),
            width: fb.width(),
            height: fb.height(),
            bpp: fb.bpp(),
        };
        log::info!(
            "tag: framebuffer {}x{} bpp {} at {:#x}",
            fbinfo.width,
            fbinfo.height,
            fbinfo.bpp,
            fbinfo.addr
        );
        info.framebuffer = Some(fbinfo);
    }

    info
}

/// Opens the first serial port, attaches it as the log sink, and
/// turns on the newline fixes so logs render sanely in a terminal.
fn init_log() -> Result<()> {
    let mut serial1 = vfs::open_dev(DevNum::new(MAJ_SERIAL, 1))?;
    let flags = SerialFlags::ICRNL | SerialFlags::OCRNL;
    serial1.ioctl(Ioctl::SetFlags(flags.bits()))?;
    logger::init(serial1)?;
    log::info!("turned on serial newline fixes");
    Ok(())
}

/// Registers the initrd the bootloader loaded as a ramdisk and
/// mounts it as the root filesystem.
fn mount_initrd(bi: &BootInfo) -> Result<()> {
    let initrd = bi.initrd.ok_or(Error::NoDev)?;
    let minor = ramdisk::create(initrd, "initrd")?;
    mount::mountdev(DevNum::new(MAJ_RAMDISK, minor), FS_CPIO, "/")
}

/// The ordered bring-up: serial, log, boot info, drivers, root
/// mount, shell.
pub fn kernel_main(magic: u32, mbi: *const BootInformationHeader) -> Result<()> {
    serial::init()?;
    init_log()?;
    let boot_info = unsafe { read_boot_info(magic, mbi) };

    let _ = ramdisk::init();
    let _ = tty::init();
    let _ = cpio::init();

    let res = mount_initrd(&boot_info);
    log_result!(res, "mount initial ramdisk at /");

    shell::init_run()?;

    log::info!("nothing more to do; returning to bootloader to restart...");
    Ok(())
}
