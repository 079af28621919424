// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test doubles and fixtures.
//!
//! Hosted tests cannot touch I/O ports, so the port accessors in
//! `cpu` land here instead: each serial unit gets a simulated 16550
//! register file with a loopback latch, an RX queue tests can feed,
//! and a TX capture tests can drain.  The module also builds newc
//! archives in memory and owns the shared mounted-initrd fixture.
//!
//! Everything global in the kernel is process-wide, so tests that
//! reach shared state serialize on [`lock`].

use crate::dev::{DevNum, FS_CPIO, MAJ_RAMDISK};
use crate::vfs::mount;
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::vec::Vec;
use spin::{Mutex, Once};

/* Simulated serial hardware. */

const BASES: [u16; 2] = [0x3f8, 0x2f8];
const MC_LOOP: u8 = 1 << 4;

struct FakeUart {
    mcr: u8,
    /// Byte parked in the loopback path.
    loopback: Option<u8>,
    /// When set, the loopback path corrupts the byte, so the serial
    /// self-test sees broken hardware.
    broken: bool,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl FakeUart {
    const fn new() -> FakeUart {
        FakeUart {
            mcr: 0,
            loopback: None,
            broken: false,
            rx: VecDeque::new(),
            tx: Vec::new(),
        }
    }

    fn looped(&self) -> bool {
        self.mcr & MC_LOOP != 0
    }
}

static UARTS: Mutex<[FakeUart; 2]> =
    Mutex::new([const { FakeUart::new() }; 2]);

fn decode(port: u16) -> (usize, u16) {
    for (i, base) in BASES.iter().enumerate() {
        if (*base..*base + 8).contains(&port) {
            return (i, port - base);
        }
    }
    panic!("access to unmodeled port {port:#x}");
}

pub fn inb(port: u16) -> u8 {
    let (unit, off) = decode(port);
    let mut uarts = UARTS.lock();
    let u = &mut uarts[unit];
    match off {
        // Receive buffer.
        0 => {
            if u.looped() {
                let b = u.loopback.take().unwrap_or(0);
                if u.broken { !b } else { b }
            } else {
                u.rx.pop_front().unwrap_or(0)
            }
        }
        // Line status: data-ready plus transmit-holding-empty; the
        // fake transmitter is always ready.
        5 => {
            let ready = if u.looped() {
                u.loopback.is_some()
            } else {
                !u.rx.is_empty()
            };
            (ready as u8) | (1 << 5)
        }
        _ => 0,
    }
}

pub fn outb(port: u16, b: u8) {
    let (unit, off) = decode(port);
    let mut uarts = UARTS.lock();
    let u = &mut uarts[unit];
    match off {
        0 => {
            if u.looped() {
                u.loopback = Some(b);
            } else {
                u.tx.push(b);
            }
        }
        4 => u.mcr = b,
        _ => {}
    }
}

/// Queues bytes for the unit with the given minor to "receive".
pub fn push_rx(minor: usize, bytes: &[u8]) {
    let mut uarts = UARTS.lock();
    uarts[minor - 1].rx.extend(bytes.iter().copied());
}

/// Drains and returns everything the unit has transmitted so far.
pub fn take_tx(minor: usize) -> Vec<u8> {
    let mut uarts = UARTS.lock();
    core::mem::take(&mut uarts[minor - 1].tx)
}

pub fn set_broken_loopback(minor: usize, broken: bool) {
    let mut uarts = UARTS.lock();
    uarts[minor - 1].broken = broken;
}

/* Shared-state serialization. */

/// All kernel state is process-wide; tests touching it hold this.
pub fn lock() -> spin::MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock()
}

/* newc archive construction. */

const DIR_MODE: u32 = 0o040755;
const REG_MODE: u32 = 0o100644;

fn hex8(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(format!("{:08X}", v).as_bytes());
}

fn pad4(out: &mut Vec<u8>, from: usize) {
    let pad = (4 - from % 4) % 4;
    out.extend_from_slice(&[0u8; 3][..pad]);
}

fn push_newc(out: &mut Vec<u8>, ino: u64, mode: u32, name: &str, data: &[u8]) {
    let namesize = name.len() + 1;
    out.extend_from_slice(b"070701");
    hex8(out, ino); // c_ino
    hex8(out, mode as u64); // c_mode
    hex8(out, 0); // c_uid
    hex8(out, 0); // c_gid
    hex8(out, 1); // c_nlink
    hex8(out, 0); // c_mtime
    hex8(out, data.len() as u64); // c_filesize
    hex8(out, 0); // c_devmajor
    hex8(out, 0); // c_devminor
    hex8(out, 0); // c_rdevmajor
    hex8(out, 0); // c_rdevminor
    hex8(out, namesize as u64); // c_namesize
    hex8(out, 0); // c_check
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    pad4(out, 110 + namesize);
    out.extend_from_slice(data);
    pad4(out, data.len());
}

/// Builds newc archives byte-for-byte as the standard tooling does.
pub struct ArchiveBuilder {
    data: Vec<u8>,
    next_ino: u64,
}

impl ArchiveBuilder {
    pub fn new() -> ArchiveBuilder {
        ArchiveBuilder { data: Vec::new(), next_ino: 1 }
    }

    pub fn entry(mut self, name: &str, mode: u32, data: &[u8]) -> Self {
        let ino = self.next_ino;
        self.next_ino += 1;
        push_newc(&mut self.data, ino, mode, name, data);
        self
    }

    pub fn dir(self, name: &str) -> Self {
        self.entry(name, DIR_MODE, b"")
    }

    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, REG_MODE, data)
    }

    pub fn finish(mut self) -> Vec<u8> {
        push_newc(&mut self.data, 0, 0, "TRAILER!!!", b"");
        self.data
    }

    pub fn finish_static(self) -> &'static [u8] {
        Box::leak(self.finish().into_boxed_slice())
    }
}

/* The shared mounted-initrd fixture. */

pub const HELLO_TEXT: &[u8] =
    b"Hello from the initrd!\nSecond line of greeting data.\n";

pub const ELF_ENTRY: u64 = 0x0804_8000;

fn push16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// A minimal but valid ELF32 i386 executable: the header plus one
/// PT_LOAD program header and nothing else.
fn elf_image() -> Vec<u8> {
    const LEN: u32 = 52 + 32;
    let mut v = Vec::new();
    v.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    v.extend_from_slice(&[0u8; 8]);
    push16(&mut v, 2); // e_type = ET_EXEC
    push16(&mut v, 3); // e_machine = EM_386
    push32(&mut v, 1); // e_version
    push32(&mut v, ELF_ENTRY as u32);
    push32(&mut v, 52); // e_phoff
    push32(&mut v, 0); // e_shoff
    push32(&mut v, 0); // e_flags
    push16(&mut v, 52); // e_ehsize
    push16(&mut v, 32); // e_phentsize
    push16(&mut v, 1); // e_phnum
    push16(&mut v, 40); // e_shentsize
    push16(&mut v, 0); // e_shnum
    push16(&mut v, 0); // e_shstrndx
    push32(&mut v, 1); // p_type = PT_LOAD
    push32(&mut v, 0); // p_offset
    push32(&mut v, ELF_ENTRY as u32); // p_vaddr
    push32(&mut v, ELF_ENTRY as u32); // p_paddr
    push32(&mut v, LEN); // p_filesz
    push32(&mut v, LEN); // p_memsz
    push32(&mut v, 5); // p_flags = R+X
    push32(&mut v, 0x1000); // p_align
    v
}

static FIXTURE: Once<DevNum> = Once::new();

/// Registers the drivers and mounts the sample initrd at `/`.  Safe
/// to call from every test; the work happens once.
pub fn mount_fixture() {
    FIXTURE.call_once(|| {
        crate::serial::init().unwrap();
        crate::ramdisk::init().unwrap();
        crate::tty::init().unwrap();
        crate::cpio::init().unwrap();

        let archive = ArchiveBuilder::new()
            .dir(".")
            .dir("bin")
            .file("bin/hello", HELLO_TEXT)
            .dir("sbin")
            .file("sbin/init", &elf_image())
            .dir("etc")
            .file("etc/motd", b"welcome to nanix\n")
            .finish_static();
        let minor = crate::ramdisk::create(archive, "initrd").unwrap();
        let bdev = DevNum::new(MAJ_RAMDISK, minor);
        mount::mountdev(bdev, FS_CPIO, "/").unwrap();
        bdev
    });
}

/// Device number of the fixture's backing ramdisk.
pub fn fixture_bdev() -> DevNum {
    mount_fixture();
    *FIXTURE.get().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_uart_round_trips_loopback() {
        let _g = lock();
        outb(0x3f8 + 4, MC_LOOP);
        outb(0x3f8, 0x5a);
        assert_eq!(inb(0x3f8 + 5) & 1, 1);
        assert_eq!(inb(0x3f8), 0x5a);
        assert_eq!(inb(0x3f8 + 5) & 1, 0);
        outb(0x3f8 + 4, 0);
    }

    #[test]
    fn archive_entries_are_aligned() {
        let bytes = ArchiveBuilder::new()
            .dir(".")
            .file("odd", b"xyzzy")
            .finish();
        // Every header starts on a 4-byte boundary and announces
        // itself with the newc magic.
        let mut at = 0;
        let mut headers = 0;
        while at < bytes.len() {
            assert_eq!(at % 4, 0);
            assert_eq!(&bytes[at..at + 6], b"070701");
            let hex = |lo: usize| -> usize {
                usize::from_str_radix(
                    core::str::from_utf8(&bytes[at + lo..at + lo + 8])
                        .unwrap(),
                    16,
                )
                .unwrap()
            };
            let fsize = hex(6 + 6 * 8);
            let nsize = hex(6 + 11 * 8);
            headers += 1;
            at += (110 + nsize + 3) & !3;
            at += (fsize + 3) & !3;
        }
        assert_eq!(headers, 3);
    }
}
