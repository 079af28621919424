// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The in-kernel shell.
//!
//! A thin consumer of the VFS: a prompt on a TTY, a fixed table of
//! built-in commands, and a search through `/sbin` and `/bin` for
//! anything else.  The TTY is non-blocking, so the read loop treats
//! try-again as "poll once more".

use crate::process::Process;
use crate::result::{Error, Result};
use crate::tty::{self, CTRL_D, TtyFlags};
use crate::vfs::mount;
use crate::vfs::{self, DirType, Ioctl};
use crate::{fprint, fprintln};
use alloc::string::String;
use static_assertions::const_assert;

const SH_PREFIX: &str = "kshell: ";
const LINEBUFSZ: usize = 256;
const ARGVSZ: usize = 16;
const BIN_PATHS: [&str; 2] = ["/sbin", "/bin"];

// One cooked TTY line always fits in the line buffer.
const_assert!(LINEBUFSZ >= tty::IBUFSZ);

type CmdFn = fn(&mut Kshell, &[&str]) -> Result<()>;

const COMMANDS: &[(&str, CmdFn)] = &[
    ("help", cmd_help),
    ("inputtest", cmd_inputtest),
    ("mount", cmd_mount),
    ("pwd", cmd_pwd),
    ("ls", cmd_ls),
    ("stat", cmd_stat),
    ("xhead", cmd_xhead),
    ("reset", cmd_reset),
];

pub struct Kshell {
    tty: vfs::File,
    cwd: String,
    waiting_for_input: bool,
}

enum Step {
    Continue,
    Eof,
}

/// Splits a command line into at most `argv.len()` whitespace
/// separated words.  Returns the argument count.
fn break_cmdline<'a>(line: &'a str, argv: &mut [&'a str]) -> Result<usize> {
    let mut argc = 0;
    for word in line.split_ascii_whitespace() {
        if argc == argv.len() {
            return Err(Error::TooBig);
        }
        argv[argc] = word;
        argc += 1;
    }
    Ok(argc)
}

fn ftype_marker(kind: DirType) -> &'static str {
    match kind {
        DirType::Chr => "*",
        DirType::Dir => "/",
        DirType::Reg => "",
        DirType::Unknown => "?",
    }
}

impl Kshell {
    /// Wraps a TTY file in a shell: cooked echoing mode, a banner,
    /// and a root working directory.
    pub fn new(mut tty: vfs::File) -> Result<Kshell> {
        let desc = tty.debugstr();
        fprintln!(
            tty,
            concat!(
                env!("CARGO_PKG_NAME"),
                " ",
                env!("CARGO_PKG_VERSION"),
                " kshell {}"
            ),
            desc
        )?;
        let flags = TtyFlags::ECHO | TtyFlags::COOKED;
        tty.ioctl(Ioctl::SetFlags(flags.bits()))?;
        Ok(Kshell { tty, cwd: String::from("/"), waiting_for_input: false })
    }

    fn report(&mut self, res: Result<()>, what: &str) {
        if let Err(e) = res {
            let _ =
                fprintln!(self.tty, "{}[{:?}] {} failed", SH_PREFIX, e, what);
        }
    }

    fn print_cmds(&mut self) -> Result<()> {
        fprint!(self.tty, "{}built-in commands:", SH_PREFIX)?;
        for (i, (name, _)) in COMMANDS.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            fprint!(self.tty, "{}{}", sep, name)?;
        }
        fprintln!(self.tty)?;
        Ok(())
    }

    fn search_bin(&mut self, execname: &str) -> Option<&'static str> {
        for binpath in BIN_PATHS {
            match mount::stat(binpath, execname) {
                Ok(st) if st.kind == DirType::Reg => return Some(binpath),
                Ok(_) | Err(Error::NoEnt) => continue,
                Err(e) => {
                    self.report(Err(e), execname);
                    return None;
                }
            }
        }
        None
    }

    fn run_program(&mut self, bindir: &'static str, args: &[&str]) -> Result<()> {
        let mut process = Process::load_path(bindir, args[0])?;
        process.start(args)?;
        Ok(())
    }

    fn read_exec(&mut self) -> Result<Step> {
        if !self.waiting_for_input {
            fprint!(self.tty, "> ")?;
            self.waiting_for_input = true;
        }

        let mut linebuf = [0u8; LINEBUFSZ];
        let line = self.tty.read_str(&mut linebuf)?;
        if line.is_empty() {
            return Ok(Step::Eof);
        }
        self.waiting_for_input = false;

        let mut argv = [""; ARGVSZ];
        let argc = break_cmdline(line, &mut argv)?;
        if argc == 0 {
            return Ok(Step::Continue);
        }
        let args = &argv[..argc];

        if let Some(&(_, cmd)) =
            COMMANDS.iter().find(|(name, _)| *name == args[0])
        {
            let res = cmd(self, args);
            self.report(res, args[0]);
            return Ok(Step::Continue);
        }

        if let Some(bindir) = self.search_bin(args[0]) {
            let res = self.run_program(bindir, args);
            self.report(res, args[0]);
            return Ok(Step::Continue);
        }

        fprintln!(
            self.tty,
            "{}unknown command or program: {}",
            SH_PREFIX,
            args[0]
        )?;
        self.print_cmds()?;
        Ok(Step::Continue)
    }

    /// Prompt-read-execute until end of input.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.read_exec() {
                Ok(Step::Continue) => continue,
                Ok(Step::Eof) => return Ok(()),
                Err(Error::TryAgain) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn cmd_help(sh: &mut Kshell, _args: &[&str]) -> Result<()> {
    sh.print_cmds()
}

fn cmd_pwd(sh: &mut Kshell, _args: &[&str]) -> Result<()> {
    fprintln!(sh.tty, "{}", sh.cwd)?;
    Ok(())
}

fn cmd_mount(sh: &mut Kshell, _args: &[&str]) -> Result<()> {
    let mounts = mount::mounts();
    let width =
        mounts.iter().map(|sb| sb.mountpath.len()).max().unwrap_or(0);
    for sb in &mounts {
        fprintln!(
            sh.tty,
            "{:width$} = {} (type {})",
            sb.mountpath,
            sb.name,
            sb.fsname(),
            width = width
        )?;
    }
    Ok(())
}

fn cmd_ls(sh: &mut Kshell, args: &[&str]) -> Result<()> {
    let path = if args.len() >= 2 { args[1] } else { "" };
    let mut dir = mount::open_path(&sh.cwd, path)?;
    while let Some(de) = dir.readdir()? {
        fprintln!(sh.tty, "{}{}", de.name, ftype_marker(de.kind))?;
    }
    Ok(())
}

fn cmd_stat(sh: &mut Kshell, args: &[&str]) -> Result<()> {
    if args.len() < 2 {
        fprintln!(sh.tty, "usage: {} FILE", args[0])?;
        return Ok(());
    }
    let st = mount::stat(&sh.cwd, args[1])?;
    fprintln!(sh.tty, "  File: {}", args[1])?;
    fprintln!(sh.tty, "  Size: {}", st.size)?;
    fprintln!(sh.tty, " Inode: {}", st.ino)?;
    Ok(())
}

fn cmd_xhead(sh: &mut Kshell, args: &[&str]) -> Result<()> {
    const ROWBYTES: usize = 16;
    const ROWS: usize = 10;

    if args.len() < 2 {
        fprintln!(sh.tty, "usage: {} FILE", args[0])?;
        return Ok(());
    }
    let mut f = mount::open_path(&sh.cwd, args[1])?;
    let mut off = 0;
    for _ in 0..ROWS {
        let mut row = [0u8; ROWBYTES];
        let n = f.read(&mut row)?;
        if n == 0 {
            break;
        }
        fprint!(sh.tty, "{:08x}:", off)?;
        off += n;
        for (j, &b) in row.iter().enumerate() {
            if j % 2 == 0 {
                fprint!(sh.tty, " ")?;
            }
            if j < n {
                fprint!(sh.tty, "{:02x}", b)?;
            } else {
                fprint!(sh.tty, "  ")?;
            }
        }
        fprint!(sh.tty, "  ")?;
        for (j, &b) in row.iter().enumerate() {
            let c = if j < n && (0x20..0x7f).contains(&b) {
                b as char
            } else {
                '.'
            };
            fprint!(sh.tty, "{}", c)?;
        }
        fprintln!(sh.tty)?;
    }
    Ok(())
}

/// Clear the screen and restore the default color with ANSI escape
/// sequences.
fn cmd_reset(sh: &mut Kshell, _args: &[&str]) -> Result<()> {
    const GREY_ON_BLACK: u8 = 0x07;
    fprint!(sh.tty, "\x1b[38;5;{}m", GREY_ON_BLACK)?;
    fprint!(sh.tty, "\x1b[2J")?;
    Ok(())
}

/// Switches the TTY into raw echo-control mode and sinks bytes until
/// `^D`, so keyboard handling can be eyeballed end to end.
fn cmd_inputtest(sh: &mut Kshell, _args: &[&str]) -> Result<()> {
    let saved = sh.tty.ioctl(Ioctl::GetFlags)?;
    let testflags = (saved & !TtyFlags::COOKED.bits())
        | (TtyFlags::ECHO | TtyFlags::ECHOCTL).bits();
    sh.tty.ioctl(Ioctl::SetFlags(testflags))?;

    let desc = sh.tty.debugstr();
    fprintln!(sh.tty, "Reading from {}. Press CTRL-D to stop.", desc)?;
    let res = loop {
        let mut ch = [0u8; 1];
        match sh.tty.read(&mut ch) {
            Err(Error::TryAgain) => continue,
            Err(e) => break Err(e),
            Ok(0) => break Ok(()),
            Ok(_) if ch[0] == CTRL_D => break Ok(()),
            Ok(_) => continue,
        }
    };
    fprintln!(sh.tty)?;

    sh.tty.ioctl(Ioctl::SetFlags(saved))?;
    res
}

/// Opens the user TTY and runs the shell on it until end of input.
pub fn init_run() -> Result<()> {
    let tty1 =
        vfs::open_dev(crate::dev::DevNum::new(crate::dev::MAJ_TTY, 1))?;
    let mut sh = Kshell::new(tty1)?;
    sh.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::{DevNum, MAJ_TTY};
    use crate::fakes;

    fn spawn_shell() -> Kshell {
        fakes::mount_fixture();
        let tty = vfs::open_dev(DevNum::new(MAJ_TTY, 1)).unwrap();
        Kshell::new(tty).unwrap()
    }

    /// Types a line at the shell and returns everything it wrote to
    /// the port (echo included).
    fn interact(sh: &mut Kshell, line: &[u8]) -> String {
        fakes::take_tx(1);
        fakes::push_rx(1, line);
        loop {
            match sh.read_exec() {
                Ok(_) => break,
                Err(Error::TryAgain) => continue,
                Err(e) => panic!("read_exec: {e:?}"),
            }
        }
        String::from_utf8(fakes::take_tx(1)).unwrap()
    }

    #[test]
    fn break_cmdline_bounds_argv() {
        let mut argv = [""; 4];
        assert_eq!(break_cmdline("ls  /bin \n", &mut argv), Ok(2));
        assert_eq!(&argv[..2], ["ls", "/bin"]);
        assert_eq!(break_cmdline("a b c d e", &mut argv), Err(Error::TooBig));
    }

    #[test]
    fn pwd_prints_the_working_directory() {
        let _g = fakes::lock();
        let mut sh = spawn_shell();
        let out = interact(&mut sh, b"pwd\n");
        assert!(out.contains("> "));
        assert!(out.contains("\n/\n"));
    }

    #[test]
    fn ls_lists_the_root_with_type_markers() {
        let _g = fakes::lock();
        let mut sh = spawn_shell();
        let out = interact(&mut sh, b"ls\n");
        assert!(out.contains("bin/\n"));
        assert!(out.contains("sbin/\n"));
        assert!(out.contains("etc/\n"));
    }

    #[test]
    fn stat_reports_size_and_inode() {
        let _g = fakes::lock();
        let mut sh = spawn_shell();
        let out = interact(&mut sh, b"stat /bin/hello\n");
        assert!(out.contains("  File: /bin/hello"));
        assert!(out
            .contains(&alloc::format!("  Size: {}", fakes::HELLO_TEXT.len())));
        assert!(out.contains(" Inode: "));
    }

    #[test]
    fn xhead_dumps_the_first_rows() {
        let _g = fakes::lock();
        let mut sh = spawn_shell();
        let out = interact(&mut sh, b"xhead /bin/hello\n");
        assert!(out.contains("00000000:"));
        assert!(out.contains("00000010:"));
        // "Hell" in hex, two byte pairs.
        assert!(out.contains("4865 6c6c"));
        assert!(out.contains("Hello"));
    }

    #[test]
    fn mount_lists_the_mount_table() {
        let _g = fakes::lock();
        let mut sh = spawn_shell();
        let out = interact(&mut sh, b"mount\n");
        assert!(out.contains("(type cpiofs)"));
        assert!(out.contains("ramdisk{initrd"));
    }

    #[test]
    fn unknown_command_suggests_builtins() {
        let _g = fakes::lock();
        let mut sh = spawn_shell();
        let out = interact(&mut sh, b"frobnicate\n");
        assert!(out.contains("unknown command or program: frobnicate"));
        assert!(out.contains("built-in commands:"));
        assert!(out.contains("xhead"));
    }

    #[test]
    fn programs_resolve_in_sbin_but_cannot_start_yet() {
        let _g = fakes::lock();
        let mut sh = spawn_shell();
        let out = interact(&mut sh, b"init\n");
        assert!(out.contains("[Operation not supported] init failed"));
    }

    #[test]
    fn eof_ends_the_shell() {
        let _g = fakes::lock();
        let mut sh = spawn_shell();
        fakes::push_rx(1, &[CTRL_D]);
        loop {
            match sh.read_exec() {
                Ok(Step::Eof) => break,
                Ok(Step::Continue) => panic!("expected EOF"),
                Err(Error::TryAgain) => continue,
                Err(e) => panic!("read_exec: {e:?}"),
            }
        }
    }
}
