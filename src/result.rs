// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// Kernel error numbers.  Every fallible operation reports one of
/// these; the first error encountered wins and is propagated to the
/// caller unchanged.
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
pub enum Error {
    /// Malformed argument or state: bad enum value, unparseable
    /// hex digit, operation on a closed file.
    Invalid,
    /// Path not present, or no mount covers a path.
    NoEnt,
    /// Major/minor not registered, out of range, or empty slot.
    NoDev,
    /// Operation absent from the driver's capability set.
    NotSup,
    /// Registry slot already holds a different driver.
    Busy,
    /// A backing pool is exhausted.
    NoMem,
    /// TTY input buffer full.
    NoBufs,
    /// Pathname longer than `PATH_MAX`.
    Overflow,
    /// Hardware self-test failed.
    Io,
    /// No data ready; call again later.
    TryAgain,
    /// readdir on something that is not a directory.
    NotDir,
    /// Too many arguments on a command line.
    TooBig,
    /// Bytes that should be text are not UTF-8.
    Utf8,
}

impl Error {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "Invalid argument",
            Self::NoEnt => "No such file or directory",
            Self::NoDev => "No such device",
            Self::NotSup => "Operation not supported",
            Self::Busy => "Device or resource busy",
            Self::NoMem => "Out of memory",
            Self::NoBufs => "No buffer space available",
            Self::Overflow => "Value too large for data type",
            Self::Io => "I/O error",
            Self::TryAgain => "Try again",
            Self::NotDir => "Not a directory",
            Self::TooBig => "Argument list too long",
            Self::Utf8 => "UTF-8 conversion error",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> core::result::Result<(), fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

pub type Result<T> = core::result::Result<T, Error>;
