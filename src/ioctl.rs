// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Control-request encoding and validation.
//!
//! Requests are a packed `u32`, ioctl-style: operation number in bits 0..8,
//! magic in bits 8..16, argument size in bits 16..30 and transfer direction
//! in bits 30..32. [`DIR_READ`] means the device writes the caller's buffer,
//! [`DIR_WRITE`] means the device reads from it.

use crate::platform::UserMem;
use crate::rmap::RmapReport;
use crate::{Error, Result, ensure};

const NR_SHIFT: u32 = 0;
const MAGIC_SHIFT: u32 = 8;
const SIZE_SHIFT: u32 = 16;
const DIR_SHIFT: u32 = 30;

const NR_MASK: u32 = 0xff;
const MAGIC_MASK: u32 = 0xff;
const SIZE_MASK: u32 = 0x3fff;
const DIR_MASK: u32 = 0x3;

/// The device writes the caller's buffer.
pub const DIR_READ: u32 = 2;
/// The device reads from the caller's buffer.
pub const DIR_WRITE: u32 = 1;

/// Magic tag every request against this device must carry.
pub const MAGIC: u32 = b'w' as u32;

/// Highest operation number the device understands.
pub const NR_MAX: u32 = 2;

/// Packs a control request.
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    reason = "argument sizes fit the 14-bit size field"
)]
pub const fn request(dir: u32, nr: u32, size: usize) -> u32 {
    (dir << DIR_SHIFT) | (MAGIC << MAGIC_SHIFT) | ((size as u32) << SIZE_SHIFT) | (nr << NR_SHIFT)
}

/// Report the total installed memory size as a `u64`.
pub const REPORT_SIZE: u32 = request(DIR_READ, 1, size_of::<u64>());

/// Reverse-map query: the caller supplies a physical address, the device
/// answers with an encoded [`RmapReport`].
pub const REVERSE_MAP: u32 = request(DIR_READ | DIR_WRITE, 2, RmapReport::ENCODED_SIZE);

#[must_use]
pub const fn nr(cmd: u32) -> u32 {
    (cmd >> NR_SHIFT) & NR_MASK
}

#[must_use]
pub const fn magic(cmd: u32) -> u32 {
    (cmd >> MAGIC_SHIFT) & MAGIC_MASK
}

#[must_use]
pub const fn size(cmd: u32) -> usize {
    ((cmd >> SIZE_SHIFT) & SIZE_MASK) as usize
}

#[must_use]
pub const fn dir(cmd: u32) -> u32 {
    (cmd >> DIR_SHIFT) & DIR_MASK
}

/// Validates a request before dispatch: magic, then operation number range,
/// then usability of the argument buffer in each required direction. Any
/// failure is an invalid-argument condition with no side effect.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when validation fails.
pub fn validate(cmd: u32, arg: &dyn UserMem) -> Result<()> {
    ensure!(
        magic(cmd) == MAGIC,
        Error::InvalidArgument,
        "control request with wrong magic"
    );
    ensure!(
        nr(cmd) <= NR_MAX,
        Error::InvalidArgument,
        "control request number out of range"
    );

    let size = size(cmd);
    if dir(cmd) & DIR_READ != 0 {
        ensure!(
            arg.writable(size),
            Error::InvalidArgument,
            "control argument not writable"
        );
    }
    if dir(cmd) & DIR_WRITE != 0 {
        ensure!(
            arg.readable(size),
            Error::InvalidArgument,
            "control argument not readable"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::UserSlice;

    #[test]
    fn fields_roundtrip() {
        let cmd = request(DIR_READ | DIR_WRITE, 2, 1200);
        assert_eq!(dir(cmd), DIR_READ | DIR_WRITE);
        assert_eq!(magic(cmd), MAGIC);
        assert_eq!(size(cmd), 1200);
        assert_eq!(nr(cmd), 2);
    }

    #[test]
    fn op_constants() {
        assert_eq!(nr(REPORT_SIZE), 1);
        assert_eq!(dir(REPORT_SIZE), DIR_READ);
        assert_eq!(size(REPORT_SIZE), 8);

        assert_eq!(nr(REVERSE_MAP), 2);
        assert_eq!(dir(REVERSE_MAP), DIR_READ | DIR_WRITE);
        assert_eq!(size(REVERSE_MAP), RmapReport::ENCODED_SIZE);

        assert!(nr(REPORT_SIZE) <= NR_MAX);
        assert!(nr(REVERSE_MAP) <= NR_MAX);
    }

    #[test_log::test]
    fn validation_order() {
        let arg = UserSlice::new(8);

        // wrong magic
        let bad_magic = REPORT_SIZE & !(MAGIC_MASK << MAGIC_SHIFT);
        assert_eq!(validate(bad_magic, &arg), Err(Error::InvalidArgument));

        // out-of-range operation number
        let bad_nr = request(DIR_READ, NR_MAX + 1, 8);
        assert_eq!(validate(bad_nr, &arg), Err(Error::InvalidArgument));

        assert_eq!(validate(REPORT_SIZE, &arg), Ok(()));
    }

    #[test]
    fn direction_checks() {
        let sealed = UserSlice::new(8).deny_write();
        assert_eq!(validate(REPORT_SIZE, &sealed), Err(Error::InvalidArgument));

        let blind = UserSlice::new(RmapReport::ENCODED_SIZE).deny_read();
        assert_eq!(validate(REVERSE_MAP, &blind), Err(Error::InvalidArgument));

        // too small to receive the report
        let cramped = UserSlice::new(16);
        assert_eq!(validate(REVERSE_MAP, &cramped), Err(Error::InvalidArgument));
    }
}
