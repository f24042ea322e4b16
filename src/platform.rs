// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The seams between the device and the kernel it runs inside.
//!
//! [`Platform`] bundles the capabilities the device consumes: the installed
//! memory size, the temporary per-page mapping window, per-page flags, and
//! the reverse-map walker. [`UserMem`] stands in for a caller-supplied buffer
//! on the far side of the privilege boundary.

use core::fmt;

use crate::address::VirtualAddress;
use crate::page::{PageFlags, PageIndex};

/// Outcome of one step of a reverse-map walk.
///
/// Returned by the per-mapping callback to steer the walker, and by the
/// walker itself as the final verdict of the whole walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    /// Keep going, visit further mappings.
    Again,
    /// Stop, the walk has everything it needs.
    Done,
    /// Stop, the walk cannot produce a usable result.
    Abort,
}

/// Process identifier as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(i32);

impl Pid {
    #[must_use]
    pub const fn new(pid: i32) -> Self {
        Self(pid)
    }

    #[inline]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One occurrence of a physical page inside some address space.
#[derive(Debug, Clone, Copy)]
pub struct MapSite {
    /// Where the page is mapped in the owning address space.
    pub virtual_address: VirtualAddress,
    /// `None` when the address space behind this mapping has already been
    /// torn down by the time the walker visits it.
    pub space: Option<SpaceInfo>,
}

/// The address space a [`MapSite`] belongs to.
#[derive(Debug, Clone, Copy)]
pub struct SpaceInfo {
    /// `None` while the owning task is exiting and can no longer be resolved.
    pub owner: Option<Pid>,
}

/// A privilege-boundary copy that could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault;

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("privilege-boundary copy fault")
    }
}

impl core::error::Error for Fault {}

/// Kernel capabilities the device is built on top of.
pub trait Platform {
    /// A temporary, byte-addressable view of exactly one physical page.
    ///
    /// Dropping the window releases the mapping; wrapping every page access
    /// in a window guarantees release on all exit paths, the transfer-fault
    /// path included.
    type Window<'a>: AsRef<[u8]>
    where
        Self: 'a;

    /// Total installed physical memory in bytes.
    ///
    /// Queried once at device construction and treated as immutable
    /// afterwards.
    fn dram_size(&self) -> u64;

    /// Maps `page` so its contents are byte-addressable until the returned
    /// window is dropped. Never fails for resident pages.
    ///
    /// An index outside the platform's physical-page table is a caller error
    /// with undefined downstream behavior; no additional validation happens
    /// here.
    fn map_page(&self, page: PageIndex) -> Self::Window<'_>;

    /// Current state flags of `page`, used for backing classification.
    fn page_flags(&self, page: PageIndex) -> PageFlags;

    /// Drives the platform's page-ownership walker over every current
    /// mapping of `page`, feeding each occurrence to `visit`.
    ///
    /// The walker keeps going while `visit` answers [`WalkControl::Again`]
    /// and stops on [`WalkControl::Done`] or [`WalkControl::Abort`]; the
    /// return value is the final verdict of the walk. The walker relies on
    /// its own internal locking only, so occurrences delivered early may be
    /// stale by the time the walk finishes.
    fn rmap_walk(
        &self,
        page: PageIndex,
        visit: &mut dyn FnMut(MapSite) -> WalkControl,
    ) -> WalkControl;
}

/// A caller-supplied buffer on the far side of the privilege boundary.
///
/// `readable`/`writable` are the cheap usability checks run during control
/// request validation; the copies themselves can still fault.
pub trait UserMem {
    /// Whether `len` bytes can plausibly be read from the buffer.
    fn readable(&self, len: usize) -> bool;

    /// Whether `len` bytes can plausibly be written to the buffer.
    fn writable(&self, len: usize) -> bool;

    /// Copies `dst.len()` bytes from the start of the buffer into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`Fault`] when the copy cannot complete.
    fn read(&mut self, dst: &mut [u8]) -> Result<(), Fault>;

    /// Copies `src` to the start of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Fault`] when the copy cannot complete.
    fn write(&mut self, src: &[u8]) -> Result<(), Fault>;
}
