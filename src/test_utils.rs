// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Mock platform pieces for exercising the device without a kernel
//! underneath.

use core::cell::Cell;
use std::collections::BTreeMap;
use std::vec::Vec;

use crate::page::{PageFlags, PageIndex};
use crate::platform::{Fault, MapSite, Platform, UserMem, WalkControl};

/// In-memory [`Platform`] with scriptable page flags and reverse mappings.
pub struct MockPlatform {
    page_size: usize,
    mem: Vec<u8>,
    flags: BTreeMap<usize, PageFlags>,
    sites: BTreeMap<usize, Vec<MapSite>>,
    ignore_stop: bool,
    active_windows: Cell<usize>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(pages: usize, page_size: usize) -> Self {
        assert!(page_size.is_power_of_two());
        Self {
            page_size,
            mem: vec![0; pages * page_size],
            flags: BTreeMap::new(),
            sites: BTreeMap::new(),
            ignore_stop: false,
            active_windows: Cell::new(0),
        }
    }

    /// The backing bytes, for seeding test patterns.
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.mem
    }

    pub fn set_flags(&mut self, page: PageIndex, flags: PageFlags) {
        self.flags.insert(page.get(), flags);
    }

    /// Registers one more reverse mapping of `page`, delivered to walks in
    /// insertion order.
    pub fn add_site(&mut self, page: PageIndex, site: MapSite) {
        self.sites.entry(page.get()).or_default().push(site);
    }

    /// When set, the walker keeps delivering sites after the callback
    /// answered [`WalkControl::Done`], like a walker racing page teardown.
    /// Lets tests reach the capacity-rejection path.
    pub fn set_ignore_stop(&mut self, ignore: bool) {
        self.ignore_stop = ignore;
    }

    /// Number of mapping windows currently outstanding. Zero between calls
    /// proves every acquire was paired with a release.
    #[must_use]
    pub fn active_windows(&self) -> usize {
        self.active_windows.get()
    }
}

/// Window over one mocked page; bumps the platform's outstanding-window
/// count for its lifetime.
pub struct MockWindow<'a> {
    bytes: &'a [u8],
    active: &'a Cell<usize>,
}

impl AsRef<[u8]> for MockWindow<'_> {
    fn as_ref(&self) -> &[u8] {
        self.bytes
    }
}

impl Drop for MockWindow<'_> {
    fn drop(&mut self) {
        self.active.set(self.active.get() - 1);
    }
}

impl Platform for MockPlatform {
    type Window<'a>
        = MockWindow<'a>
    where
        Self: 'a;

    fn dram_size(&self) -> u64 {
        self.mem.len() as u64
    }

    fn map_page(&self, page: PageIndex) -> MockWindow<'_> {
        let start = page.get() * self.page_size;
        self.active_windows.set(self.active_windows.get() + 1);
        MockWindow {
            bytes: &self.mem[start..start + self.page_size],
            active: &self.active_windows,
        }
    }

    fn page_flags(&self, page: PageIndex) -> PageFlags {
        self.flags
            .get(&page.get())
            .copied()
            .unwrap_or(PageFlags::empty())
    }

    fn rmap_walk(
        &self,
        page: PageIndex,
        visit: &mut dyn FnMut(MapSite) -> WalkControl,
    ) -> WalkControl {
        let Some(sites) = self.sites.get(&page.get()) else {
            // no current mappings, the walk terminates naturally
            return WalkControl::Again;
        };

        let mut last = WalkControl::Again;
        for site in sites {
            match visit(*site) {
                WalkControl::Again => last = WalkControl::Again,
                WalkControl::Done => {
                    if !self.ignore_stop {
                        return WalkControl::Done;
                    }
                    last = WalkControl::Done;
                }
                WalkControl::Abort => return WalkControl::Abort,
            }
        }
        last
    }
}

/// Caller-side buffer backed by a `Vec`, with switches to model an unusable
/// or faulting user mapping.
pub struct UserSlice {
    data: Vec<u8>,
    readable: bool,
    writable: bool,
    fault_on_access: bool,
}

impl UserSlice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0; len],
            readable: true,
            writable: true,
            fault_on_access: false,
        }
    }

    /// Marks the buffer as failing the pre-dispatch writability check.
    #[must_use]
    pub fn deny_write(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Marks the buffer as failing the pre-dispatch readability check.
    #[must_use]
    pub fn deny_read(mut self) -> Self {
        self.readable = false;
        self
    }

    /// Makes every actual copy fault, while the usability checks still pass.
    #[must_use]
    pub fn fail_access(mut self) -> Self {
        self.fault_on_access = true;
        self
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Seeds the start of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `src` is longer than the buffer.
    pub fn set_bytes(&mut self, src: &[u8]) {
        self.data[..src.len()].copy_from_slice(src);
    }
}

impl UserMem for UserSlice {
    fn readable(&self, len: usize) -> bool {
        self.readable && len <= self.data.len()
    }

    fn writable(&self, len: usize) -> bool {
        self.writable && len <= self.data.len()
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<(), Fault> {
        if self.fault_on_access || dst.len() > self.data.len() {
            return Err(Fault);
        }
        dst.copy_from_slice(&self.data[..dst.len()]);
        Ok(())
    }

    fn write(&mut self, src: &[u8]) -> Result<(), Fault> {
        if self.fault_on_access || src.len() > self.data.len() {
            return Err(Fault);
        }
        self.data[..src.len()].copy_from_slice(src);
        Ok(())
    }
}
