// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The device surface: all of physical memory as one read-only byte stream,
//! plus the control-request boundary.

use core::cmp;

use crate::address::PhysicalAddress;
use crate::ioctl;
use crate::page::{PageLayout, classify};
use crate::platform::{Platform, UserMem};
use crate::rmap::{RmapReport, collect_owners};
use crate::{Error, Result, bail, ensure};

/// Origin for [`DramFile::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute stream position.
    Set,
    /// Relative to the current cursor.
    Cur,
    /// Relative to the end of installed memory.
    End,
}

/// The physical-memory inspection device.
///
/// Installed memory is presented as a single byte stream of length
/// `dram_size`; the size is snapshotted from the platform once at
/// construction and immutable for the lifetime of the device.
pub struct DramDevice<P: Platform> {
    platform: P,
    layout: PageLayout,
    dram_size: u64,
}

impl<P: Platform> DramDevice<P> {
    pub fn new(platform: P, layout: PageLayout) -> Self {
        let dram_size = platform.dram_size();
        log::info!("ramtop={dram_size:#010x} ({} MB)", dram_size >> 20);
        Self {
            platform,
            layout,
            dram_size,
        }
    }

    /// Total installed physical memory in bytes.
    #[inline]
    pub fn dram_size(&self) -> u64 {
        self.dram_size
    }

    #[inline]
    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    /// Opens a handle with its own cursor, positioned at the start of the
    /// stream. Read-only; no privilege beyond holding the handle is modeled.
    pub fn open(&self) -> DramFile<'_, P> {
        DramFile { dev: self, pos: 0 }
    }
}

/// An open handle on the device. The cursor is owned exclusively by the
/// handle and discarded with it.
pub struct DramFile<'dev, P: Platform> {
    dev: &'dev DramDevice<P>,
    pos: u64,
}

impl<P: Platform> DramFile<'_, P> {
    /// Current cursor position.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reads up to `count` bytes at the cursor into `buf`.
    ///
    /// Returns 0 at or past the end of the stream, which is the designed
    /// end-of-stream signal, not an error. A read never crosses a page
    /// boundary: `count` is clamped to what remains of the current page, and
    /// the caller reissues for the next page. On success the cursor advances
    /// by exactly the returned byte count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransferFault`] when the copy into `buf` cannot
    /// complete; the cursor does not move.
    pub fn read(&mut self, buf: &mut dyn UserMem, count: usize) -> Result<usize> {
        if self.pos >= self.dev.dram_size {
            return Ok(0);
        }

        let (page, indent) = self.dev.layout.split(self.pos);
        let count = cmp::min(count, self.dev.layout.page_size() - indent);

        // the window must be released on every path out of here, the fault
        // path included, so it lives in its own scope
        {
            let window = self.dev.platform.map_page(page);
            buf.write(&window.as_ref()[indent..indent + count])?;
        }

        self.pos += count as u64;
        Ok(count)
    }

    /// Moves the cursor and returns the new absolute position.
    ///
    /// Seeking to `(0, End)` is the classic way to learn `dram_size` without
    /// issuing a control request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the target is negative or past
    /// `dram_size`; the cursor is left unchanged.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let newpos = match whence {
            Whence::Set => i128::from(offset),
            Whence::Cur => i128::from(self.pos) + i128::from(offset),
            Whence::End => i128::from(self.dev.dram_size) + i128::from(offset),
        };

        ensure!(
            newpos >= 0 && newpos <= i128::from(self.dev.dram_size),
            Error::InvalidArgument
        );

        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "bounds-checked against [0, dram_size] above"
        )]
        let newpos = newpos as u64;
        self.pos = newpos;
        Ok(newpos)
    }

    /// Validates and dispatches a control request.
    ///
    /// See [`ioctl`] for the request encoding and the supported operations.
    /// A failed reverse-map walk is logged and reported as success without
    /// writing a result, so the caller must not assume anything about the
    /// buffer contents in that case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when validation fails or the
    /// operation is unknown, [`Error::TransferFault`] when an argument copy
    /// faults.
    pub fn control(&mut self, cmd: u32, arg: &mut dyn UserMem) -> Result<()> {
        ioctl::validate(cmd, arg)?;

        match cmd {
            ioctl::REPORT_SIZE => {
                arg.write(&self.dev.dram_size.to_ne_bytes())?;
                Ok(())
            }
            ioctl::REVERSE_MAP => {
                let mut raw = [0u8; size_of::<u64>()];
                arg.read(&mut raw)?;
                let pa = u64::from_ne_bytes(raw);

                #[expect(
                    clippy::cast_possible_truncation,
                    reason = "physical addresses fit usize on supported targets"
                )]
                let pa = PhysicalAddress::new(pa as usize);
                let page = self.dev.layout.page_of(pa);

                match collect_owners(&self.dev.platform, self.dev.layout, pa) {
                    Ok(owners) => {
                        let class = classify(self.dev.platform.page_flags(page));
                        let report =
                            RmapReport::new(pa.align_down(self.dev.layout.page_size()), class, owners);
                        arg.write(&report.encode())?;
                        Ok(())
                    }
                    Err(err) => {
                        log::error!("reverse-map query for {pa} failed: {err}");
                        Ok(())
                    }
                }
            }
            _ => bail!(Error::InvalidArgument, "unknown control request"),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::page::{PageClass, PageFlags, PageIndex};
    use crate::platform::{MapSite, Pid, SpaceInfo};
    use crate::test_utils::{MockPlatform, UserSlice};
    use crate::{PageLayout, VirtualAddress};

    const PAGE_SIZE: usize = 4096;
    const PAGES: usize = 8;

    fn device() -> DramDevice<MockPlatform> {
        let mut platform = MockPlatform::new(PAGES, PAGE_SIZE);
        for (i, byte) in platform.memory_mut().iter_mut().enumerate() {
            *byte = i as u8;
        }
        DramDevice::new(platform, PageLayout::new(PAGE_SIZE))
    }

    #[test]
    fn read_at_end_is_empty() {
        let dev = device();
        let mut file = dev.open();
        let mut buf = UserSlice::new(16);

        file.seek(0, Whence::End).unwrap();
        assert_eq!(file.read(&mut buf, 16).unwrap(), 0);
        assert_eq!(file.position(), dev.dram_size());
    }

    #[test]
    fn read_returns_data_and_advances() {
        let dev = device();
        let mut file = dev.open();
        let mut buf = UserSlice::new(8);

        file.seek(5, Whence::Set).unwrap();
        assert_eq!(file.read(&mut buf, 8).unwrap(), 8);
        assert_eq!(buf.bytes(), &[5u8, 6, 7, 8, 9, 10, 11, 12][..]);
        assert_eq!(file.position(), 13);
    }

    #[test]
    fn read_clamps_at_page_boundary() {
        let dev = device();
        let mut file = dev.open();
        let mut buf = UserSlice::new(64);

        file.seek(PAGE_SIZE as i64 - 3, Whence::Set).unwrap();
        assert_eq!(file.read(&mut buf, 64).unwrap(), 3);
        assert_eq!(file.position(), PAGE_SIZE as u64);
        // the next read continues in the following page
        assert_eq!(file.read(&mut buf, 64).unwrap(), 64);
    }

    #[test_log::test]
    fn read_fault_releases_window_and_keeps_cursor() {
        let dev = device();
        let mut file = dev.open();
        let mut buf = UserSlice::new(16).fail_access();

        file.seek(100, Whence::Set).unwrap();
        assert_eq!(file.read(&mut buf, 16), Err(Error::TransferFault));
        assert_eq!(file.position(), 100);
        assert_eq!(dev.platform.active_windows(), 0);
    }

    #[test]
    fn seek_whences() {
        let dev = device();
        let size = dev.dram_size();
        let mut file = dev.open();

        assert_eq!(file.seek(100, Whence::Set).unwrap(), 100);
        assert_eq!(file.seek(-60, Whence::Cur).unwrap(), 40);
        assert_eq!(file.seek(0, Whence::End).unwrap(), size);
        assert_eq!(file.seek(-8, Whence::End).unwrap(), size - 8);
    }

    #[test]
    fn invalid_seek_keeps_cursor() {
        let dev = device();
        let mut file = dev.open();
        file.seek(100, Whence::Set).unwrap();

        assert_eq!(file.seek(-1, Whence::Set), Err(Error::InvalidArgument));
        assert_eq!(file.seek(1, Whence::End), Err(Error::InvalidArgument));
        assert_eq!(file.seek(-101, Whence::Cur), Err(Error::InvalidArgument));
        assert_eq!(file.position(), 100);
    }

    proptest! {
        #[test]
        fn seek_set_then_cur_composes(
            p in 0i64..(PAGES * PAGE_SIZE) as i64,
            delta in -(PAGE_SIZE as i64)..PAGE_SIZE as i64,
        ) {
            let dev = device();
            let mut via_cur = dev.open();
            let mut direct = dev.open();

            via_cur.seek(p, Whence::Set).unwrap();
            let composed = via_cur.seek(delta, Whence::Cur);
            let absolute = direct.seek(p + delta, Whence::Set);
            prop_assert_eq!(composed, absolute);
        }

        #[test]
        fn read_length_law(
            p in 0u64..(PAGES * PAGE_SIZE) as u64,
            count in 0usize..3 * PAGE_SIZE,
        ) {
            let dev = device();
            let mut file = dev.open();
            let mut buf = UserSlice::new(3 * PAGE_SIZE);

            file.seek(i64::try_from(p).unwrap(), Whence::Set).unwrap();
            let got = file.read(&mut buf, count).unwrap();
            let indent = usize::try_from(p).unwrap() % PAGE_SIZE;
            prop_assert_eq!(got, count.min(PAGE_SIZE - indent));
        }
    }

    #[test]
    fn report_size_roundtrip() {
        let dev = device();
        let mut file = dev.open();
        let mut arg = UserSlice::new(8);

        file.control(ioctl::REPORT_SIZE, &mut arg).unwrap();
        let size = u64::from_ne_bytes(arg.bytes().try_into().unwrap());
        assert_eq!(size, dev.dram_size());

        // the same value is observable through an end-relative seek
        assert_eq!(file.seek(0, Whence::End).unwrap(), size);
    }

    #[test_log::test]
    fn control_rejects_malformed_requests() {
        let dev = device();
        let mut file = dev.open();
        let mut arg = UserSlice::new(8);

        let bad_magic = ioctl::REPORT_SIZE ^ (1 << 8);
        assert_eq!(
            file.control(bad_magic, &mut arg),
            Err(Error::InvalidArgument)
        );

        let bad_nr = ioctl::request(ioctl::DIR_READ, ioctl::NR_MAX + 1, 8);
        assert_eq!(file.control(bad_nr, &mut arg), Err(Error::InvalidArgument));

        // valid nr that no operation answers to
        let hole = ioctl::request(0, 0, 0);
        assert_eq!(file.control(hole, &mut arg), Err(Error::InvalidArgument));

        let mut sealed = UserSlice::new(8).deny_write();
        assert_eq!(
            file.control(ioctl::REPORT_SIZE, &mut sealed),
            Err(Error::InvalidArgument)
        );
    }

    fn query(file: &mut DramFile<'_, MockPlatform>, pa: u64) -> UserSlice {
        let mut arg = UserSlice::new(RmapReport::ENCODED_SIZE);
        arg.set_bytes(&pa.to_ne_bytes());
        file.control(ioctl::REVERSE_MAP, &mut arg).unwrap();
        arg
    }

    #[test]
    fn reverse_map_query_roundtrip() {
        let mut platform = MockPlatform::new(PAGES, PAGE_SIZE);
        platform.set_flags(PageIndex::new(3), PageFlags::ANON);
        platform.add_site(
            PageIndex::new(3),
            MapSite {
                virtual_address: VirtualAddress::new(0x7f12_3456_7000),
                space: Some(SpaceInfo {
                    owner: Some(Pid::new(4242)),
                }),
            },
        );
        let dev = DramDevice::new(platform, PageLayout::new(PAGE_SIZE));
        let mut file = dev.open();

        let arg = query(&mut file, 3 * PAGE_SIZE as u64 + 0x123);
        let bytes = arg.bytes();

        let tagged = u64::from_ne_bytes(bytes[0..8].try_into().unwrap());
        assert_eq!(tagged & !PageClass::MASK, 3 * PAGE_SIZE as u64);
        assert_eq!(PageClass::from_tag(tagged), Some(PageClass::Anonymous));

        let va = u64::from_ne_bytes(bytes[8..16].try_into().unwrap());
        assert_eq!(va, 0x7f12_3456_7000);

        let count = i32::from_ne_bytes(bytes[1196..1200].try_into().unwrap());
        assert_eq!(count, 1);
    }

    #[test]
    fn reverse_map_query_without_owners_still_classifies() {
        let mut platform = MockPlatform::new(PAGES, PAGE_SIZE);
        platform.set_flags(PageIndex::new(1), PageFlags::ANON | PageFlags::KSM);
        let dev = DramDevice::new(platform, PageLayout::new(PAGE_SIZE));
        let mut file = dev.open();

        let arg = query(&mut file, PAGE_SIZE as u64);
        let bytes = arg.bytes();

        let tagged = u64::from_ne_bytes(bytes[0..8].try_into().unwrap());
        assert_eq!(PageClass::from_tag(tagged), Some(PageClass::Deduplicated));
        let count = i32::from_ne_bytes(bytes[1196..1200].try_into().unwrap());
        assert_eq!(count, 0);
    }

    #[test_log::test]
    fn reverse_map_walk_failure_writes_nothing() {
        let mut platform = MockPlatform::new(PAGES, PAGE_SIZE);
        platform.add_site(
            PageIndex::new(0),
            MapSite {
                virtual_address: VirtualAddress::new(0x1000),
                space: None,
            },
        );
        let dev = DramDevice::new(platform, PageLayout::new(PAGE_SIZE));
        let mut file = dev.open();

        let mut arg = UserSlice::new(RmapReport::ENCODED_SIZE);
        arg.set_bytes(&0u64.to_ne_bytes());
        // reported as success, but the result area is never written
        file.control(ioctl::REVERSE_MAP, &mut arg).unwrap();
        assert!(arg.bytes()[8..].iter().all(|b| *b == 0));
    }
}
