// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::address::PhysicalAddress;

bitflags::bitflags! {
    /// Per-page state bits reported by the platform for a physical page.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// The page backs anonymous process memory (heap, stack) with no file
        /// behind it.
        const ANON = 1 << 0;
        /// The page is maintained by the kernel's same-page deduplication and
        /// may be shared across unrelated processes.
        const KSM = 1 << 1;
    }
}

impl fmt::Display for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

/// Backing classification of a physical page.
///
/// The discriminants are the 2-bit tag OR-ed into the low bits of the
/// page-aligned address on reverse-map query output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageClass {
    /// Anonymous process memory.
    Anonymous = 1,
    /// Deduplicated, possibly shared across processes.
    Deduplicated = 2,
    /// Backing a memory-mapped file.
    FileBacked = 3,
}

impl PageClass {
    /// Mask selecting the classification tag inside a tagged address.
    pub const MASK: u64 = 0b11;

    #[must_use]
    #[inline]
    pub const fn tag(self) -> u64 {
        self as u64
    }

    #[must_use]
    pub const fn from_tag(tag: u64) -> Option<Self> {
        match tag & Self::MASK {
            1 => Some(PageClass::Anonymous),
            2 => Some(PageClass::Deduplicated),
            3 => Some(PageClass::FileBacked),
            _ => None,
        }
    }
}

// the file-backed tag is the union of the other two, as inherited from the
// device's wire format
static_assertions::const_assert_eq!(
    PageClass::FileBacked.tag(),
    PageClass::Anonymous.tag() | PageClass::Deduplicated.tag()
);

/// Classifies a page from its flags.
///
/// The precedence is total and deliberate: a deduplicated page wins over an
/// anonymous one, an anonymous one over the file-backed default. A page can
/// satisfy more than one predicate, so the order must never change.
#[must_use]
pub fn classify(flags: PageFlags) -> PageClass {
    if flags.contains(PageFlags::KSM) {
        PageClass::Deduplicated
    } else if flags.contains(PageFlags::ANON) {
        PageClass::Anonymous
    } else {
        PageClass::FileBacked
    }
}

/// Index of a physical page in the platform's page table.
#[repr(transparent)]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageIndex(usize);

impl PageIndex {
    #[must_use]
    pub const fn new(n: usize) -> Self {
        Self(n)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// Page-size configuration for the linear view of physical memory.
///
/// Passed in explicitly at device construction so nothing in the crate
/// depends on a process-wide page-size global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    page_size: usize,
}

impl PageLayout {
    /// Constructs a layout with the given page size.
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    #[must_use]
    pub const fn new(page_size: usize) -> Self {
        assert!(
            page_size.is_power_of_two(),
            "PageLayout: page size is not a power-of-two"
        );
        Self { page_size }
    }

    #[inline]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Splits a stream position into the index of the containing page and the
    /// byte offset within it. Derived per access, never stored.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "positions are bounded by installed memory, which fits usize"
    )]
    pub fn split(&self, position: u64) -> (PageIndex, usize) {
        let page = (position / self.page_size as u64) as usize;
        let offset = (position % self.page_size as u64) as usize;
        (PageIndex::new(page), offset)
    }

    /// The page containing the given physical address.
    #[must_use]
    pub fn page_of(&self, addr: PhysicalAddress) -> PageIndex {
        PageIndex::new(addr.get() / self.page_size)
    }

    /// The physical address at which the given page starts.
    #[must_use]
    pub fn page_base(&self, page: PageIndex) -> PhysicalAddress {
        PhysicalAddress::new(page.get() * self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn classify_precedence() {
        assert_eq!(classify(PageFlags::empty()), PageClass::FileBacked);
        assert_eq!(classify(PageFlags::ANON), PageClass::Anonymous);
        assert_eq!(classify(PageFlags::KSM), PageClass::Deduplicated);
        // deduplicated wins even when the page also looks anonymous
        assert_eq!(
            classify(PageFlags::ANON | PageFlags::KSM),
            PageClass::Deduplicated
        );
    }

    #[test]
    fn tag_roundtrip() {
        for class in [
            PageClass::Anonymous,
            PageClass::Deduplicated,
            PageClass::FileBacked,
        ] {
            assert_eq!(PageClass::from_tag(class.tag()), Some(class));
        }
        assert_eq!(PageClass::from_tag(0), None);
        // only the low two bits participate
        assert_eq!(
            PageClass::from_tag(0xdead_b000 | PageClass::Anonymous.tag()),
            Some(PageClass::Anonymous)
        );
    }

    #[test]
    #[should_panic(expected = "power-of-two")]
    fn layout_rejects_unaligned_page_size() {
        let _layout = PageLayout::new(4095);
    }

    proptest! {
        #[test]
        fn split_recombines(
            position in 0u64..(1 << 40),
            shift in prop::sample::select(&[12u32, 14, 16]),
        ) {
            let layout = PageLayout::new(1 << shift);
            let (page, offset) = layout.split(position);
            prop_assert!(offset < layout.page_size());
            prop_assert_eq!(
                page.get() as u64 * layout.page_size() as u64 + offset as u64,
                position
            );
        }

        #[test]
        fn page_of_matches_split(pa in 0usize..(1 << 40)) {
            let layout = PageLayout::new(4096);
            let addr = PhysicalAddress::new(pa);
            let (page, _) = layout.split(pa as u64);
            prop_assert_eq!(layout.page_of(addr), page);
            prop_assert!(layout.page_base(page) <= addr);
        }
    }
}
