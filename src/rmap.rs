// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reverse-map walker adapter: collects the `(process, virtual address)`
//! pairs that currently reference a physical page into a fixed-capacity set.

use arrayvec::ArrayVec;

use crate::address::{PhysicalAddress, VirtualAddress};
use crate::page::{PageClass, PageLayout};
use crate::platform::{Pid, Platform, WalkControl};
use crate::{Error, Result, ensure};

/// Upper bound on the number of owners a single query can report.
///
/// Mappings beyond this are not collected; see [`collect_owners`] for what
/// happens when a page has more.
pub const MAX_OWNERS: usize = 99;

/// One reverse mapping of the queried page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerEntry {
    pub pid: Pid,
    pub virtual_address: VirtualAddress,
}

/// Ordered, fixed-capacity set of the owners discovered by one walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnerSet {
    entries: ArrayVec<OwnerEntry, MAX_OWNERS>,
}

impl OwnerSet {
    pub const CAPACITY: usize = MAX_OWNERS;

    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: ArrayVec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    #[must_use]
    pub fn entries(&self) -> &[OwnerEntry] {
        &self.entries
    }
}

/// Walks the ownership structures of the page containing `pa` and collects
/// up to [`MAX_OWNERS`] `(process, virtual address)` pairs.
///
/// The collector rejects rather than truncates: a mapping whose address
/// space or owning task cannot be resolved aborts the walk, and so does a
/// mapping arriving while the set is already full. A cooperating walker is
/// told to stop the moment the capacity-filling entry is accepted, so the
/// overflow rejection only triggers for walkers that keep delivering
/// afterwards. Natural termination with any count (zero included) is a
/// success.
///
/// # Errors
///
/// Returns [`Error::WalkFailed`] when the walk ends in an abort.
pub fn collect_owners<P: Platform>(
    platform: &P,
    layout: PageLayout,
    pa: PhysicalAddress,
) -> Result<OwnerSet> {
    let page = layout.page_of(pa);
    let mut owners = OwnerSet::new();

    let verdict = platform.rmap_walk(page, &mut |site| {
        let Some(space) = site.space else {
            log::error!(
                "mapping of {pa} at {} has no address space",
                site.virtual_address
            );
            return WalkControl::Abort;
        };
        let Some(pid) = space.owner else {
            log::error!(
                "address space mapping {pa} at {} has no owning task",
                site.virtual_address
            );
            return WalkControl::Abort;
        };
        if owners.is_full() {
            log::error!("owner set for {pa} is full, rejecting further mappings");
            return WalkControl::Abort;
        }

        owners.entries.push(OwnerEntry {
            pid,
            virtual_address: site.virtual_address,
        });

        if owners.is_full() {
            WalkControl::Done
        } else {
            WalkControl::Again
        }
    });

    ensure!(verdict != WalkControl::Abort, Error::WalkFailed);
    Ok(owners)
}

const VA_BASE: usize = 8;
const PID_BASE: usize = VA_BASE + MAX_OWNERS * 8;
const COUNT_OFFSET: usize = PID_BASE + MAX_OWNERS * 4;

/// Output of a reverse-map query: the page-aligned physical address with the
/// classification tag in its low bits, plus the owner set.
#[derive(Debug, Clone, PartialEq)]
pub struct RmapReport {
    tagged_address: u64,
    owners: OwnerSet,
}

impl RmapReport {
    /// Size of the encoded report in bytes.
    pub const ENCODED_SIZE: usize = COUNT_OFFSET + 4;

    #[must_use]
    pub fn new(page_base: PhysicalAddress, class: PageClass, owners: OwnerSet) -> Self {
        debug_assert!((page_base.get() as u64) & PageClass::MASK == 0);
        Self {
            tagged_address: page_base.get() as u64 | class.tag(),
            owners,
        }
    }

    /// Page-aligned address OR-ed with the 2-bit classification tag.
    #[must_use]
    pub fn tagged_address(&self) -> u64 {
        self.tagged_address
    }

    #[must_use]
    pub fn page_address(&self) -> u64 {
        self.tagged_address & !PageClass::MASK
    }

    #[must_use]
    pub fn class(&self) -> Option<PageClass> {
        PageClass::from_tag(self.tagged_address)
    }

    #[must_use]
    pub fn owners(&self) -> &OwnerSet {
        &self.owners
    }

    /// Encodes the report into its fixed wire layout: tagged address, the
    /// virtual-address table, the pid table, then the entry count. Slots past
    /// the count are zeroed. Multi-byte fields are native-endian.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "the entry count is at most MAX_OWNERS"
    )]
    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        out[0..8].copy_from_slice(&self.tagged_address.to_ne_bytes());

        for (i, entry) in self.owners.entries().iter().enumerate() {
            let va = VA_BASE + i * 8;
            out[va..va + 8]
                .copy_from_slice(&(entry.virtual_address.get() as u64).to_ne_bytes());
            let pid = PID_BASE + i * 4;
            out[pid..pid + 4].copy_from_slice(&entry.pid.get().to_ne_bytes());
        }

        let count = self.owners.len() as i32;
        out[COUNT_OFFSET..].copy_from_slice(&count.to_ne_bytes());
        out
    }
}

static_assertions::const_assert_eq!(RmapReport::ENCODED_SIZE, 1200);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{PageFlags, PageIndex, classify};
    use crate::platform::{MapSite, SpaceInfo};
    use crate::test_utils::MockPlatform;

    const PAGE_SIZE: usize = 4096;

    fn site(pid: i32, va: usize) -> MapSite {
        MapSite {
            virtual_address: VirtualAddress::new(va),
            space: Some(SpaceInfo {
                owner: Some(Pid::new(pid)),
            }),
        }
    }

    fn layout() -> PageLayout {
        PageLayout::new(PAGE_SIZE)
    }

    #[test]
    fn no_owners_is_success() {
        let platform = MockPlatform::new(4, PAGE_SIZE);
        let owners = collect_owners(&platform, layout(), PhysicalAddress::new(0x1000)).unwrap();
        assert!(owners.is_empty());
    }

    #[test]
    fn single_owner() {
        let mut platform = MockPlatform::new(4, PAGE_SIZE);
        platform.add_site(PageIndex::new(2), site(42, 0x7f00_0000_1000));

        let owners = collect_owners(&platform, layout(), PhysicalAddress::new(0x2abc)).unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners.entries()[0].pid, Pid::new(42));
        assert_eq!(
            owners.entries()[0].virtual_address,
            VirtualAddress::new(0x7f00_0000_1000)
        );
    }

    #[test_log::test]
    fn unresolvable_space_aborts() {
        let mut platform = MockPlatform::new(4, PAGE_SIZE);
        platform.add_site(PageIndex::new(0), site(1, 0x1000));
        platform.add_site(
            PageIndex::new(0),
            MapSite {
                virtual_address: VirtualAddress::new(0x2000),
                space: None,
            },
        );

        let err = collect_owners(&platform, layout(), PhysicalAddress::new(0)).unwrap_err();
        assert_eq!(err, Error::WalkFailed);
    }

    #[test_log::test]
    fn unresolvable_owner_aborts() {
        let mut platform = MockPlatform::new(4, PAGE_SIZE);
        platform.add_site(
            PageIndex::new(0),
            MapSite {
                virtual_address: VirtualAddress::new(0x2000),
                space: Some(SpaceInfo { owner: None }),
            },
        );

        let err = collect_owners(&platform, layout(), PhysicalAddress::new(0)).unwrap_err();
        assert_eq!(err, Error::WalkFailed);
    }

    #[test]
    fn capacity_stops_a_cooperating_walker() {
        let mut platform = MockPlatform::new(4, PAGE_SIZE);
        for i in 0..150_usize {
            let pid = i32::try_from(i).unwrap();
            platform.add_site(PageIndex::new(1), site(pid, 0x1_0000 + i * PAGE_SIZE));
        }

        let owners = collect_owners(&platform, layout(), PhysicalAddress::new(0x1000)).unwrap();
        assert_eq!(owners.len(), MAX_OWNERS);
        // order of arrival is preserved, so the first 99 survive
        assert_eq!(owners.entries()[0].pid, Pid::new(0));
        assert_eq!(owners.entries()[MAX_OWNERS - 1].pid, Pid::new(98));
    }

    #[test_log::test]
    fn overflow_rejects_when_walker_keeps_delivering() {
        let mut platform = MockPlatform::new(4, PAGE_SIZE);
        platform.set_ignore_stop(true);
        for i in 0..150_usize {
            let pid = i32::try_from(i).unwrap();
            platform.add_site(PageIndex::new(1), site(pid, 0x1_0000 + i * PAGE_SIZE));
        }

        let err = collect_owners(&platform, layout(), PhysicalAddress::new(0x1000)).unwrap_err();
        assert_eq!(err, Error::WalkFailed);
    }

    #[test]
    fn overflow_behavior_is_deterministic() {
        let mut platform = MockPlatform::new(4, PAGE_SIZE);
        for i in 0..150_usize {
            let pid = i32::try_from(i).unwrap();
            platform.add_site(PageIndex::new(1), site(pid, 0x1_0000 + i * PAGE_SIZE));
        }

        let first = collect_owners(&platform, layout(), PhysicalAddress::new(0x1000)).unwrap();
        let second = collect_owners(&platform, layout(), PhysicalAddress::new(0x1000)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn report_packs_class_into_address() {
        let owners = OwnerSet::new();
        let report = RmapReport::new(
            PhysicalAddress::new(0x3000),
            classify(PageFlags::KSM),
            owners,
        );
        assert_eq!(report.tagged_address(), 0x3000 | 2);
        assert_eq!(report.page_address(), 0x3000);
        assert_eq!(report.class(), Some(PageClass::Deduplicated));
    }

    #[test]
    fn encode_layout() {
        let mut owners = OwnerSet::new();
        owners.entries.push(OwnerEntry {
            pid: Pid::new(-7),
            virtual_address: VirtualAddress::new(0xdead_b000),
        });
        owners.entries.push(OwnerEntry {
            pid: Pid::new(1234),
            virtual_address: VirtualAddress::new(0x7fff_0000),
        });

        let report = RmapReport::new(PhysicalAddress::new(0x5000), PageClass::Anonymous, owners);
        let bytes = report.encode();
        assert_eq!(bytes.len(), 1200);

        assert_eq!(u64::from_ne_bytes(bytes[0..8].try_into().unwrap()), 0x5001);
        assert_eq!(
            u64::from_ne_bytes(bytes[8..16].try_into().unwrap()),
            0xdead_b000
        );
        assert_eq!(
            u64::from_ne_bytes(bytes[16..24].try_into().unwrap()),
            0x7fff_0000
        );
        assert_eq!(
            i32::from_ne_bytes(bytes[PID_BASE..PID_BASE + 4].try_into().unwrap()),
            -7
        );
        assert_eq!(
            i32::from_ne_bytes(bytes[PID_BASE + 4..PID_BASE + 8].try_into().unwrap()),
            1234
        );
        assert_eq!(
            i32::from_ne_bytes(bytes[COUNT_OFFSET..].try_into().unwrap()),
            2
        );
        // untouched slots stay zero
        assert!(bytes[24..PID_BASE].iter().all(|b| *b == 0));
        assert!(bytes[PID_BASE + 8..COUNT_OFFSET].iter().all(|b| *b == 0));
    }
}
