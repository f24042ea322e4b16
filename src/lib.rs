// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Read-only inspection device for installed physical memory.
//!
//! The crate models the kernel-side core of a `/dev/dram`-style character
//! device: all of physical memory is presented as one linear byte stream that
//! can be read and seeked, and an ioctl-style control boundary answers two
//! questions about it: how much memory is installed, and which processes
//! currently map a given physical page (and at which virtual addresses).
//!
//! Everything the device needs from the kernel proper is injected through the
//! [`Platform`] trait: a temporary per-page mapping window, per-page state
//! flags, and the reverse-map walker that enumerates the mappings of a page.
//! Buffers crossing the privilege boundary are modeled by [`UserMem`].

#![cfg_attr(not(any(test, feature = "test_utils")), no_std)]

mod address;
mod device;
mod error;
pub mod ioctl;
mod page;
mod platform;
mod rmap;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use address::{PhysicalAddress, VirtualAddress};
pub use device::{DramDevice, DramFile, Whence};
pub use error::Error;
pub use page::{PageClass, PageFlags, PageIndex, PageLayout, classify};
pub use platform::{Fault, MapSite, Pid, Platform, SpaceInfo, UserMem, WalkControl};
pub use rmap::{MAX_OWNERS, OwnerEntry, OwnerSet, RmapReport, collect_owners};

pub(crate) type Result<T> = core::result::Result<T, Error>;
