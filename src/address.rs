// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

macro_rules! address_impl {
    ($addr:ident) => {
        impl $addr {
            #[must_use]
            pub const fn new(n: usize) -> Self {
                Self(n)
            }

            #[inline]
            pub const fn get(self) -> usize {
                self.0
            }

            #[must_use]
            #[inline]
            pub const fn checked_add(self, rhs: usize) -> Option<Self> {
                if let Some(out) = self.0.checked_add(rhs) {
                    Some(Self(out))
                } else {
                    None
                }
            }

            #[must_use]
            #[inline]
            pub const fn checked_sub(self, rhs: usize) -> Option<Self> {
                if let Some(out) = self.0.checked_sub(rhs) {
                    Some(Self(out))
                } else {
                    None
                }
            }

            #[must_use]
            #[inline]
            pub const fn is_aligned_to(&self, align: usize) -> bool {
                assert!(
                    align.is_power_of_two(),
                    "is_aligned_to: align is not a power-of-two"
                );

                self.0 & (align - 1) == 0
            }

            #[must_use]
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                if !align.is_power_of_two() {
                    panic!("align_down: align is not a power-of-two");
                }

                let aligned = Self(self.0 & 0usize.wrapping_sub(align));
                debug_assert!(aligned.is_aligned_to(align));
                debug_assert!(aligned.0 <= self.0);
                aligned
            }
        }

        impl fmt::Display for $addr {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_fmt(format_args!("{:#016x}", self.0))
            }
        }

        impl fmt::Debug for $addr {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($addr))
                    .field(&format_args!("{:#016x}", self.0))
                    .finish()
            }
        }
    };
}

/// An address in the virtual address space of some process.
#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(usize);
address_impl!(VirtualAddress);

/// An address in physical memory.
#[repr(transparent)]
#[derive(Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(usize);
address_impl!(PhysicalAddress);

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn phys_addr_add(a in 0..10000usize, b in 0..10000usize) {
            let addr = PhysicalAddress::new(a);
            prop_assert_eq!(addr.checked_add(b), a.checked_add(b).map(PhysicalAddress::new));
        }

        #[test]
        fn phys_addr_sub(a in 0..10000usize, b in 0..10000usize) {
            let addr = PhysicalAddress::new(a);
            prop_assert_eq!(addr.checked_sub(b), a.checked_sub(b).map(PhysicalAddress::new));
        }

        #[test]
        fn phys_addr_is_aligned(a: usize, align in prop::sample::select(&[1usize, 2, 8, 16, 32, 64, 4096])) {
            let addr = PhysicalAddress::new(a);
            prop_assert_eq!(addr.is_aligned_to(align), a % align == 0);
        }

        #[test]
        fn phys_addr_align_down(a: usize, align in prop::sample::select(&[1usize, 2, 8, 16, 32, 64, 4096])) {
            let addr = PhysicalAddress::new(a);
            let aligned = addr.align_down(align);
            prop_assert!(aligned.is_aligned_to(align));
            prop_assert!(aligned <= addr);
        }
    }

    #[test]
    fn display_is_hex() {
        let addr = VirtualAddress::new(0xffff_8000_0001_56e8);
        assert_eq!(format!("{addr}"), "0xffff8000000156e8");
    }
}
