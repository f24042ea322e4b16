// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt::{Display, Formatter};

use crate::platform::Fault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An argument is invalid.
    ///
    /// Examples: a seek target outside `[0, dram_size]`, a control request
    /// with the wrong magic or an out-of-range operation number, a control
    /// argument buffer that is not usable in the required direction.
    InvalidArgument,
    /// A copy across the privilege boundary could not complete.
    TransferFault,
    /// The page-ownership walk was aborted before producing a usable result.
    WalkFailed,
}

impl From<Fault> for Error {
    fn from(_err: Fault) -> Self {
        Error::TransferFault
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "An argument is invalid"),
            Error::TransferFault => {
                write!(f, "A copy across the privilege boundary could not complete")
            }
            Error::WalkFailed => {
                write!(
                    f,
                    "The page-ownership walk was aborted before producing a usable result"
                )
            }
        }
    }
}

impl core::error::Error for Error {}

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $error:expr, $msg:expr) => {
        if !$cond {
            log::error!($msg);
            return Err($error);
        }
    };
    ($cond:expr, $error:expr) => {
        if !$cond {
            return Err($error);
        }
    };
}

#[macro_export]
macro_rules! bail {
    ($error:expr) => {
        return Err($error)
    };
    ($error:expr, $msg:expr) => {{
        log::error!($msg);
        return Err($error);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    // both bail! arms must be usable directly as match-arm expressions,
    // the way control dispatch uses them
    fn dispatch(cmd: u32) -> crate::Result<u32> {
        match cmd {
            0 => Ok(0),
            1 => bail!(Error::TransferFault),
            _ => bail!(Error::InvalidArgument, "unknown command"),
        }
    }

    #[test_log::test]
    fn bail_in_expression_position() {
        assert_eq!(dispatch(0), Ok(0));
        assert_eq!(dispatch(1), Err(Error::TransferFault));
        assert_eq!(dispatch(7), Err(Error::InvalidArgument));
    }
}
