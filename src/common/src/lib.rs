//! Types shared between the Trine kernel and user programs.
//!
//! Everything here crosses the syscall boundary, so layouts and numeric
//! values are part of the ABI.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod error;
pub mod syscall;

pub use error::SysError;
pub use syscall::Syscall;
