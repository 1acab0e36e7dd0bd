#![forbid(unsafe_code)]

pub mod common;
pub mod reference;
pub mod role_uniqueness;
pub mod roster;
pub mod session;

pub use common::{ContractViolation, MonotonicTimeNs, ReasonCodeId, Validate};
