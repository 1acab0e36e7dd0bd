#![forbid(unsafe_code)]

pub mod board;
pub mod change_feed;
pub mod dispatch_view;
pub mod edit_guard;
pub mod error;
pub mod save_coordinator;
pub mod slot_reconciler;

#[cfg(test)]
pub(crate) mod test_support;
