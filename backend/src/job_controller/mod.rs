//! Run-level control: the single-instance lock, the coordinator that drives a
//! run and the bookkeeping of folder outcomes.

pub mod coordinator;
pub mod lock;
pub mod state;
