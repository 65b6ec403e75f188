//! Address-space owners as the pager sees them.

pub mod process;
pub mod working_set;

pub use process::{Pid, Process};
