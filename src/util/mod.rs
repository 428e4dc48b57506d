//! Small shared helpers.
//!
//! - **Text**: relative timestamps and summary truncation for listings
//! - **Tasks**: converting a panicking future into an error value

mod task;
mod text;

pub use task::catch_task_panic;
pub use text::{relative_time, single_line, truncate_summary};
