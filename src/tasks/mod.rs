//! Background Tasks Module
//!
//! # Tasks
//! - Temp sweep: removes abandoned disk store temp files at configured intervals

mod cleanup;

pub use cleanup::{spawn_cleanup_task, ABANDONED_AFTER};
