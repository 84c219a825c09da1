//! Domain model.

pub mod task;
