//! TOSFS: a userspace FUSE driver for a fixed-capacity, memory-mapped
//! filesystem image.

pub mod error;
pub mod fs;
pub mod session;
pub mod volume;
