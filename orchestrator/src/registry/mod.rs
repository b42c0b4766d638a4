//! Deploy targets and how to reach them

pub mod local;
pub mod probe;
pub mod servers;
pub mod ssh;
pub mod target;
