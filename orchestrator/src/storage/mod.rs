//! Local persistence

pub mod json;
pub mod layout;
pub mod memory;
pub mod settings;
pub mod store;
