//! Environment variables and secrets

pub mod injector;
pub mod secrets;
