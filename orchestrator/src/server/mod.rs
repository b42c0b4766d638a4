//! Local HTTP API

pub mod context;
pub mod handlers;
pub mod serve;
pub mod state;
