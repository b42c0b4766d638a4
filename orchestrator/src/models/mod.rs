//! Data models

pub mod context;
pub mod definition;
pub mod environment;
pub mod project;
pub mod resource;
pub mod server;
pub mod validate;
pub mod view;
pub mod workload;
