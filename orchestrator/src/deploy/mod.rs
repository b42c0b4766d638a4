//! Provisioning, status tracking and orchestration

pub mod compose;
pub mod database;
pub mod docker;
pub mod dockerfile;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod image;
pub mod locks;
pub mod provisioner;
pub mod tracker;
