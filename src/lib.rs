// Library exports for the warden process supervisor

pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod logs;
pub mod memory;
pub mod names;
pub mod process;
pub mod registry;
