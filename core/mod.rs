// Core module: logging and configuration (NO socket dependencies)
pub mod config;
pub mod log;

pub use config::*;
pub use log::*;
