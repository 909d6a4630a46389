// src/lib.rs

pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod input;
pub mod logging;
