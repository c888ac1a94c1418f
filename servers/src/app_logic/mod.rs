//! Configuration loading and server lifecycle helpers.

pub mod config;
pub mod lifecycle;
