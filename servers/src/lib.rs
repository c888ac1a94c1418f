//! Shared startup code for the `server_ingest` and `server_relay` binaries.

pub mod app_logic;
