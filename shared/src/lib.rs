//! Types shared between the catch relay and its clients.
//!
//! The protocol structs derive `ts_rs::TS` so the browser client can use the
//! same definitions as the server.

pub mod config;
pub mod protocol;
pub mod vec3;
