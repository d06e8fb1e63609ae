//! Catch relay library.
//!
//! This module exposes the relay components for use in tests and binaries.

pub mod config;
pub mod participant;
pub mod projectile;
pub mod protocol;
pub mod relay_loop;
pub mod state;
pub mod ws;
