//! Vigil-Claw App
//!
//! Config handling and backend bootstrap for the vigil-claw binary. The
//! command handlers themselves live in the binary target.

pub mod bootstrap;
pub mod config;
