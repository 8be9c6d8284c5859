//! Route handlers for the HTTP API.

pub mod control;
pub mod show;
pub mod state;
pub mod vote;
