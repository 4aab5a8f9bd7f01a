//! Shared ambient plumbing for the gate workspace: tracing setup, trace ids
//! and span helpers.

pub mod logger;
