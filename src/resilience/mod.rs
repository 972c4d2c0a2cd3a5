//! Retry policies for backend calls and propagation.

pub mod retry;
