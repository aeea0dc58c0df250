//! HTTP layer for orderbus.
//!
//! Accepts orders from upstream callers and hands them to the
//! [`crate::producer::Producer`]; also exposes health and metrics.

pub mod handler;
