//! # mxws-core
//!
//! Foundation shared by every mxws crate:
//!
//! - **Constants**: package name and version
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod logging;
