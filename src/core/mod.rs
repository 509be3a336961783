//! Core Components
//!
//! HTTP transport seam shared by the token flow and the request pipeline.

pub mod transport;

pub use transport::*;
