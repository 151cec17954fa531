//! Shared test utilities for files2md integration tests.
//!
//! - `TestHarness` wires an `Exporter` over in-memory fakes and a temp output directory
//! - Fakes for the attachment source, the byte fetcher and the conversion engine

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::TestHarness;
