//! Schema module - Encoding parameters for SPLV streams.

mod params;

pub use params::*;
