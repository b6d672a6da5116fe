//! Foundation layer: shared primitives grouped for the layered architecture.

pub mod encoding;
pub mod error;
pub mod time;
pub mod types;

pub use error::*;
pub use time::*;
pub use types::*;
