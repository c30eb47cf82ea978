//! Hardware capabilities
//!
//! Small async traits implemented by value sources and device displays. See
//! [`capabilities`].

pub mod capabilities;

pub use capabilities::{Annotator, ValueSource};
