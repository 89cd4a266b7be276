//! Data structures and serialization for captured evidence

mod artifact;
mod entry;
mod format;

pub use artifact::*;
pub use entry::*;
pub use format::*;
