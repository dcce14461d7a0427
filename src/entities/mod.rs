// Entity Models
// "Identity persists, values change"
//
// A tool keeps its name forever; its content is a timeline of immutable
// revisions.

pub mod tool;

pub use tool::{Revision, Tool, UrlAlternate};
