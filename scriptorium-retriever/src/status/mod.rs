//! Status reports: snapshot summaries, corpus exploration and index status.

pub mod api;
pub mod types;


pub use api::*;
pub use types::*;
