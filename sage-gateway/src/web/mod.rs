//! External knowledge sources consulted when the knowledge index has nothing.

pub mod cache;
pub mod search;
