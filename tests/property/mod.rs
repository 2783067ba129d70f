//! Property-based tests

mod merging;
mod paths;
