//! Integration tests for federated repositories over in-memory sources

mod test_utils;

mod config;
mod federation;
mod observation;
mod pool;
mod processor;
mod single;
