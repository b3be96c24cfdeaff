//! Integration test crate for the hive gossip overlay.
//!
//! This crate exists solely to run multi-node scenario tests over the
//! in-memory transport. It has no public API - all functionality is in the
//! test modules.

#![forbid(unsafe_code)]
