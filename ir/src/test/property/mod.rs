//! Property-based tests for fusion construction.


pub mod generators;
