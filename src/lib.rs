// ABOUTME: Library crate for pool-relay exposing the relay core for testing and embedding

#![allow(missing_docs)]

pub mod cli;
pub mod config;
pub mod logging;
pub mod relay;
