//! Live station feed.
//!
//! Mirrors the stations of one transit route from a hosted table: one
//! bootstrap query, then row updates pushed over a realtime channel and
//! merged into the local list.

pub mod backend;
pub mod board;
pub mod config;
pub mod domain;
pub mod feed;
