//! mp4frag - MP4 fragmenter
//!
//! This library crate exposes the configuration layer of the `mp4frag`
//! binary for integration testing. Fragmentation itself lives in
//! `mp4frag-media`.

pub mod config;
