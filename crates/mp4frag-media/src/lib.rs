//! mp4frag-media: MP4 parsing, fMP4 serialization, and fragmentation
//!
//! This crate turns progressive MP4 files into fragmented MP4 (fMP4). It is
//! the engine behind the `mp4frag` command line tool.
//!
//! # Modules
//!
//! - `mp4` - MP4 container parsing (moov, sample tables, fragmented input)
//! - `fmp4` - Fragmented MP4 serialization (init segment, moof/mdat, mfra)
//! - `fragment` - Track scheduling, fragment boundaries, and the output loop
//!
//! # Architecture
//!
//! A run goes through these steps:
//!
//! 1. Parse the input moov into per-track sample tables
//! 2. For inputs that are already fragmented, walk every moof to collect samples
//! 3. Pick (or detect) the fragment duration from the video sync-sample cadence
//! 4. Write an init segment with one trak and one trex per track
//! 5. Interleave single-track fragments, anchored on the video (or audio) track
//! 6. Close the file with an mfra index pointing at every fragment

pub mod error;
pub mod fmp4;
pub mod fragment;
pub mod mp4;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use error::{Error, Result};
pub use fmp4::InitSegment;
pub use fragment::{fragment_file, FragmentOptions, FragmentReport, Fragmenter, TrackReport};
pub use mp4::Mp4File;
