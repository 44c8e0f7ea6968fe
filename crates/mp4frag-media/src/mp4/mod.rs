//! MP4 container parsing.
//!
//! This module parses the `moov` of an MP4 file into per-track sample tables,
//! and walks `moof` fragments when the input is already fragmented.

mod atoms;
mod linear;
mod reader;
mod sample_table;

pub use atoms::{Atom, AtomType, HandlerType, TrackExtends, TrackInfo};
pub use linear::LinearReader;
pub use reader::{read_sample_data, Mp4Reader};
pub use sample_table::{SampleEntry, SampleTable, SampleTableBuilder};

pub(crate) use reader::{read_atom_data, read_atoms};
#[cfg(test)]
pub(crate) use reader::{read_u32, read_u64};

use crate::Result;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Parsed MP4 file with extracted sample tables.
#[derive(Debug)]
pub struct Mp4File {
    /// Duration in timescale units.
    pub duration: u64,
    /// Movie timescale (time units per second).
    pub timescale: u32,
    /// All tracks, in `moov` order.
    pub tracks: Vec<TrackInfo>,
    /// The complete `ftyp` box, if the file has one.
    pub file_type: Option<Vec<u8>>,
    /// Whether `moov` carries an `mvex`, i.e. samples live in `moof` fragments.
    pub has_fragments: bool,
    /// Fragment defaults from `mvex/trex`.
    pub track_extends: Vec<TrackExtends>,
}

impl Mp4File {
    /// Parse an MP4 file from the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::parse(&mut reader)
    }

    /// Parse an MP4 file from a reader.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let mut mp4_reader = Mp4Reader::new(reader);
        mp4_reader.parse()
    }

    /// Find a track by ID.
    pub fn track(&self, track_id: u32) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    /// Fragment defaults for a track, if `mvex` declares them.
    pub fn track_extends(&self, track_id: u32) -> Option<&TrackExtends> {
        self.track_extends.iter().find(|t| t.track_id == track_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_file() -> Mp4File {
        Mp4File {
            duration: 120000,
            timescale: 1000,
            tracks: Vec::new(),
            file_type: None,
            has_fragments: false,
            track_extends: Vec::new(),
        }
    }

    #[test]
    fn test_open_missing_file() {
        let result = Mp4File::open("/nonexistent/mp4frag/input.mp4");
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }

    #[test]
    fn test_track_lookup() {
        let mut mp4 = empty_file();

        let mut audio = TrackInfo::new(1);
        audio.handler_type = HandlerType::Audio;
        let mut video = TrackInfo::new(2);
        video.handler_type = HandlerType::Video;
        mp4.tracks = vec![audio, video];
        mp4.track_extends.push(TrackExtends {
            track_id: 2,
            default_description_index: 1,
            default_duration: 3000,
            default_size: 0,
            default_flags: 0,
        });

        assert!(mp4.track(1).is_some());
        assert!(mp4.track(3).is_none());
        assert_eq!(mp4.track_extends(2).map(|t| t.default_duration), Some(3000));
        assert!(mp4.track_extends(1).is_none());
    }
}
