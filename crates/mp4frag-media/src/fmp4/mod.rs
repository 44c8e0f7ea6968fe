//! Fragmented MP4 (fMP4) serialization.
//!
//! This module generates the fMP4 structures written by the fragmenter:
//! - Init segment (ftyp + moov with mvex, no samples)
//! - Fragment headers (moof + mdat header)
//! - Random-access index (mfra)

pub(crate) mod boxes;
mod mfra;
mod moof;

pub use mfra::{write_mfra, RandomAccessEntry, RandomAccessTable};
pub use moof::{MoofBuilder, TrunEntry};

use crate::mp4::HandlerType;
use boxes::{end_box, start_box, start_full_box};
use bytes::{BufMut, BytesMut};

/// Initialization segment containing ftyp and moov.
#[derive(Debug, Clone)]
pub struct InitSegment {
    /// Serialized init segment data.
    pub data: Vec<u8>,
    /// Movie timescale.
    pub timescale: u32,
    /// Movie duration in movie timescale units.
    pub duration: u64,
}

impl InitSegment {
    /// Create a new init segment builder.
    pub fn builder() -> InitSegmentBuilder {
        InitSegmentBuilder::new()
    }
}

/// One output track of the init segment.
#[derive(Debug, Clone)]
pub struct InitTrack {
    pub track_id: u32,
    pub handler_type: HandlerType,
    pub handler_name: Vec<u8>,
    /// Track duration in the output movie timescale.
    pub duration: u64,
    /// Media timescale written to mdhd.
    pub media_timescale: u32,
    pub language: u16,
    pub width: u32,
    pub height: u32,
    /// Complete stsd box copied from the input, if any.
    pub sample_descriptions: Option<Vec<u8>>,
}

/// Builder for creating init segments.
pub struct InitSegmentBuilder {
    file_type: Option<Vec<u8>>,
    timescale: u32,
    tracks: Vec<InitTrack>,
}

impl InitSegmentBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            file_type: None,
            timescale: 1000,
            tracks: Vec::new(),
        }
    }

    /// Set movie timescale.
    pub fn timescale(mut self, ts: u32) -> Self {
        self.timescale = ts;
        self
    }

    /// Copy a complete ftyp box in front of the moov.
    pub fn file_type(mut self, ftyp: Option<Vec<u8>>) -> Self {
        self.file_type = ftyp;
        self
    }

    /// Add an output track.
    pub fn track(mut self, track: InitTrack) -> Self {
        self.tracks.push(track);
        self
    }

    /// Movie duration: the longest track.
    pub fn duration(&self) -> u64 {
        self.tracks.iter().map(|t| t.duration).max().unwrap_or(0)
    }

    /// Build the init segment.
    pub fn build(self) -> InitSegment {
        let mut buf = BytesMut::with_capacity(1024);

        if let Some(ftyp) = &self.file_type {
            buf.put_slice(ftyp);
        }

        let duration = self.duration();
        self.write_moov(&mut buf, duration);

        InitSegment {
            data: buf.to_vec(),
            timescale: self.timescale,
            duration,
        }
    }

    fn write_moov(&self, buf: &mut BytesMut, duration: u64) {
        let moov = start_box(buf, b"moov");

        let next_track_id = self.tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;
        boxes::write_mvhd(buf, self.timescale, duration, next_track_id);

        for track in &self.tracks {
            self.write_trak(buf, track);
        }

        // mvex (movie extends for fragmented)
        let mvex = start_box(buf, b"mvex");
        boxes::write_mehd(buf, duration);
        for track in &self.tracks {
            boxes::write_trex(buf, track.track_id);
        }
        end_box(buf, mvex);

        end_box(buf, moov);
    }

    fn write_trak(&self, buf: &mut BytesMut, track: &InitTrack) {
        let trak = start_box(buf, b"trak");

        boxes::write_tkhd(
            buf,
            track.track_id,
            track.duration,
            track.handler_type.is_audio(),
            track.width,
            track.height,
        );

        let mdia = start_box(buf, b"mdia");
        boxes::write_mdhd(buf, track.media_timescale, 0, track.language);
        boxes::write_hdlr(buf, &track.handler_type.to_bytes(), &track.handler_name);

        let minf = start_box(buf, b"minf");
        match track.handler_type {
            HandlerType::Video => boxes::write_vmhd(buf),
            HandlerType::Audio => boxes::write_smhd(buf),
            _ => boxes::write_nmhd(buf),
        }
        boxes::write_dinf(buf);
        match &track.sample_descriptions {
            Some(stsd) => boxes::write_empty_stbl(buf, stsd),
            None => {
                let mut stsd = BytesMut::with_capacity(16);
                let start = start_full_box(&mut stsd, b"stsd", 0, 0);
                stsd.put_u32(0); // entry count
                end_box(&mut stsd, start);
                boxes::write_empty_stbl(buf, &stsd);
            }
        }
        end_box(buf, minf);

        end_box(buf, mdia);
        end_box(buf, trak);
    }
}

impl Default for InitSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::Mp4File;
    use std::io::Cursor;

    fn video_track(id: u32, duration: u64) -> InitTrack {
        InitTrack {
            track_id: id,
            handler_type: HandlerType::Video,
            handler_name: b"VideoHandler".to_vec(),
            duration,
            media_timescale: 90000,
            language: 0x55C4,
            width: 1280,
            height: 720,
            sample_descriptions: None,
        }
    }

    #[test]
    fn test_init_segment_parses_back() {
        let mut audio = video_track(3, 9000);
        audio.handler_type = HandlerType::Audio;
        audio.handler_name = b"SoundHandler".to_vec();
        audio.media_timescale = 48000;

        let ftyp = {
            let mut b = BytesMut::new();
            let start = start_box(&mut b, b"ftyp");
            b.put_slice(b"isom");
            b.put_u32(0x200);
            b.put_slice(b"isomiso6");
            end_box(&mut b, start);
            b.to_vec()
        };

        let init = InitSegment::builder()
            .file_type(Some(ftyp.clone()))
            .track(video_track(1, 10000))
            .track(audio)
            .build();

        assert_eq!(init.duration, 10000);
        assert!(init.data.starts_with(&ftyp));

        let mp4 = Mp4File::parse(&mut Cursor::new(init.data)).unwrap();
        assert!(mp4.has_fragments);
        assert_eq!(mp4.file_type, Some(ftyp));
        assert_eq!(mp4.timescale, 1000);
        assert_eq!(mp4.duration, 10000);
        assert_eq!(mp4.tracks.len(), 2);
        assert_eq!(mp4.tracks[0].width, Some(1280));
        assert_eq!(mp4.tracks[0].handler_name, b"VideoHandler");
        assert_eq!(mp4.tracks[1].timescale, 48000);
        assert_eq!(mp4.tracks[1].duration, 9000);
        assert_eq!(mp4.tracks[1].sample_count(), 0);
        assert_eq!(mp4.track_extends.len(), 2);
        assert_eq!(mp4.track_extends[1].track_id, 3);
        assert_eq!(mp4.track_extends[1].default_description_index, 1);
    }

    #[test]
    fn test_next_track_id() {
        let init = InitSegment::builder()
            .track(video_track(7, 0))
            .track(video_track(2, 0))
            .build();

        // mvhd follows the 8-byte moov header; next_track_ID is its last field
        let next = crate::mp4::read_u32(&init.data, 8 + 116);
        assert_eq!(next, 8);
    }

    #[test]
    fn test_stsd_copied_verbatim() {
        let stsd = vec![0, 0, 0, 16, b's', b't', b's', b'd', 0, 0, 0, 0, 0, 0, 0, 1];
        let mut track = video_track(1, 0);
        track.sample_descriptions = Some(stsd.clone());

        let init = InitSegment::builder().track(track).build();
        assert!(init
            .data
            .windows(stsd.len())
            .any(|w| w == stsd.as_slice()));
    }
}
