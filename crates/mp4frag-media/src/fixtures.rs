//! Synthetic progressive MP4 files for tests and benchmarks.
//!
//! The files carry real sample tables and deterministic payloads, so the
//! fragmenter output can be checked byte for byte with [`payload`].

use crate::fmp4::boxes::{
    end_box, start_box, start_full_box, write_dinf, write_hdlr, write_nmhd, write_smhd, write_vmhd,
};
use crate::mp4::HandlerType;
use bytes::{BufMut, BytesMut};

/// Deterministic payload of sample `index` of `track_id`.
pub fn payload(track_id: u32, index: u32, size: u32) -> Vec<u8> {
    (0..size)
        .map(|i| (track_id as u8).wrapping_mul(31) ^ (index as u8).wrapping_add(i as u8))
        .collect()
}

/// One sample of a fixture track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureSample {
    pub duration: u32,
    pub size: u32,
    pub is_sync: bool,
    pub cts_offset: i32,
    /// 0-based sample description index.
    pub description_index: u32,
}

impl FixtureSample {
    /// `count` samples with a sync sample every `gop` samples.
    pub fn gop(count: u32, gop: u32, duration: u32) -> Vec<Self> {
        (0..count)
            .map(|i| Self {
                duration,
                size: 40 + (i % 5) * 8,
                is_sync: i % gop == 0,
                cts_offset: 0,
                description_index: 0,
            })
            .collect()
    }

    /// `count` sync samples of equal duration.
    pub fn constant(count: u32, duration: u32) -> Vec<Self> {
        (0..count)
            .map(|i| Self {
                duration,
                size: 20 + i % 3,
                is_sync: true,
                cts_offset: 0,
                description_index: 0,
            })
            .collect()
    }
}

/// One track of a fixture file.
#[derive(Debug, Clone)]
pub struct FixtureTrack {
    pub track_id: u32,
    pub handler_type: HandlerType,
    pub timescale: u32,
    pub width: u32,
    pub height: u32,
    pub samples: Vec<FixtureSample>,
}

impl FixtureTrack {
    pub fn video(track_id: u32, timescale: u32) -> Self {
        Self {
            track_id,
            handler_type: HandlerType::Video,
            timescale,
            width: 640,
            height: 360,
            samples: Vec::new(),
        }
    }

    pub fn audio(track_id: u32, timescale: u32) -> Self {
        Self {
            track_id,
            handler_type: HandlerType::Audio,
            timescale,
            width: 0,
            height: 0,
            samples: Vec::new(),
        }
    }

    pub fn text(track_id: u32, timescale: u32) -> Self {
        Self {
            track_id,
            handler_type: HandlerType::Text,
            timescale,
            width: 0,
            height: 0,
            samples: Vec::new(),
        }
    }

    pub fn samples(mut self, samples: Vec<FixtureSample>) -> Self {
        self.samples = samples;
        self
    }

    /// Sum of sample durations in the media timescale.
    pub fn media_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    fn description_count(&self) -> u32 {
        self.samples
            .iter()
            .map(|s| s.description_index + 1)
            .max()
            .unwrap_or(1)
    }
}

/// Builder for a progressive MP4: ftyp, mdat, then moov.
#[derive(Debug, Clone)]
pub struct ProgressiveFixture {
    movie_timescale: u32,
    tracks: Vec<FixtureTrack>,
}

impl ProgressiveFixture {
    pub fn new() -> Self {
        Self {
            movie_timescale: 1000,
            tracks: Vec::new(),
        }
    }

    pub fn movie_timescale(mut self, timescale: u32) -> Self {
        self.movie_timescale = timescale;
        self
    }

    pub fn track(mut self, track: FixtureTrack) -> Self {
        self.tracks.push(track);
        self
    }

    /// Serialize the file.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4096);

        let ftyp = start_box(&mut buf, b"ftyp");
        buf.put_slice(b"isom");
        buf.put_u32(0x200);
        buf.put_slice(b"isomiso2avc1mp41");
        end_box(&mut buf, ftyp);

        // One chunk per sample, tracks stored one after the other
        let mdat = start_box(&mut buf, b"mdat");
        let mut offsets = Vec::with_capacity(self.tracks.len());
        for track in &self.tracks {
            let mut track_offsets = Vec::with_capacity(track.samples.len());
            for (i, sample) in track.samples.iter().enumerate() {
                track_offsets.push(buf.len() as u64);
                buf.put_slice(&payload(track.track_id, i as u32, sample.size));
            }
            offsets.push(track_offsets);
        }
        end_box(&mut buf, mdat);

        let moov = start_box(&mut buf, b"moov");
        let movie_duration = self
            .tracks
            .iter()
            .map(|t| self.movie_duration(t))
            .max()
            .unwrap_or(0);
        self.write_mvhd(&mut buf, movie_duration);
        for (track, offsets) in self.tracks.iter().zip(&offsets) {
            self.write_trak(&mut buf, track, offsets);
        }
        end_box(&mut buf, moov);

        buf.to_vec()
    }

    fn movie_duration(&self, track: &FixtureTrack) -> u64 {
        if track.timescale == 0 {
            return 0;
        }
        track.media_duration() * self.movie_timescale as u64 / track.timescale as u64
    }

    fn write_mvhd(&self, buf: &mut BytesMut, duration: u64) {
        let start = start_full_box(buf, b"mvhd", 0, 0);
        buf.put_u32(0); // creation_time
        buf.put_u32(0); // modification_time
        buf.put_u32(self.movie_timescale);
        buf.put_u32(duration as u32);
        buf.put_u32(0x00010000);
        buf.put_u16(0x0100);
        buf.put_slice(&[0u8; 10]);
        buf.put_slice(&[0u8; 36]); // matrix
        buf.put_slice(&[0u8; 24]);
        let next = self.tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;
        buf.put_u32(next);
        end_box(buf, start);
    }

    fn write_trak(&self, buf: &mut BytesMut, track: &FixtureTrack, offsets: &[u64]) {
        let trak = start_box(buf, b"trak");

        let tkhd = start_full_box(buf, b"tkhd", 0, 7);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(track.track_id);
        buf.put_u32(0);
        buf.put_u32(self.movie_duration(track) as u32);
        buf.put_slice(&[0u8; 8]);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u16(if track.handler_type.is_audio() { 0x0100 } else { 0 });
        buf.put_u16(0);
        buf.put_slice(&[0u8; 36]); // matrix
        buf.put_u32(track.width << 16);
        buf.put_u32(track.height << 16);
        end_box(buf, tkhd);

        let mdia = start_box(buf, b"mdia");
        let mdhd = start_full_box(buf, b"mdhd", 0, 0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(track.timescale);
        buf.put_u32(track.media_duration() as u32);
        buf.put_u16(0x15C7); // "eng"
        buf.put_u16(0);
        end_box(buf, mdhd);

        let name: &[u8] = match track.handler_type {
            HandlerType::Video => b"VideoHandler",
            HandlerType::Audio => b"SoundHandler",
            _ => b"TextHandler",
        };
        write_hdlr(buf, &track.handler_type.to_bytes(), name);

        let minf = start_box(buf, b"minf");
        match track.handler_type {
            HandlerType::Video => write_vmhd(buf),
            HandlerType::Audio => write_smhd(buf),
            _ => write_nmhd(buf),
        }
        write_dinf(buf);
        self.write_stbl(buf, track, offsets);
        end_box(buf, minf);

        end_box(buf, mdia);
        end_box(buf, trak);
    }

    fn write_stbl(&self, buf: &mut BytesMut, track: &FixtureTrack, offsets: &[u64]) {
        let stbl = start_box(buf, b"stbl");
        let samples = &track.samples;

        let stsd = start_full_box(buf, b"stsd", 0, 0);
        let count = track.description_count();
        buf.put_u32(count);
        let entry_type: &[u8; 4] = match track.handler_type {
            HandlerType::Video => b"avc1",
            HandlerType::Audio => b"mp4a",
            _ => b"tx3g",
        };
        for i in 0..count {
            let entry = start_box(buf, entry_type);
            buf.put_slice(&[0u8; 6]);
            buf.put_u16(1); // data reference index
            buf.put_u32(i); // distinguishes the entries
            end_box(buf, entry);
        }
        end_box(buf, stsd);

        let mut stts: Vec<(u32, u32)> = Vec::new();
        for s in samples {
            match stts.last_mut() {
                Some((count, delta)) if *delta == s.duration => *count += 1,
                _ => stts.push((1, s.duration)),
            }
        }
        let start = start_full_box(buf, b"stts", 0, 0);
        buf.put_u32(stts.len() as u32);
        for (count, delta) in &stts {
            buf.put_u32(*count);
            buf.put_u32(*delta);
        }
        end_box(buf, start);

        if samples.iter().any(|s| s.cts_offset != 0) {
            let signed = samples.iter().any(|s| s.cts_offset < 0);
            let start = start_full_box(buf, b"ctts", u8::from(signed), 0);
            buf.put_u32(samples.len() as u32);
            for s in samples {
                buf.put_u32(1);
                buf.put_i32(s.cts_offset);
            }
            end_box(buf, start);
        }

        if samples.iter().any(|s| !s.is_sync) {
            let sync: Vec<u32> = samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_sync)
                .map(|(i, _)| i as u32 + 1)
                .collect();
            let start = start_full_box(buf, b"stss", 0, 0);
            buf.put_u32(sync.len() as u32);
            for n in sync {
                buf.put_u32(n);
            }
            end_box(buf, start);
        }

        // One sample per chunk; a new stsc entry whenever the description changes
        let mut stsc: Vec<(u32, u32)> = Vec::new();
        for (i, s) in samples.iter().enumerate() {
            if stsc.last().map(|(_, d)| *d) != Some(s.description_index + 1) {
                stsc.push((i as u32 + 1, s.description_index + 1));
            }
        }
        let start = start_full_box(buf, b"stsc", 0, 0);
        buf.put_u32(stsc.len() as u32);
        for (first_chunk, description) in stsc {
            buf.put_u32(first_chunk);
            buf.put_u32(1);
            buf.put_u32(description);
        }
        end_box(buf, start);

        let start = start_full_box(buf, b"stsz", 0, 0);
        buf.put_u32(0);
        buf.put_u32(samples.len() as u32);
        for s in samples {
            buf.put_u32(s.size);
        }
        end_box(buf, start);

        let start = start_full_box(buf, b"stco", 0, 0);
        buf.put_u32(offsets.len() as u32);
        for offset in offsets {
            buf.put_u32(*offset as u32);
        }
        end_box(buf, start);

        end_box(buf, stbl);
    }
}

impl Default for ProgressiveFixture {
    fn default() -> Self {
        Self::new()
    }
}
