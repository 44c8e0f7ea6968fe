//! Per-track iteration state.

use super::source::SampleSource;
use crate::fmp4::RandomAccessTable;
use crate::mp4::{HandlerType, SampleEntry};
use crate::Result;

/// Walks one track's samples while fragments are emitted.
#[derive(Debug)]
pub struct TrackCursor {
    pub track_id: u32,
    pub handler_type: HandlerType,
    /// Media timescale of the input track.
    pub timescale: u32,
    pub source: SampleSource,
    /// Index of the look-ahead sample.
    pub sample_index: u32,
    /// Look-ahead sample; synthetic once the track has ended.
    pub sample: SampleEntry,
    /// Running decode time in the output timescale.
    pub timestamp: u64,
    /// Fragments emitted so far for this track.
    pub fragment_index: u32,
    pub eos: bool,
    /// Target fragment duration in the input media timescale.
    pub target_duration: u64,
    pub random_access: RandomAccessTable,
}

impl TrackCursor {
    pub fn new(track_id: u32, handler_type: HandlerType, timescale: u32, source: SampleSource) -> Self {
        Self {
            track_id,
            handler_type,
            timescale,
            source,
            sample_index: 0,
            sample: SampleEntry::default(),
            timestamp: 0,
            fragment_index: 0,
            eos: false,
            target_duration: 0,
            random_access: RandomAccessTable::new(track_id),
        }
    }

    /// Load the first sample; fails when the track has no samples.
    pub fn init(&mut self) -> Result<()> {
        self.sample = self.source.get(0)?;
        Ok(())
    }

    /// Move the look-ahead to `index`, entering end-of-stream past the last sample.
    pub fn advance_to(&mut self, index: u32) -> Result<()> {
        self.sample_index = index;

        if index >= self.source.count() {
            let end_dts = self.sample.end_dts();
            self.sample = SampleEntry {
                dts: end_dts,
                ..Default::default()
            };
            self.eos = true;
        } else {
            self.sample = self.source.get(index)?;
        }

        Ok(())
    }

    /// Whether this track may serve as the anchor.
    pub fn is_audio_or_video(&self) -> bool {
        self.handler_type.is_video() || self.handler_type.is_audio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::source::BufferedSource;
    use crate::Error;

    fn cursor(count: u64) -> TrackCursor {
        let mut source = BufferedSource::new();
        for i in 0..count {
            source.append(SampleEntry {
                offset: 1000 + i * 10,
                size: 10,
                dts: i * 40,
                duration: 40,
                is_keyframe: true,
                ..Default::default()
            });
        }
        TrackCursor::new(1, HandlerType::Video, 1000, SampleSource::Buffered(source))
    }

    #[test]
    fn test_init_loads_first_sample() {
        let mut c = cursor(3);
        c.init().unwrap();
        assert_eq!(c.sample.offset, 1000);
        assert!(!c.eos);
    }

    #[test]
    fn test_init_empty_track_fails() {
        let mut c = cursor(0);
        assert!(matches!(c.init(), Err(Error::OutOfRange { index: 0, count: 0 })));
    }

    #[test]
    fn test_advance_past_end() {
        let mut c = cursor(3);
        c.init().unwrap();
        c.advance_to(2).unwrap();
        assert_eq!(c.sample.dts, 80);

        c.advance_to(3).unwrap();
        assert!(c.eos);
        assert_eq!(c.sample_index, 3);
        assert_eq!(c.sample.dts, 120);
        assert_eq!(c.sample.duration, 0);
        assert_eq!(c.sample.size, 0);
    }
}
