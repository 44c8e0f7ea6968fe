//! Track selection and fragment boundary search.
//!
//! Each iteration of the fragmenter asks the [`Scheduler`] which track emits
//! the next fragment. Tracks whose fragment count lags behind the anchor's
//! catch up first; otherwise the anchor itself is due. Once a track is
//! picked, [`target_timestamp`] and [`find_fragment_end`] decide how many
//! samples go into the fragment.

use super::cursor::TrackCursor;
use super::rescale;
use super::source::SampleSource;
use crate::{Error, Result};
use tracing::debug;

/// The track picked for the next fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// A track behind the anchor's fragment count.
    CatchUp(usize),
    /// The anchor track itself.
    Anchor(usize),
}

impl Pick {
    pub fn index(self) -> usize {
        match self {
            Self::CatchUp(i) | Self::Anchor(i) => i,
        }
    }

    pub fn is_anchor(self) -> bool {
        matches!(self, Self::Anchor(_))
    }
}

/// Samples of one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPlan {
    /// Exclusive end index chosen by the boundary search.
    pub end: u32,
    /// Sample indices in the fragment, in order. Never empty.
    pub indices: Vec<u32>,
}

/// Chooses which track emits the next fragment.
#[derive(Debug)]
pub struct Scheduler {
    anchor: Option<usize>,
}

impl Scheduler {
    /// Anchor on the first video track, else the first audio track.
    pub fn new(cursors: &[TrackCursor]) -> Result<Self> {
        let anchor = cursors
            .iter()
            .position(|c| c.handler_type.is_video())
            .or_else(|| cursors.iter().position(|c| c.handler_type.is_audio()))
            .ok_or_else(|| Error::configuration("no audio or video track to anchor on"))?;

        debug!(track_id = cursors[anchor].track_id, "Using anchor track");
        Ok(Self {
            anchor: Some(anchor),
        })
    }

    /// Current anchor cursor index.
    pub fn anchor(&self) -> Option<usize> {
        self.anchor
    }

    /// Pick the next track, or `None` when every track has ended.
    pub fn next(&mut self, cursors: &[TrackCursor]) -> Option<Pick> {
        let anchor = self.anchor?;

        let anchor_fragments = cursors[anchor].fragment_index;
        if let Some(i) = cursors
            .iter()
            .position(|c| !c.eos && c.fragment_index < anchor_fragments)
        {
            return Some(Pick::CatchUp(i));
        }

        if cursors[anchor].eos {
            self.anchor = cursors
                .iter()
                .position(|c| !c.eos && c.is_audio_or_video())
                .or_else(|| cursors.iter().position(|c| !c.eos));

            match self.anchor {
                Some(i) => debug!(track_id = cursors[i].track_id, "New anchor"),
                None => debug!("All tracks ended"),
            }
        }

        self.anchor.map(Pick::Anchor)
    }
}

/// Decode time (picked track's media timescale) the fragment should end near.
pub fn target_timestamp(cursor: &TrackCursor, anchor: &TrackCursor, is_anchor: bool) -> u64 {
    let own_target = cursor.sample.dts + cursor.target_duration;
    if is_anchor {
        return own_target;
    }

    let target = rescale(anchor.sample.dts, anchor.timescale, cursor.timescale);
    if target <= cursor.sample.dts {
        // Past the anchor's last sample
        own_target
    } else {
        target
    }
}

/// Exclusive end index of the fragment starting at `start`.
///
/// Candidates are the sync samples from `start` on, plus the end of the
/// track. The candidate closest to `target` wins; the scan stops at the
/// first improving candidate at or past the target.
pub fn find_fragment_end(source: &SampleSource, start: u32, target: u64) -> Result<u32> {
    let count = source.count();
    let mut end = count;
    let mut smallest_diff = u64::MAX;

    for i in start..=count {
        let dts = if i < count {
            let sample = source.get(i)?;
            if !sample.is_keyframe {
                continue;
            }
            sample.dts
        } else {
            match count.checked_sub(1) {
                Some(last) => source.get(last)?.end_dts(),
                None => break,
            }
        };

        let diff = dts as i128 - target as i128;
        let abs_diff = diff.unsigned_abs().min(u64::MAX as u128) as u64;
        if abs_diff < smallest_diff {
            end = i;
            smallest_diff = abs_diff;
            if diff >= 0 {
                break;
            }
        }
    }

    Ok(end)
}

/// Samples of the next fragment: at least the look-ahead sample.
pub fn plan_fragment(cursor: &TrackCursor, end: u32) -> FragmentPlan {
    let start = cursor.sample_index;
    let stop = end.clamp(start + 1, cursor.source.count().max(start + 1));
    FragmentPlan {
        end,
        indices: (start..stop).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::source::BufferedSource;
    use crate::mp4::{HandlerType, SampleEntry};

    fn source(keyframes: &[bool], duration: u32) -> SampleSource {
        let mut source = BufferedSource::new();
        for (i, key) in keyframes.iter().enumerate() {
            source.append(SampleEntry {
                dts: i as u64 * duration as u64,
                duration,
                size: 1,
                is_keyframe: *key,
                ..Default::default()
            });
        }
        SampleSource::Buffered(source)
    }

    fn cursor(id: u32, handler: HandlerType, timescale: u32, keyframes: &[bool], duration: u32) -> TrackCursor {
        let mut c = TrackCursor::new(id, handler, timescale, source(keyframes, duration));
        c.init().unwrap();
        c
    }

    #[test]
    fn test_boundary_scenario() {
        // 5 samples of duration 10, all sync, target 20 units
        let mut c = cursor(1, HandlerType::Video, 10, &[true; 5], 10);
        c.target_duration = 20;

        let mut ends = Vec::new();
        while !c.eos {
            let target = target_timestamp(&c, &c, true);
            let end = find_fragment_end(&c.source, c.sample_index, target).unwrap();
            let plan = plan_fragment(&c, end);
            for i in &plan.indices {
                c.advance_to(i + 1).unwrap();
            }
            ends.push(c.sample_index);
        }

        assert_eq!(ends, vec![2, 4, 5]);
    }

    #[test]
    fn test_boundary_skips_non_sync() {
        let s = source(&[true, false, false, true, false, false], 10);
        assert_eq!(find_fragment_end(&s, 0, 20).unwrap(), 3);
        // closer to the end of the track than to sample 3
        assert_eq!(find_fragment_end(&s, 3, 55).unwrap(), 6);
    }

    #[test]
    fn test_boundary_prefers_closer_earlier_sync() {
        let s = source(&[true, false, true, false, false, false, true], 10);
        // sync at 20 (diff 9) beats sync at 60 (diff 31)
        assert_eq!(find_fragment_end(&s, 0, 29).unwrap(), 2);
    }

    #[test]
    fn test_boundary_is_idempotent() {
        let s = source(&[true, false, true, true, false, true], 7);
        let first = find_fragment_end(&s, 1, 25).unwrap();
        let second = find_fragment_end(&s, 1, 25).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_plan_includes_look_ahead() {
        let c = cursor(1, HandlerType::Video, 10, &[true, true, true], 10);
        let plan = plan_fragment(&c, 0);
        assert_eq!(plan.indices, vec![0]);

        let plan = plan_fragment(&c, 3);
        assert_eq!(plan.indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_target_for_non_anchor() {
        let mut anchor = cursor(1, HandlerType::Video, 90000, &[true; 4], 3000);
        let mut audio = cursor(2, HandlerType::Audio, 48000, &[true; 8], 1024);
        audio.target_duration = 96000;

        anchor.advance_to(3).unwrap();
        // anchor at 9000/90000 = 0.1 s, i.e. 4800 audio units
        assert_eq!(target_timestamp(&audio, &anchor, false), 4800);

        audio.advance_to(5).unwrap();
        // audio already past the anchor
        assert_eq!(target_timestamp(&audio, &anchor, false), 5 * 1024 + 96000);
    }

    #[test]
    fn test_initial_anchor() {
        let cursors = vec![
            cursor(1, HandlerType::Audio, 48000, &[true], 1024),
            cursor(2, HandlerType::Video, 90000, &[true], 3000),
        ];
        assert_eq!(Scheduler::new(&cursors).unwrap().anchor(), Some(1));

        let cursors = vec![
            cursor(1, HandlerType::Text, 1000, &[true], 10),
            cursor(2, HandlerType::Audio, 48000, &[true], 1024),
        ];
        assert_eq!(Scheduler::new(&cursors).unwrap().anchor(), Some(1));

        let cursors = vec![cursor(1, HandlerType::Text, 1000, &[true], 10)];
        assert!(matches!(Scheduler::new(&cursors), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_catch_up_then_anchor() {
        let mut cursors = vec![
            cursor(1, HandlerType::Video, 1000, &[true; 4], 10),
            cursor(2, HandlerType::Audio, 1000, &[true; 4], 10),
        ];
        let mut scheduler = Scheduler::new(&cursors).unwrap();

        assert_eq!(scheduler.next(&cursors), Some(Pick::Anchor(0)));
        cursors[0].fragment_index = 1;
        assert_eq!(scheduler.next(&cursors), Some(Pick::CatchUp(1)));
        cursors[1].fragment_index = 1;
        assert_eq!(scheduler.next(&cursors), Some(Pick::Anchor(0)));
    }

    #[test]
    fn test_anchor_reselection() {
        let mut cursors = vec![
            cursor(1, HandlerType::Text, 1000, &[true; 4], 10),
            cursor(2, HandlerType::Video, 1000, &[true; 4], 10),
            cursor(3, HandlerType::Audio, 1000, &[true; 4], 10),
        ];
        let mut scheduler = Scheduler::new(&cursors).unwrap();
        assert_eq!(scheduler.anchor(), Some(1));

        cursors[1].eos = true;
        // first non-ended audio/video track wins over the earlier text track
        assert_eq!(scheduler.next(&cursors), Some(Pick::Anchor(2)));

        cursors[2].eos = true;
        assert_eq!(scheduler.next(&cursors), Some(Pick::Anchor(0)));

        cursors[0].eos = true;
        assert_eq!(scheduler.next(&cursors), None);
        assert_eq!(scheduler.anchor(), None);
    }
}
