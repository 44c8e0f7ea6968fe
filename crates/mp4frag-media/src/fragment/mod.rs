//! MP4 fragmentation.
//!
//! Turns a progressive (or already fragmented) MP4 into a fragmented one:
//! an init segment, one `moof` + `mdat` pair per fragment, and a trailing
//! `mfra` random-access index.
//!
//! # Example
//!
//! ```no_run
//! use mp4frag_media::fragment::{fragment_file, FragmentOptions};
//!
//! let options = FragmentOptions {
//!     fragment_duration: Some(4000),
//!     ..Default::default()
//! };
//! let report = fragment_file("input.mp4", "output.mp4", &options)?;
//! println!("{} fragments", report.fragments);
//! # Ok::<(), mp4frag_media::Error>(())
//! ```

mod cursor;
mod estimate;
mod schedule;
mod source;
mod writer;

pub use cursor::TrackCursor;
pub use estimate::{estimate_fragment_duration, resolve_fragment_duration};
pub use schedule::{find_fragment_end, plan_fragment, target_timestamp, FragmentPlan, Pick, Scheduler};
pub use source::{BufferedSource, SampleSource, TableSource};
pub use writer::{CountingWriter, FragmentWriter};

use crate::fmp4::{InitSegment, InitTrack};
use crate::mp4::{LinearReader, Mp4File};
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Fragment duration used when none is given or detected.
pub const DEFAULT_FRAGMENT_DURATION_MS: u32 = 2000;

/// Detected durations above this are ignored.
pub const MAX_AUTO_FRAGMENT_DURATION_MS: u32 = 15000;

/// Output movie timescale when no override is given.
pub const DEFAULT_MOVIE_TIMESCALE: u32 = 1000;

/// Convert `value` between timescales, rounding to the nearest unit.
pub fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    if from == to {
        return value;
    }
    let from = from as u128;
    let scaled = (value as u128 * to as u128 + from / 2) / from;
    scaled.min(u64::MAX as u128) as u64
}

/// [`rescale`] for signed values, rounding half away from zero.
pub fn rescale_signed(value: i64, from: u32, to: u32) -> i64 {
    let magnitude = rescale(value.unsigned_abs(), from, to).min(i64::MAX as u64) as i64;
    if value < 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Options for one fragmentation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentOptions {
    /// Fragment duration in milliseconds; detected from the video track when `None`.
    pub fragment_duration: Option<u32>,
    /// Output timescale for every track and the movie header.
    pub timescale: Option<u32>,
    /// 0 (quiet) to 3.
    pub verbosity: u8,
    /// Log boundary decisions; implies verbosity 1.
    pub debug: bool,
}

impl FragmentOptions {
    /// Verbosity after applying the debug flag.
    pub fn effective_verbosity(&self) -> u8 {
        if self.debug {
            self.verbosity.max(1)
        } else {
            self.verbosity
        }
    }
}

/// Per-track outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct TrackReport {
    pub track_id: u32,
    pub handler: String,
    pub fragments: u32,
    pub samples: u32,
    /// Total duration in the track's output timescale.
    pub duration: u64,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct FragmentReport {
    /// Fragment duration used, in milliseconds.
    pub fragment_duration: u32,
    /// Total fragments across all tracks.
    pub fragments: u32,
    pub bytes_written: u64,
    pub tracks: Vec<TrackReport>,
}

/// Fragment the MP4 at `input` into `output`.
///
/// The output file is only created once the input has been accepted.
pub fn fragment_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    options: &FragmentOptions,
) -> Result<FragmentReport> {
    let mut reader = BufReader::new(File::open(input)?);
    let file = Mp4File::parse(&mut reader)?;
    let prepared = Fragmenter::new(file, options.clone()).prepare(&mut reader)?;
    let writer = BufWriter::new(File::create(output)?);
    prepared.write(&mut reader, writer)
}

/// Fragments one parsed input.
pub struct Fragmenter {
    file: Mp4File,
    options: FragmentOptions,
}

impl Fragmenter {
    pub fn new(file: Mp4File, options: FragmentOptions) -> Self {
        Self { file, options }
    }

    /// Write the fragmented version of `input` to `output`.
    ///
    /// `input` must be the stream the [`Mp4File`] was parsed from. Track
    /// selection problems are reported before anything is written.
    pub fn run<R: Read + Seek, W: Write>(self, input: &mut R, output: W) -> Result<FragmentReport> {
        self.prepare(input)?.write(input, output)
    }

    /// Select tracks, load their samples and build the init segment.
    ///
    /// Every track selection error surfaces here; nothing is written.
    pub fn prepare<R: Read + Seek>(mut self, input: &mut R) -> Result<PreparedRun> {
        let has_fragments = self.file.has_fragments;
        if has_fragments {
            info!("File is already fragmented, it will be re-fragmented");
        }

        let movie_timescale = self.options.timescale.unwrap_or(DEFAULT_MOVIE_TIMESCALE);
        let mut cursors = Vec::new();
        let mut init_tracks = Vec::new();
        let mut video_tracks = 0;

        for track in &mut self.file.tracks {
            if track.sample_table.is_empty() && !has_fragments {
                warn!(track_id = track.track_id, "Track has no samples, it will be skipped");
                continue;
            }

            if track.handler_type.is_video() {
                video_tracks += 1;
                if video_tracks == 2 {
                    warn!("More than one video track found");
                }
            }

            init_tracks.push(InitTrack {
                track_id: track.track_id,
                handler_type: track.handler_type,
                handler_name: track.handler_name.clone(),
                duration: if track.duration > 0 {
                    rescale(track.duration, self.file.timescale, movie_timescale)
                } else {
                    rescale(track.media_duration, track.timescale, movie_timescale)
                },
                media_timescale: self.options.timescale.unwrap_or(track.timescale),
                language: track.language,
                width: track.width.unwrap_or(0),
                height: track.height.unwrap_or(0),
                sample_descriptions: track.sample_descriptions.clone(),
            });

            let source = if has_fragments {
                SampleSource::Buffered(BufferedSource::new())
            } else {
                SampleSource::from(std::mem::take(&mut track.sample_table))
            };
            cursors.push(TrackCursor::new(
                track.track_id,
                track.handler_type,
                track.timescale,
                source,
            ));
        }

        if has_fragments {
            self.extract_samples(input, &mut cursors)?;

            // Declared tracks without fragment samples are normal here
            cursors.retain(|c| {
                let keep = c.source.count() > 0;
                if !keep {
                    debug!(track_id = c.track_id, "Track has no fragment samples, it will be skipped");
                }
                keep
            });
            init_tracks.retain(|t| cursors.iter().any(|c| c.track_id == t.track_id));
        }

        if cursors.is_empty() {
            return Err(Error::configuration("no valid track found"));
        }
        if !cursors.iter().any(|c| c.is_audio_or_video()) {
            return Err(Error::configuration("no audio or video track in the file"));
        }

        let fragment_duration = self.fragment_duration(&cursors)?;
        info!(fragment_duration, "Fragment duration");

        for cursor in &mut cursors {
            cursor.init()?;
            cursor.target_duration = rescale(fragment_duration as u64, 1000, cursor.timescale);
        }

        let scheduler = Scheduler::new(&cursors)?;

        let mut builder = InitSegment::builder()
            .timescale(movie_timescale)
            .file_type(self.file.file_type.take());
        for track in init_tracks {
            builder = builder.track(track);
        }

        Ok(PreparedRun {
            init: builder.build(),
            scheduler,
            cursors,
            fragment_duration,
            options: self.options,
        })
    }

    /// Fill the buffered sources from a fragmented input.
    fn extract_samples<R: Read + Seek>(&self, input: &mut R, cursors: &mut [TrackCursor]) -> Result<()> {
        let mut reader = LinearReader::new();
        for cursor in cursors.iter() {
            reader.enable_track(&self.file, cursor.track_id)?;
        }

        while let Some((track_id, sample)) = reader.next_sample(input)? {
            if let Some(cursor) = cursors.iter_mut().find(|c| c.track_id == track_id) {
                cursor.source.buffered_mut()?.append(sample);
            }
        }

        Ok(())
    }

    fn fragment_duration(&self, cursors: &[TrackCursor]) -> Result<u32> {
        if let Some(ms) = self.options.fragment_duration {
            return Ok(ms);
        }

        let estimate = match cursors.iter().find(|c| c.handler_type.is_video()) {
            Some(video) => estimate_fragment_duration(&video.source, video.timescale)?,
            None => {
                info!("No video track, cannot detect fragment duration");
                None
            }
        };
        Ok(resolve_fragment_duration(estimate))
    }
}

/// A validated run, ready to write.
pub struct PreparedRun {
    init: InitSegment,
    scheduler: Scheduler,
    cursors: Vec<TrackCursor>,
    fragment_duration: u32,
    options: FragmentOptions,
}

impl PreparedRun {
    /// Fragment duration in milliseconds.
    pub fn fragment_duration(&self) -> u32 {
        self.fragment_duration
    }

    /// Write the init segment, every fragment and the mfra index.
    pub fn write<R: Read + Seek, W: Write>(self, input: &mut R, output: W) -> Result<FragmentReport> {
        let mut writer = FragmentWriter::new(output, &self.options);
        writer.write_header(&self.init.data)?;
        let tracks = writer.run(self.scheduler, self.cursors, input)?;

        let report = FragmentReport {
            fragment_duration: self.fragment_duration,
            fragments: writer.fragment_count(),
            bytes_written: writer.position(),
            tracks,
        };
        info!(
            fragments = report.fragments,
            bytes = report.bytes_written,
            "Fragmentation complete"
        );
        Ok(report)
    }
}
