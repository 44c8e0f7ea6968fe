//! Fragment serialization and the interleaving loop.

use super::cursor::TrackCursor;
use super::schedule::{find_fragment_end, plan_fragment, target_timestamp, FragmentPlan, Scheduler};
use super::{rescale, rescale_signed, FragmentOptions, TrackReport};
use crate::fmp4::{write_mfra, MoofBuilder, RandomAccessTable, TrunEntry};
use crate::mp4::read_sample_data;
use crate::Result;
use std::io::{self, Read, Seek, Write};
use tracing::{debug, info};

/// Append-only writer that knows how many bytes went through it.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    position: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes the fragmented output stream.
pub struct FragmentWriter<W> {
    out: CountingWriter<W>,
    sequence_number: u32,
    timescale: Option<u32>,
    verbosity: u8,
    debug: bool,
    payload: Vec<u8>,
}

impl<W: Write> FragmentWriter<W> {
    pub fn new(output: W, options: &FragmentOptions) -> Self {
        Self {
            out: CountingWriter::new(output),
            sequence_number: 1,
            timescale: options.timescale,
            verbosity: options.effective_verbosity(),
            debug: options.debug,
            payload: Vec::new(),
        }
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.out.position()
    }

    /// Fragments written so far.
    pub fn fragment_count(&self) -> u32 {
        self.sequence_number - 1
    }

    /// Write the init segment (ftyp + moov).
    pub fn write_header(&mut self, data: &[u8]) -> Result<()> {
        self.out.write_all(data)?;
        Ok(())
    }

    /// Emit fragments until every track has ended, then the mfra index.
    pub fn run<R: Read + Seek>(
        &mut self,
        mut scheduler: Scheduler,
        mut cursors: Vec<TrackCursor>,
        input: &mut R,
    ) -> Result<Vec<TrackReport>> {
        while let Some(pick) = scheduler.next(&cursors) {
            let index = pick.index();
            let anchor = scheduler.anchor().unwrap_or(index);

            if cursors[index].eos {
                continue;
            }

            let target = target_timestamp(&cursors[index], &cursors[anchor], pick.is_anchor());
            let cursor = &mut cursors[index];
            let end = find_fragment_end(&cursor.source, cursor.sample_index, target)?;

            if self.debug {
                debug!(
                    track_id = cursor.track_id,
                    anchor = pick.is_anchor(),
                    dts = cursor.sample.dts,
                    target,
                    pos = cursor.sample_index,
                    end,
                    count = cursor.source.count(),
                    "Fragment boundary"
                );
            }

            let plan = plan_fragment(cursor, end);
            self.write_fragment(cursor, &plan, input)?;
        }

        let reports = cursors
            .iter()
            .map(|c| TrackReport {
                track_id: c.track_id,
                handler: c.handler_type.to_string(),
                fragments: c.fragment_index,
                samples: c.source.count(),
                duration: c.timestamp,
            })
            .collect();

        let tables: Vec<RandomAccessTable> = cursors.into_iter().map(|c| c.random_access).collect();
        self.out.write_all(&write_mfra(&tables))?;
        self.out.flush()?;

        Ok(reports)
    }

    /// Serialize one fragment and advance the cursor past its samples.
    pub fn write_fragment<R: Read + Seek>(
        &mut self,
        cursor: &mut TrackCursor,
        plan: &FragmentPlan,
        input: &mut R,
    ) -> Result<()> {
        let moof_offset = self.out.position();
        cursor.random_access.add_entry(cursor.timestamp, moof_offset);

        let base_media_decode_time = cursor.timestamp;
        // The first sample decides the description for the whole fragment
        let description_index = cursor.sample.description_index;

        let mut entries = Vec::with_capacity(plan.indices.len());
        for &index in &plan.indices {
            let sample = cursor.source.get(index)?;
            let entry = match self.timescale {
                Some(ts) => TrunEntry {
                    duration: rescale(sample.duration as u64, cursor.timescale, ts) as u32,
                    size: sample.size,
                    composition_offset: rescale_signed(sample.cts_offset as i64, cursor.timescale, ts)
                        as i32,
                },
                None => TrunEntry {
                    duration: sample.duration,
                    size: sample.size,
                    composition_offset: sample.cts_offset,
                },
            };

            cursor.timestamp += entry.duration as u64;
            cursor.advance_to(index + 1)?;
            entries.push(entry);
        }

        let header = MoofBuilder::new(self.sequence_number, cursor.track_id)
            .base_media_decode_time(base_media_decode_time)
            .sample_description_index(description_index)
            .video(cursor.handler_type.is_video())
            .build(&entries);
        self.sequence_number += 1;
        self.out.write_all(&header)?;

        for &index in &plan.indices {
            let sample = cursor.source.get(index)?;
            read_sample_data(input, &sample, &mut self.payload)?;
            self.out.write_all(&self.payload)?;
        }

        cursor.fragment_index += 1;

        if self.verbosity > 0 {
            info!(
                track_id = cursor.track_id,
                samples = entries.len(),
                offset = moof_offset,
                eos = cursor.eos,
                "Fragment"
            );
        }

        Ok(())
    }
}
