//! Linear sample reader for fragmented input.
//!
//! Yields the samples of the enabled tracks in file order: first whatever is
//! still described by the `moov` sample tables, then every sample of every
//! `moof/traf/trun` as the fragments appear in the file.

use super::{read_atom_data, read_atoms, Atom, AtomType, Mp4File, SampleEntry, SampleTable};
use crate::{Error, Result};
use bytes::Buf;
use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, trace};

const TFHD_BASE_DATA_OFFSET_PRESENT: u32 = 0x000001;
const TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x000002;
const TFHD_DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x000008;
const TFHD_DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x000010;
const TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x000020;

const TRUN_DATA_OFFSET_PRESENT: u32 = 0x000001;
const TRUN_FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x000004;
const TRUN_SAMPLE_DURATION_PRESENT: u32 = 0x000100;
const TRUN_SAMPLE_SIZE_PRESENT: u32 = 0x000200;
const TRUN_SAMPLE_FLAGS_PRESENT: u32 = 0x000400;
const TRUN_SAMPLE_CTO_PRESENT: u32 = 0x000800;

/// `sample_is_non_sync_sample` bit of the ISO sample flags.
const SAMPLE_FLAG_NON_SYNC: u32 = 0x0001_0000;

/// Per-track state while walking the file.
#[derive(Debug)]
struct LinearTrack {
    track_id: u32,
    table: SampleTable,
    next_table_index: u32,
    next_dts: u64,
    default_description_index: u32,
    default_duration: u32,
    default_size: u32,
    default_flags: u32,
}

/// Reads samples of selected tracks in file order.
#[derive(Debug)]
pub struct LinearReader {
    tracks: Vec<LinearTrack>,
    table_track: usize,
    fragments: Option<Vec<Atom>>,
    next_fragment: usize,
    pending: VecDeque<(u32, SampleEntry)>,
}

/// Defaults in effect for one `traf`, after `tfhd` overrides `trex`.
#[derive(Debug, Clone, Copy)]
struct TrafDefaults {
    base_offset: u64,
    description_index: u32,
    duration: u32,
    size: u32,
    flags: u32,
}

/// Fallible field reads over an in-memory box payload.
fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::invalid_mp4(format!("truncated {what}")));
    }
    Ok(buf.get_u32())
}

fn take_u64(buf: &mut &[u8], what: &str) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(Error::invalid_mp4(format!("truncated {what}")));
    }
    Ok(buf.get_u64())
}

/// Split an in-memory box payload into `(type, payload)` children.
fn child_boxes(data: &[u8]) -> Result<Vec<(AtomType, &[u8])>> {
    let mut children = Vec::new();
    let mut pos = 0usize;

    while data.len() - pos >= 8 {
        let mut header = &data[pos..];
        let size = header.get_u32() as u64;
        let mut code = [0u8; 4];
        header.copy_to_slice(&mut code);

        let (size, header_size) = match size {
            0 => ((data.len() - pos) as u64, 8),
            1 => {
                if header.remaining() < 8 {
                    return Err(Error::invalid_mp4("truncated extended box size"));
                }
                (header.get_u64(), 16)
            }
            n => (n, 8),
        };

        if size < header_size as u64 || size > (data.len() - pos) as u64 {
            return Err(Error::invalid_mp4(format!(
                "box {} overruns its parent",
                AtomType::from_bytes(code)
            )));
        }

        let end = pos + size as usize;
        children.push((AtomType::from_bytes(code), &data[pos + header_size..end]));
        pos = end;
    }

    Ok(children)
}

impl LinearReader {
    /// Create a reader with no track enabled.
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            table_track: 0,
            fragments: None,
            next_fragment: 0,
            pending: VecDeque::new(),
        }
    }

    /// Enable a track so its samples are yielded.
    pub fn enable_track(&mut self, file: &Mp4File, track_id: u32) -> Result<()> {
        let track = file
            .track(track_id)
            .ok_or_else(|| Error::configuration(format!("no track with id {track_id}")))?;

        let trex = file.track_extends(track_id);
        let table = track.sample_table.clone();
        let next_dts = table
            .sample_count()
            .checked_sub(1)
            .and_then(|last| table.get(last))
            .map(|s| s.end_dts())
            .unwrap_or(0);

        self.tracks.push(LinearTrack {
            track_id,
            table,
            next_table_index: 0,
            next_dts,
            default_description_index: trex.map(|t| t.default_description_index).unwrap_or(1),
            default_duration: trex.map(|t| t.default_duration).unwrap_or(0),
            default_size: trex.map(|t| t.default_size).unwrap_or(0),
            default_flags: trex.map(|t| t.default_flags).unwrap_or(0),
        });
        Ok(())
    }

    /// Next sample of an enabled track, with its track ID.
    ///
    /// Returns `Ok(None)` once the file is exhausted.
    pub fn next_sample<R: Read + Seek>(&mut self, input: &mut R) -> Result<Option<(u32, SampleEntry)>> {
        while self.table_track < self.tracks.len() {
            let track = &mut self.tracks[self.table_track];
            if let Some(sample) = track.table.get(track.next_table_index) {
                track.next_table_index += 1;
                return Ok(Some((track.track_id, sample)));
            }
            self.table_track += 1;
        }

        loop {
            if let Some(next) = self.pending.pop_front() {
                return Ok(Some(next));
            }

            if self.fragments.is_none() {
                let file_size = input.seek(SeekFrom::End(0))?;
                let atoms = read_atoms(input, 0, file_size)?;
                let moofs: Vec<Atom> = atoms
                    .into_iter()
                    .filter(|a| a.atom_type == AtomType::MOOF)
                    .collect();
                debug!(fragments = moofs.len(), "Scanning fragmented input");
                self.fragments = Some(moofs);
            }

            let Some(moof) = self
                .fragments
                .as_ref()
                .and_then(|f| f.get(self.next_fragment))
                .cloned()
            else {
                return Ok(None);
            };
            self.next_fragment += 1;

            let data = read_atom_data(input, &moof)?;
            self.parse_moof(&moof, &data)?;
        }
    }

    fn parse_moof(&mut self, moof: &Atom, data: &[u8]) -> Result<()> {
        for (atom_type, payload) in child_boxes(data)? {
            if atom_type == AtomType::TRAF {
                self.parse_traf(moof, payload)?;
            }
        }
        Ok(())
    }

    fn parse_traf(&mut self, moof: &Atom, data: &[u8]) -> Result<()> {
        let children = child_boxes(data)?;

        let Some((_, tfhd)) = children.iter().find(|(t, _)| *t == AtomType::TFHD) else {
            return Err(Error::MissingAtom("tfhd"));
        };

        let mut buf = *tfhd;
        let flags = take_u32(&mut buf, "tfhd")? & 0x00FF_FFFF;
        let track_id = take_u32(&mut buf, "tfhd")?;

        let Some(track_idx) = self.tracks.iter().position(|t| t.track_id == track_id) else {
            trace!(track_id, "Skipping traf of disabled track");
            return Ok(());
        };
        let track = &mut self.tracks[track_idx];

        let mut defaults = TrafDefaults {
            base_offset: moof.start(),
            description_index: track.default_description_index,
            duration: track.default_duration,
            size: track.default_size,
            flags: track.default_flags,
        };
        if flags & TFHD_BASE_DATA_OFFSET_PRESENT != 0 {
            defaults.base_offset = take_u64(&mut buf, "tfhd")?;
        }
        if flags & TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
            defaults.description_index = take_u32(&mut buf, "tfhd")?;
        }
        if flags & TFHD_DEFAULT_SAMPLE_DURATION_PRESENT != 0 {
            defaults.duration = take_u32(&mut buf, "tfhd")?;
        }
        if flags & TFHD_DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
            defaults.size = take_u32(&mut buf, "tfhd")?;
        }
        if flags & TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
            defaults.flags = take_u32(&mut buf, "tfhd")?;
        }

        if let Some((_, tfdt)) = children.iter().find(|(t, _)| *t == AtomType::TFDT) {
            let mut buf = *tfdt;
            let version = take_u32(&mut buf, "tfdt")? >> 24;
            track.next_dts = if version == 1 {
                take_u64(&mut buf, "tfdt")?
            } else {
                take_u32(&mut buf, "tfdt")? as u64
            };
        }

        let mut data_cursor = defaults.base_offset;
        for (_, trun) in children.iter().filter(|(t, _)| *t == AtomType::TRUN) {
            data_cursor = parse_trun(track, trun, &defaults, data_cursor, &mut self.pending)?;
        }

        Ok(())
    }
}

impl Default for LinearReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue the samples of one `trun`; returns the offset following its data.
fn parse_trun(
    track: &mut LinearTrack,
    data: &[u8],
    defaults: &TrafDefaults,
    data_cursor: u64,
    out: &mut VecDeque<(u32, SampleEntry)>,
) -> Result<u64> {
    let mut buf = data;
    let flags = take_u32(&mut buf, "trun")? & 0x00FF_FFFF;
    let sample_count = take_u32(&mut buf, "trun")?;

    let mut offset = if flags & TRUN_DATA_OFFSET_PRESENT != 0 {
        let rel = take_u32(&mut buf, "trun")? as i32;
        defaults.base_offset.checked_add_signed(rel as i64).ok_or_else(|| {
            Error::invalid_mp4(format!("trun data offset {rel} before start of file"))
        })?
    } else {
        data_cursor
    };

    let first_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS_PRESENT != 0 {
        Some(take_u32(&mut buf, "trun")?)
    } else {
        None
    };

    for i in 0..sample_count {
        let duration = if flags & TRUN_SAMPLE_DURATION_PRESENT != 0 {
            take_u32(&mut buf, "trun")?
        } else {
            defaults.duration
        };
        let size = if flags & TRUN_SAMPLE_SIZE_PRESENT != 0 {
            take_u32(&mut buf, "trun")?
        } else {
            defaults.size
        };
        let sample_flags = if flags & TRUN_SAMPLE_FLAGS_PRESENT != 0 {
            take_u32(&mut buf, "trun")?
        } else if i == 0 {
            first_flags.unwrap_or(defaults.flags)
        } else {
            defaults.flags
        };
        let cts_offset = if flags & TRUN_SAMPLE_CTO_PRESENT != 0 {
            take_u32(&mut buf, "trun")? as i32
        } else {
            0
        };

        out.push_back((
            track.track_id,
            SampleEntry {
                offset,
                size,
                dts: track.next_dts,
                duration,
                cts_offset,
                is_keyframe: sample_flags & SAMPLE_FLAG_NON_SYNC == 0,
                description_index: defaults.description_index.saturating_sub(1),
            },
        ));

        offset += size as u64;
        track.next_dts += duration as u64;
    }

    Ok(offset)
}
