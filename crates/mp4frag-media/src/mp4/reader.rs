//! MP4 file reader with atom parsing.

use super::{
    Atom, AtomType, HandlerType, Mp4File, SampleEntry, SampleTableBuilder, TrackExtends,
    TrackInfo,
};
use crate::Result;
use std::io::{Read, Seek, SeekFrom};

/// Maximum allowed atom data size (64 MB) to prevent OOM on malformed files.
const MAX_ATOM_DATA_SIZE: u64 = 64 * 1024 * 1024;

pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> u64 {
    ((read_u32(data, offset) as u64) << 32) | read_u32(data, offset + 4) as u64
}

/// Read the atom headers found between `start` and `end`.
pub(crate) fn read_atoms<R: Read + Seek>(reader: &mut R, start: u64, end: u64) -> Result<Vec<Atom>> {
    let mut atoms = Vec::new();
    let mut pos = start;

    while pos < end {
        reader.seek(SeekFrom::Start(pos))?;

        // Read atom header
        let mut header = [0u8; 8];
        if reader.read_exact(&mut header).is_err() {
            break;
        }

        let size = read_u32(&header, 0) as u64;
        let atom_type = AtomType::from_bytes([header[4], header[5], header[6], header[7]]);

        let (actual_size, header_size) = if size == 1 {
            // 64-bit extended size
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext)?;
            (u64::from_be_bytes(ext), 16u8)
        } else if size == 0 {
            // Atom extends to end of file
            (end - pos, 8u8)
        } else {
            (size, 8u8)
        };

        if actual_size < header_size as u64 {
            break;
        }

        atoms.push(Atom {
            atom_type,
            size: actual_size,
            data_offset: pos + header_size as u64,
            header_size,
        });

        pos += actual_size;
    }

    Ok(atoms)
}

/// Read and validate atom data, rejecting oversized atoms.
pub(crate) fn read_atom_data<R: Read + Seek>(reader: &mut R, atom: &Atom) -> Result<Vec<u8>> {
    let size = atom.data_size();
    if size > MAX_ATOM_DATA_SIZE {
        return Err(crate::Error::InvalidMp4(format!(
            "Atom {} data size {} exceeds maximum {}",
            atom.atom_type, size, MAX_ATOM_DATA_SIZE
        )));
    }
    reader.seek(SeekFrom::Start(atom.data_offset))?;
    let mut data = vec![0u8; size as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Read the payload of one sample into `buf`, replacing its contents.
pub fn read_sample_data<R: Read + Seek>(
    reader: &mut R,
    sample: &SampleEntry,
    buf: &mut Vec<u8>,
) -> Result<()> {
    buf.resize(sample.size as usize, 0);
    reader.seek(SeekFrom::Start(sample.offset))?;
    reader.read_exact(buf)?;
    Ok(())
}

/// MP4 file reader.
pub struct Mp4Reader<R> {
    reader: R,
    file_size: u64,
}

impl<R: Read + Seek> Mp4Reader<R> {
    /// Create a new MP4 reader.
    pub fn new(mut reader: R) -> Self {
        let file_size = reader.seek(SeekFrom::End(0)).unwrap_or(0);
        let _ = reader.seek(SeekFrom::Start(0));
        Self { reader, file_size }
    }

    /// Parse the MP4 file.
    pub fn parse(&mut self) -> Result<Mp4File> {
        let mut mp4 = Mp4File {
            duration: 0,
            timescale: 1000,
            tracks: Vec::new(),
            file_type: None,
            has_fragments: false,
            track_extends: Vec::new(),
        };

        let atoms = read_atoms(&mut self.reader, 0, self.file_size)?;
        let mut found_moov = false;

        for atom in &atoms {
            match atom.atom_type {
                AtomType::FTYP if mp4.file_type.is_none() => {
                    mp4.file_type = Some(self.read_whole_atom(atom)?);
                }
                AtomType::MOOV if !found_moov => {
                    found_moov = true;
                    self.parse_moov(atom, &mut mp4)?;
                }
                _ => {}
            }
        }

        if !found_moov {
            return Err(crate::Error::MissingAtom("moov"));
        }

        Ok(mp4)
    }

    /// Read an atom including its header.
    fn read_whole_atom(&mut self, atom: &Atom) -> Result<Vec<u8>> {
        if atom.size > MAX_ATOM_DATA_SIZE {
            return Err(crate::Error::InvalidMp4(format!(
                "Atom {} size {} exceeds maximum {}",
                atom.atom_type, atom.size, MAX_ATOM_DATA_SIZE
            )));
        }
        self.reader.seek(SeekFrom::Start(atom.start()))?;
        let mut data = vec![0u8; atom.size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    /// Parse moov atom.
    fn parse_moov(&mut self, moov: &Atom, mp4: &mut Mp4File) -> Result<()> {
        let children = read_atoms(&mut self.reader, moov.data_offset, moov.end())?;

        for child in &children {
            match child.atom_type {
                AtomType::MVHD => {
                    self.parse_mvhd(child, mp4)?;
                }
                AtomType::TRAK => {
                    let track = self.parse_trak(child)?;
                    mp4.tracks.push(track);
                }
                AtomType::MVEX => {
                    mp4.has_fragments = true;
                    self.parse_mvex(child, mp4)?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Parse mvhd (movie header).
    fn parse_mvhd(&mut self, atom: &Atom, mp4: &mut Mp4File) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.is_empty() {
            return Ok(());
        }

        let version = data[0];

        if version == 0 {
            // 32-bit timestamps
            if data.len() >= 20 {
                mp4.timescale = read_u32(&data, 12);
                mp4.duration = read_u32(&data, 16) as u64;
            }
        } else if data.len() >= 32 {
            // 64-bit timestamps
            mp4.timescale = read_u32(&data, 20);
            mp4.duration = read_u64(&data, 24);
        }

        Ok(())
    }

    /// Parse mvex (movie extends) for trex defaults.
    fn parse_mvex(&mut self, mvex: &Atom, mp4: &mut Mp4File) -> Result<()> {
        let children = read_atoms(&mut self.reader, mvex.data_offset, mvex.end())?;

        for child in children.iter().filter(|c| c.atom_type == AtomType::TREX) {
            let data = read_atom_data(&mut self.reader, child)?;
            if data.len() < 24 {
                continue;
            }
            mp4.track_extends.push(TrackExtends {
                track_id: read_u32(&data, 4),
                default_description_index: read_u32(&data, 8),
                default_duration: read_u32(&data, 12),
                default_size: read_u32(&data, 16),
                default_flags: read_u32(&data, 20),
            });
        }

        Ok(())
    }

    /// Parse trak (track) atom.
    fn parse_trak(&mut self, trak: &Atom) -> Result<TrackInfo> {
        let children = read_atoms(&mut self.reader, trak.data_offset, trak.end())?;

        let mut track = TrackInfo::new(0);

        for child in &children {
            match child.atom_type {
                AtomType::TKHD => {
                    self.parse_tkhd(child, &mut track)?;
                }
                AtomType::MDIA => {
                    self.parse_mdia(child, &mut track)?;
                }
                _ => {}
            }
        }

        Ok(track)
    }

    /// Parse tkhd (track header).
    fn parse_tkhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.is_empty() {
            return Ok(());
        }

        let version = data[0];

        // Width and height are 16.16 fixed point after the matrix
        let (id_at, duration_at, size_at) = if version == 0 {
            (12, 20, 76)
        } else {
            (20, 28, 88)
        };

        if data.len() >= id_at + 4 {
            track.track_id = read_u32(&data, id_at);
        }
        if data.len() >= duration_at + 8 && version != 0 {
            track.duration = read_u64(&data, duration_at);
        } else if data.len() >= duration_at + 4 && version == 0 {
            track.duration = read_u32(&data, duration_at) as u64;
        }
        if data.len() >= size_at + 8 {
            track.width = Some(read_u32(&data, size_at) >> 16);
            track.height = Some(read_u32(&data, size_at + 4) >> 16);
        }

        Ok(())
    }

    /// Parse mdia (media) atom.
    fn parse_mdia(&mut self, mdia: &Atom, track: &mut TrackInfo) -> Result<()> {
        let children = read_atoms(&mut self.reader, mdia.data_offset, mdia.end())?;

        // hdlr decides how the stsd is interpreted downstream, read it first
        for child in children.iter().filter(|c| c.atom_type == AtomType::HDLR) {
            self.parse_hdlr(child, track)?;
        }

        for child in &children {
            match child.atom_type {
                AtomType::MDHD => {
                    self.parse_mdhd(child, track)?;
                }
                AtomType::MINF => {
                    self.parse_minf(child, track)?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Parse mdhd (media header).
    fn parse_mdhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.is_empty() {
            return Ok(());
        }

        let version = data[0];

        if version == 0 {
            if data.len() >= 22 {
                track.timescale = read_u32(&data, 12);
                track.media_duration = read_u32(&data, 16) as u64;
                track.language = read_u16(&data, 20);
            }
        } else if data.len() >= 34 {
            track.timescale = read_u32(&data, 20);
            track.media_duration = read_u64(&data, 24);
            track.language = read_u16(&data, 32);
        }

        Ok(())
    }

    /// Parse hdlr (handler) atom.
    fn parse_hdlr(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.len() >= 12 {
            track.handler_type = HandlerType::from_bytes([data[8], data[9], data[10], data[11]]);
        }
        if data.len() > 24 {
            let name = &data[24..];
            let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
            track.handler_name = name[..end].to_vec();
        }

        Ok(())
    }

    /// Parse minf (media info) atom.
    fn parse_minf(&mut self, minf: &Atom, track: &mut TrackInfo) -> Result<()> {
        let children = read_atoms(&mut self.reader, minf.data_offset, minf.end())?;

        for child in &children {
            if child.atom_type == AtomType::STBL {
                self.parse_stbl(child, track)?;
            }
        }

        Ok(())
    }

    /// Parse stbl (sample table) atom.
    fn parse_stbl(&mut self, stbl: &Atom, track: &mut TrackInfo) -> Result<()> {
        let children = read_atoms(&mut self.reader, stbl.data_offset, stbl.end())?;

        let mut builder = SampleTableBuilder::new();

        for child in &children {
            match child.atom_type {
                AtomType::STTS => {
                    self.parse_stts(child, &mut builder)?;
                }
                AtomType::STSS => {
                    self.parse_stss(child, &mut builder)?;
                }
                AtomType::STSC => {
                    self.parse_stsc(child, &mut builder)?;
                }
                AtomType::STSZ => {
                    self.parse_stsz(child, &mut builder)?;
                }
                AtomType::STCO => {
                    self.parse_stco(child, &mut builder)?;
                }
                AtomType::CO64 => {
                    self.parse_co64(child, &mut builder)?;
                }
                AtomType::CTTS => {
                    self.parse_ctts(child, &mut builder)?;
                }
                AtomType::STSD => {
                    track.sample_descriptions = Some(self.read_whole_atom(child)?);
                }
                _ => {}
            }
        }

        track.sample_table = builder.build();
        Ok(())
    }

    /// Parse stts (decoding time to sample).
    fn parse_stts(&mut self, atom: &Atom, builder: &mut SampleTableBuilder) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.len() < 8 {
            return Ok(());
        }

        let entry_count = read_u32(&data, 4) as usize;
        let mut entries = Vec::with_capacity(entry_count.min(data.len() / 8));

        for i in 0..entry_count {
            let offset = 8 + i * 8;
            if offset + 8 > data.len() {
                break;
            }
            entries.push((read_u32(&data, offset), read_u32(&data, offset + 4)));
        }

        builder.set_stts(entries);
        Ok(())
    }

    /// Parse stss (sync sample).
    fn parse_stss(&mut self, atom: &Atom, builder: &mut SampleTableBuilder) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.len() < 8 {
            return Ok(());
        }

        let entry_count = read_u32(&data, 4) as usize;
        let mut sync_samples = Vec::with_capacity(entry_count.min(data.len() / 4));

        for i in 0..entry_count {
            let offset = 8 + i * 4;
            if offset + 4 > data.len() {
                break;
            }
            sync_samples.push(read_u32(&data, offset));
        }

        builder.set_sync_samples(sync_samples);
        Ok(())
    }

    /// Parse stsc (sample to chunk).
    fn parse_stsc(&mut self, atom: &Atom, builder: &mut SampleTableBuilder) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.len() < 8 {
            return Ok(());
        }

        let entry_count = read_u32(&data, 4) as usize;
        let mut entries = Vec::with_capacity(entry_count.min(data.len() / 12));

        for i in 0..entry_count {
            let offset = 8 + i * 12;
            if offset + 12 > data.len() {
                break;
            }
            let first_chunk = read_u32(&data, offset);
            let samples_per_chunk = read_u32(&data, offset + 4);
            let description_idx = read_u32(&data, offset + 8);
            entries.push((first_chunk, samples_per_chunk, description_idx));
        }

        builder.set_stsc(entries);
        Ok(())
    }

    /// Parse stsz (sample size).
    fn parse_stsz(&mut self, atom: &Atom, builder: &mut SampleTableBuilder) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.len() < 12 {
            return Ok(());
        }

        let uniform_size = read_u32(&data, 4);
        let sample_count = read_u32(&data, 8);

        let sizes = if uniform_size == 0 {
            let mut sizes = Vec::with_capacity((sample_count as usize).min(data.len() / 4));
            for i in 0..sample_count as usize {
                let offset = 12 + i * 4;
                if offset + 4 > data.len() {
                    break;
                }
                sizes.push(read_u32(&data, offset));
            }
            sizes
        } else {
            vec![]
        };

        builder.set_stsz(uniform_size, sample_count, sizes);
        Ok(())
    }

    /// Parse stco (chunk offset, 32-bit).
    fn parse_stco(&mut self, atom: &Atom, builder: &mut SampleTableBuilder) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.len() < 8 {
            return Ok(());
        }

        let entry_count = read_u32(&data, 4) as usize;
        let mut offsets = Vec::with_capacity(entry_count.min(data.len() / 4));

        for i in 0..entry_count {
            let offset = 8 + i * 4;
            if offset + 4 > data.len() {
                break;
            }
            offsets.push(read_u32(&data, offset) as u64);
        }

        builder.set_chunk_offsets(offsets);
        Ok(())
    }

    /// Parse co64 (chunk offset, 64-bit).
    fn parse_co64(&mut self, atom: &Atom, builder: &mut SampleTableBuilder) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.len() < 8 {
            return Ok(());
        }

        let entry_count = read_u32(&data, 4) as usize;
        let mut offsets = Vec::with_capacity(entry_count.min(data.len() / 8));

        for i in 0..entry_count {
            let offset = 8 + i * 8;
            if offset + 8 > data.len() {
                break;
            }
            offsets.push(read_u64(&data, offset));
        }

        builder.set_chunk_offsets(offsets);
        Ok(())
    }

    /// Parse ctts (composition time to sample).
    fn parse_ctts(&mut self, atom: &Atom, builder: &mut SampleTableBuilder) -> Result<()> {
        let data = read_atom_data(&mut self.reader, atom)?;

        if data.len() < 8 {
            return Ok(());
        }

        let entry_count = read_u32(&data, 4) as usize;
        let mut entries = Vec::with_capacity(entry_count.min(data.len() / 8));

        for i in 0..entry_count {
            let offset = 8 + i * 8;
            if offset + 8 > data.len() {
                break;
            }
            // Version 0 offsets are unsigned on paper but written as i32 in practice
            let count = read_u32(&data, offset);
            let cts_offset = read_u32(&data, offset + 4) as i32;
            entries.push((count, cts_offset));
        }

        builder.set_ctts(entries);
        Ok(())
    }
}
