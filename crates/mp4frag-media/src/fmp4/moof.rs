//! Movie fragment (moof) box builder.

use super::boxes::{
    end_box, mdat_header_size, start_box, start_full_box, write_mdat_header, write_mfhd,
    write_tfdt,
};
use bytes::{BufMut, BytesMut};

const TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x000002;
const TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x000020;
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

const TRUN_DATA_OFFSET_PRESENT: u32 = 0x000001;
const TRUN_FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x000004;
const TRUN_SAMPLE_DURATION_PRESENT: u32 = 0x000100;
const TRUN_SAMPLE_SIZE_PRESENT: u32 = 0x000200;
const TRUN_SAMPLE_CTO_PRESENT: u32 = 0x000800;

/// sample_is_non_sync_sample=1, sample_depends_on=1.
const VIDEO_DEFAULT_SAMPLE_FLAGS: u32 = 0x0101_0000;
/// sample_depends_on=2 (does not depend on others).
const VIDEO_FIRST_SAMPLE_FLAGS: u32 = 0x0200_0000;

/// Per-sample values written to `trun`, already in the output timescale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrunEntry {
    pub duration: u32,
    pub size: u32,
    pub composition_offset: i32,
}

/// Builder for the moof box of one single-track fragment.
#[derive(Debug, Clone)]
pub struct MoofBuilder {
    sequence_number: u32,
    track_id: u32,
    base_media_decode_time: u64,
    sample_description_index: u32,
    is_video: bool,
}

impl MoofBuilder {
    /// Create a new moof builder.
    pub fn new(sequence_number: u32, track_id: u32) -> Self {
        Self {
            sequence_number,
            track_id,
            base_media_decode_time: 0,
            sample_description_index: 0,
            is_video: false,
        }
    }

    /// Set base media decode time.
    pub fn base_media_decode_time(mut self, time: u64) -> Self {
        self.base_media_decode_time = time;
        self
    }

    /// Set the 0-based sample description index of the fragment.
    pub fn sample_description_index(mut self, index: u32) -> Self {
        self.sample_description_index = index;
        self
    }

    /// Video fragments carry default and first-sample dependency flags.
    pub fn video(mut self, is_video: bool) -> Self {
        self.is_video = is_video;
        self
    }

    /// Build moof + mdat header for the given samples.
    ///
    /// The sample payloads, in `entries` order, must follow directly.
    pub fn build(&self, entries: &[TrunEntry]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(128 + entries.len() * 12);

        let data_size: u64 = entries.iter().map(|e| e.size as u64).sum();
        let data_offset_pos = self.write_moof(&mut buf, entries);

        // With default-base-is-moof the offset is relative to the moof start
        let data_offset = (buf.len() as u64 + mdat_header_size(data_size)) as u32;
        buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());

        write_mdat_header(&mut buf, data_size);
        buf.to_vec()
    }

    /// Write the moof; returns the position of the trun data offset field.
    fn write_moof(&self, buf: &mut BytesMut, entries: &[TrunEntry]) -> usize {
        let moof = start_box(buf, b"moof");
        write_mfhd(buf, self.sequence_number);

        let traf = start_box(buf, b"traf");
        self.write_tfhd(buf);
        write_tfdt(buf, self.base_media_decode_time);
        let data_offset_pos = self.write_trun(buf, entries);
        end_box(buf, traf);

        end_box(buf, moof);
        data_offset_pos
    }

    fn write_tfhd(&self, buf: &mut BytesMut) {
        let mut flags = TFHD_DEFAULT_BASE_IS_MOOF;
        if self.sample_description_index > 0 {
            flags |= TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT;
        }
        if self.is_video {
            flags |= TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT;
        }

        let start = start_full_box(buf, b"tfhd", 0, flags);
        buf.put_u32(self.track_id);
        if flags & TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
            buf.put_u32(self.sample_description_index + 1);
        }
        if flags & TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
            buf.put_u32(VIDEO_DEFAULT_SAMPLE_FLAGS);
        }
        end_box(buf, start);
    }

    fn write_trun(&self, buf: &mut BytesMut, entries: &[TrunEntry]) -> usize {
        let mut flags =
            TRUN_DATA_OFFSET_PRESENT | TRUN_SAMPLE_DURATION_PRESENT | TRUN_SAMPLE_SIZE_PRESENT;
        if self.is_video {
            flags |= TRUN_FIRST_SAMPLE_FLAGS_PRESENT;
        }
        if entries.iter().any(|e| e.composition_offset != 0) {
            flags |= TRUN_SAMPLE_CTO_PRESENT;
        }
        // Signed composition offsets need version 1
        let version = u8::from(entries.iter().any(|e| e.composition_offset < 0));

        let start = start_full_box(buf, b"trun", version, flags);
        buf.put_u32(entries.len() as u32);

        let data_offset_pos = buf.len();
        buf.put_u32(0); // placeholder

        if flags & TRUN_FIRST_SAMPLE_FLAGS_PRESENT != 0 {
            buf.put_u32(VIDEO_FIRST_SAMPLE_FLAGS);
        }

        for entry in entries {
            buf.put_u32(entry.duration);
            buf.put_u32(entry.size);
            if flags & TRUN_SAMPLE_CTO_PRESENT != 0 {
                buf.put_i32(entry.composition_offset);
            }
        }

        end_box(buf, start);
        data_offset_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::read_u32;

    fn entries() -> Vec<TrunEntry> {
        vec![
            TrunEntry {
                duration: 3000,
                size: 1000,
                composition_offset: 0,
            },
            TrunEntry {
                duration: 3000,
                size: 500,
                composition_offset: 0,
            },
        ]
    }

    /// Find the first box with the given type anywhere in `data`.
    fn find_box(data: &[u8], box_type: &[u8; 4]) -> usize {
        data.windows(4)
            .position(|w| w == box_type)
            .map(|p| p - 4)
            .unwrap()
    }

    #[test]
    fn test_audio_fragment_layout() {
        let data = MoofBuilder::new(5, 2)
            .base_media_decode_time(96000)
            .build(&entries());

        assert_eq!(&data[4..8], b"moof");
        let moof_size = read_u32(&data, 0) as usize;
        assert_eq!(&data[moof_size + 4..moof_size + 8], b"mdat");
        assert_eq!(read_u32(&data, moof_size), 8 + 1500);
        assert_eq!(data.len(), moof_size + 8);

        let mfhd = find_box(&data, b"mfhd");
        assert_eq!(read_u32(&data, mfhd + 12), 5);

        let tfhd = find_box(&data, b"tfhd");
        assert_eq!(read_u32(&data, tfhd), 16);
        assert_eq!(read_u32(&data, tfhd + 8), TFHD_DEFAULT_BASE_IS_MOOF);

        let trun = find_box(&data, b"trun");
        let flags = read_u32(&data, trun + 8);
        assert_eq!(
            flags,
            TRUN_DATA_OFFSET_PRESENT | TRUN_SAMPLE_DURATION_PRESENT | TRUN_SAMPLE_SIZE_PRESENT
        );
        assert_eq!(read_u32(&data, trun + 12), 2);
        assert_eq!(read_u32(&data, trun + 16) as usize, moof_size + 8);
    }

    #[test]
    fn test_video_fragment_flags() {
        let data = MoofBuilder::new(1, 1)
            .video(true)
            .sample_description_index(1)
            .build(&entries());

        let tfhd = find_box(&data, b"tfhd");
        let flags = read_u32(&data, tfhd + 8);
        assert_eq!(
            flags,
            TFHD_DEFAULT_BASE_IS_MOOF
                | TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT
                | TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT
        );
        assert_eq!(read_u32(&data, tfhd + 16), 2);
        assert_eq!(read_u32(&data, tfhd + 20), VIDEO_DEFAULT_SAMPLE_FLAGS);

        let trun = find_box(&data, b"trun");
        assert_ne!(read_u32(&data, trun + 8) & TRUN_FIRST_SAMPLE_FLAGS_PRESENT, 0);
        assert_eq!(read_u32(&data, trun + 20), VIDEO_FIRST_SAMPLE_FLAGS);
    }

    #[test]
    fn test_composition_offsets() {
        let mut samples = entries();
        samples[1].composition_offset = 1500;
        let data = MoofBuilder::new(1, 1).build(&samples);
        let trun = find_box(&data, b"trun");
        assert_eq!(data[trun + 8], 0);
        assert_ne!(read_u32(&data, trun + 8) & TRUN_SAMPLE_CTO_PRESENT, 0);
        // header(8) + version/flags(4) + count(4) + offset(4) + 2 * 12
        assert_eq!(read_u32(&data, trun), 44);

        samples[0].composition_offset = -1500;
        let data = MoofBuilder::new(1, 1).build(&samples);
        let trun = find_box(&data, b"trun");
        assert_eq!(data[trun + 8], 1);
        assert_eq!(read_u32(&data, trun + 28) as i32, -1500);
    }
}
