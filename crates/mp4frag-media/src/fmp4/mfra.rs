//! Movie fragment random access (mfra) index.

use super::boxes::{end_box, start_box, start_full_box};
use bytes::{BufMut, BytesMut};

/// Size of the mfro box that closes the mfra.
const MFRO_SIZE: u32 = 16;

/// One fragment start: presentation time and moof position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomAccessEntry {
    /// Time in the track's output timescale.
    pub time: u64,
    /// Byte offset of the moof from the start of the output.
    pub moof_offset: u64,
}

/// Random access entries of one track, in fragment order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RandomAccessTable {
    pub track_id: u32,
    pub entries: Vec<RandomAccessEntry>,
}

impl RandomAccessTable {
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            entries: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, time: u64, moof_offset: u64) {
        self.entries.push(RandomAccessEntry { time, moof_offset });
    }

    fn needs_64_bit(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.time > u32::MAX as u64 || e.moof_offset > u32::MAX as u64)
    }

    fn write_tfra(&self, buf: &mut BytesMut) {
        let version = u8::from(self.needs_64_bit());
        let start = start_full_box(buf, b"tfra", version, 0);
        buf.put_u32(self.track_id);
        // length_size_of_traf_num/trun_num/sample_num all 0: one byte each
        buf.put_u32(0);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            if version == 1 {
                buf.put_u64(entry.time);
                buf.put_u64(entry.moof_offset);
            } else {
                buf.put_u32(entry.time as u32);
                buf.put_u32(entry.moof_offset as u32);
            }
            buf.put_u8(1); // traf_number
            buf.put_u8(1); // trun_number
            buf.put_u8(1); // sample_number
        }
        end_box(buf, start);
    }
}

/// Serialize the mfra: one tfra per table, then mfro.
pub fn write_mfra(tables: &[RandomAccessTable]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(64 + tables.len() * 32);

    let mfra = start_box(&mut buf, b"mfra");
    for table in tables {
        table.write_tfra(&mut buf);
    }

    let mfra_size = (buf.len() - mfra) as u32 + MFRO_SIZE;
    let mfro = start_full_box(&mut buf, b"mfro", 0, 0);
    buf.put_u32(mfra_size);
    end_box(&mut buf, mfro);

    end_box(&mut buf, mfra);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::{read_u32, read_u64};

    #[test]
    fn test_mfro_matches_mfra_size() {
        let mut video = RandomAccessTable::new(1);
        video.add_entry(0, 1200);
        video.add_entry(2000, 50_000);
        let mut audio = RandomAccessTable::new(2);
        audio.add_entry(0, 30_000);

        let data = write_mfra(&[video, audio]);

        assert_eq!(&data[4..8], b"mfra");
        assert_eq!(read_u32(&data, 0) as usize, data.len());
        assert_eq!(&data[data.len() - 12..data.len() - 8], b"mfro");
        assert_eq!(read_u32(&data, data.len() - 4) as usize, data.len());

        // first tfra: header(8) + fields(16) + 2 * (4 + 4 + 3)
        assert_eq!(&data[12..16], b"tfra");
        assert_eq!(read_u32(&data, 8), 46);
        assert_eq!(data[16], 0);
        assert_eq!(read_u32(&data, 20), 1);
        assert_eq!(read_u32(&data, 28), 2);
        assert_eq!(read_u32(&data, 32 + 11 + 4), 50_000);
    }

    #[test]
    fn test_large_offsets_use_version_1() {
        let mut table = RandomAccessTable::new(1);
        table.add_entry(90_000, 5_000_000_000);

        let data = write_mfra(&[table]);
        assert_eq!(data[16], 1);
        assert_eq!(read_u64(&data, 32), 90_000);
        assert_eq!(read_u64(&data, 40), 5_000_000_000);
        assert_eq!(&data[48..51], &[1, 1, 1]);
    }
}
