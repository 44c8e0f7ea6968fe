//! ISO BMFF box serialization primitives.
//!
//! Each box follows the standard layout: 4-byte size (big-endian u32),
//! 4-byte type (ASCII), then box-specific content. Container sizes are
//! written as a placeholder and patched once the children are in place.

use bytes::{BufMut, BytesMut};

/// Identity transformation matrix shared by mvhd and tkhd.
const UNITY_MATRIX: [u32; 9] = [
    0x00010000, 0, 0, //
    0, 0x00010000, 0, //
    0, 0, 0x40000000,
];

/// Start a box; returns the offset to pass to [`end_box`].
pub(crate) fn start_box(buf: &mut BytesMut, box_type: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0); // placeholder
    buf.put_slice(box_type);
    start
}

/// Patch the size of a box started with [`start_box`].
pub(crate) fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Start a full box (version + flags).
pub(crate) fn start_full_box(buf: &mut BytesMut, box_type: &[u8; 4], version: u8, flags: u32) -> usize {
    let start = start_box(buf, box_type);
    buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
    start
}

fn put_matrix(buf: &mut BytesMut) {
    for value in UNITY_MATRIX {
        buf.put_u32(value);
    }
}

/// Write the `mvhd` box (version 1).
pub(crate) fn write_mvhd(buf: &mut BytesMut, timescale: u32, duration: u64, next_track_id: u32) {
    let start = start_full_box(buf, b"mvhd", 1, 0);
    buf.put_u64(0); // creation_time
    buf.put_u64(0); // modification_time
    buf.put_u32(timescale);
    buf.put_u64(duration);
    buf.put_u32(0x00010000); // rate 1.0
    buf.put_u16(0x0100); // volume 1.0
    buf.put_slice(&[0u8; 10]);
    put_matrix(buf);
    buf.put_slice(&[0u8; 24]); // pre_defined
    buf.put_u32(next_track_id);
    end_box(buf, start);
}

/// Write the `tkhd` box (version 1, enabled | in_movie | in_preview).
///
/// `width` and `height` are whole pixels; audio tracks get full volume.
pub(crate) fn write_tkhd(
    buf: &mut BytesMut,
    track_id: u32,
    duration: u64,
    is_audio: bool,
    width: u32,
    height: u32,
) {
    let start = start_full_box(buf, b"tkhd", 1, 7);
    buf.put_u64(0); // creation_time
    buf.put_u64(0); // modification_time
    buf.put_u32(track_id);
    buf.put_u32(0); // reserved
    buf.put_u64(duration);
    buf.put_slice(&[0u8; 8]); // reserved
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate_group
    buf.put_u16(if is_audio { 0x0100 } else { 0 });
    buf.put_u16(0); // reserved
    put_matrix(buf);
    buf.put_u32(width << 16);
    buf.put_u32(height << 16);
    end_box(buf, start);
}

/// Write the `mdhd` box (version 1).
pub(crate) fn write_mdhd(buf: &mut BytesMut, timescale: u32, duration: u64, language: u16) {
    let start = start_full_box(buf, b"mdhd", 1, 0);
    buf.put_u64(0); // creation_time
    buf.put_u64(0); // modification_time
    buf.put_u32(timescale);
    buf.put_u64(duration);
    buf.put_u16(language);
    buf.put_u16(0); // pre_defined
    end_box(buf, start);
}

/// Write the `hdlr` box with a null-terminated name.
pub(crate) fn write_hdlr(buf: &mut BytesMut, handler_type: &[u8; 4], name: &[u8]) {
    let start = start_full_box(buf, b"hdlr", 0, 0);
    buf.put_u32(0); // pre_defined
    buf.put_slice(handler_type);
    buf.put_slice(&[0u8; 12]);
    buf.put_slice(name);
    buf.put_u8(0);
    end_box(buf, start);
}

/// Write `dinf` with a single self-contained `url ` reference.
pub(crate) fn write_dinf(buf: &mut BytesMut) {
    let dinf = start_box(buf, b"dinf");
    let dref = start_full_box(buf, b"dref", 0, 0);
    buf.put_u32(1); // entry count
    let url = start_full_box(buf, b"url ", 0, 1);
    end_box(buf, url);
    end_box(buf, dref);
    end_box(buf, dinf);
}

pub(crate) fn write_vmhd(buf: &mut BytesMut) {
    let start = start_full_box(buf, b"vmhd", 0, 1);
    buf.put_u16(0); // graphicsmode
    buf.put_slice(&[0u8; 6]); // opcolor
    end_box(buf, start);
}

pub(crate) fn write_smhd(buf: &mut BytesMut) {
    let start = start_full_box(buf, b"smhd", 0, 0);
    buf.put_u16(0); // balance
    buf.put_u16(0);
    end_box(buf, start);
}

pub(crate) fn write_nmhd(buf: &mut BytesMut) {
    let start = start_full_box(buf, b"nmhd", 0, 0);
    end_box(buf, start);
}

/// Write an `stbl` holding the given `stsd` verbatim and no samples.
pub(crate) fn write_empty_stbl(buf: &mut BytesMut, stsd: &[u8]) {
    let stbl = start_box(buf, b"stbl");
    buf.put_slice(stsd);

    for table in [b"stts", b"stsc", b"stco"] {
        let start = start_full_box(buf, table, 0, 0);
        buf.put_u32(0); // entry count
        end_box(buf, start);
    }

    let stsz = start_full_box(buf, b"stsz", 0, 0);
    buf.put_u32(0); // sample size
    buf.put_u32(0); // sample count
    end_box(buf, stsz);

    end_box(buf, stbl);
}

/// Write the `mehd` box; version 1 only when the duration needs 64 bits.
pub(crate) fn write_mehd(buf: &mut BytesMut, fragment_duration: u64) {
    if fragment_duration > u32::MAX as u64 {
        let start = start_full_box(buf, b"mehd", 1, 0);
        buf.put_u64(fragment_duration);
        end_box(buf, start);
    } else {
        let start = start_full_box(buf, b"mehd", 0, 0);
        buf.put_u32(fragment_duration as u32);
        end_box(buf, start);
    }
}

/// Write the `trex` box with description index 1 and zero defaults.
pub(crate) fn write_trex(buf: &mut BytesMut, track_id: u32) {
    let start = start_full_box(buf, b"trex", 0, 0);
    buf.put_u32(track_id);
    buf.put_u32(1); // default sample description index
    buf.put_u32(0); // default sample duration
    buf.put_u32(0); // default sample size
    buf.put_u32(0); // default sample flags
    end_box(buf, start);
}

/// Write the `mfhd` box.
pub(crate) fn write_mfhd(buf: &mut BytesMut, sequence_number: u32) {
    let start = start_full_box(buf, b"mfhd", 0, 0);
    buf.put_u32(sequence_number);
    end_box(buf, start);
}

/// Write the `tfdt` box (version 1 for 64-bit).
pub(crate) fn write_tfdt(buf: &mut BytesMut, base_media_decode_time: u64) {
    let start = start_full_box(buf, b"tfdt", 1, 0);
    buf.put_u64(base_media_decode_time);
    end_box(buf, start);
}

/// Size of the `mdat` header for a payload of `data_size` bytes.
pub(crate) fn mdat_header_size(data_size: u64) -> u64 {
    if data_size + 8 > u32::MAX as u64 {
        16
    } else {
        8
    }
}

/// Write the `mdat` box header; the caller appends the payload.
pub(crate) fn write_mdat_header(buf: &mut BytesMut, data_size: u64) {
    if mdat_header_size(data_size) == 16 {
        // Extended size
        buf.put_u32(1);
        buf.put_slice(b"mdat");
        buf.put_u64(data_size + 16);
    } else {
        buf.put_u32((data_size + 8) as u32);
        buf.put_slice(b"mdat");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::read_u32;

    #[test]
    fn test_nested_box_sizes() {
        let mut buf = BytesMut::new();
        let outer = start_box(&mut buf, b"cont");
        let inner = start_box(&mut buf, b"ch_1");
        buf.put_u8(0xAA);
        end_box(&mut buf, inner);
        end_box(&mut buf, outer);

        assert_eq!(buf.len(), 17);
        assert_eq!(read_u32(&buf, 0), 17);
        assert_eq!(&buf[4..8], b"cont");
        assert_eq!(read_u32(&buf, 8), 9);
    }

    #[test]
    fn test_mvhd_box_size() {
        let mut buf = BytesMut::new();
        write_mvhd(&mut buf, 1000, 0, 3);
        // version-1 mvhd is 120 bytes total (8 header + 112 content)
        assert_eq!(buf.len(), 120);
        assert_eq!(&buf[4..8], b"mvhd");
        assert_eq!(read_u32(&buf, 116), 3);
    }

    #[test]
    fn test_tkhd_box_size() {
        let mut buf = BytesMut::new();
        write_tkhd(&mut buf, 1, 1000, false, 1920, 1080);
        // version-1 tkhd is 104 bytes (8 header + 96 content)
        assert_eq!(buf.len(), 104);
        assert_eq!(read_u32(&buf, 8 + 88) >> 16, 1920);
        assert_eq!(read_u32(&buf, 8 + 92) >> 16, 1080);
    }

    #[test]
    fn test_mdhd_box_size() {
        let mut buf = BytesMut::new();
        write_mdhd(&mut buf, 90000, 0, 0x15C7);
        assert_eq!(buf.len(), 44);
        assert_eq!(&buf[40..42], &0x15C7u16.to_be_bytes());
    }

    #[test]
    fn test_dinf_layout() {
        let mut buf = BytesMut::new();
        write_dinf(&mut buf);
        // dinf(8) + dref(16) + url(12)
        assert_eq!(buf.len(), 36);
        assert_eq!(&buf[12..16], b"dref");
        assert_eq!(&buf[28..32], b"url ");
    }

    #[test]
    fn test_empty_stbl_keeps_stsd() {
        let stsd = [0, 0, 0, 16, b's', b't', b's', b'd', 0, 0, 0, 0, 0, 0, 0, 0];
        let mut buf = BytesMut::new();
        write_empty_stbl(&mut buf, &stsd);
        assert_eq!(&buf[8..24], &stsd);
        // stbl(8) + stsd(16) + 3 * 16 + stsz(20)
        assert_eq!(read_u32(&buf, 0) as usize, 8 + 16 + 48 + 20);
    }

    #[test]
    fn test_mehd_version() {
        let mut buf = BytesMut::new();
        write_mehd(&mut buf, 5000);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf[8], 0);

        let mut buf = BytesMut::new();
        write_mehd(&mut buf, u32::MAX as u64 + 1);
        assert_eq!(buf.len(), 20);
        assert_eq!(buf[8], 1);
    }

    #[test]
    fn test_mdat_header_normal() {
        let mut buf = BytesMut::new();
        write_mdat_header(&mut buf, 100);
        assert_eq!(buf.len(), 8);
        assert_eq!(read_u32(&buf, 0), 108);
        assert_eq!(&buf[4..8], b"mdat");
    }

    #[test]
    fn test_mdat_header_extended() {
        let mut buf = BytesMut::new();
        write_mdat_header(&mut buf, u32::MAX as u64);
        assert_eq!(buf.len(), 16);
        assert_eq!(read_u32(&buf, 0), 1);
        assert_eq!(mdat_header_size(u32::MAX as u64), 16);
    }
}
