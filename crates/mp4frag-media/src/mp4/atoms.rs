//! MP4 atom definitions and parsing.

use super::SampleTable;

/// Four-character atom type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const CTTS: Self = Self(*b"ctts");
    pub const MVEX: Self = Self(*b"mvex");
    pub const TREX: Self = Self(*b"trex");
    pub const MOOF: Self = Self(*b"moof");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed atom header.
#[derive(Debug, Clone)]
pub struct Atom {
    /// Atom type code.
    pub atom_type: AtomType,
    /// Atom size including header.
    pub size: u64,
    /// File offset where atom data starts (after header).
    pub data_offset: u64,
    /// Size of the header (8 or 16 bytes).
    pub header_size: u8,
}

impl Atom {
    /// Get the data size (size - header).
    pub fn data_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size as u64)
    }

    /// File offset of the first header byte.
    pub fn start(&self) -> u64 {
        self.data_offset - self.header_size as u64
    }

    /// File offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.data_offset + self.data_size()
    }
}

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Hint,
    Meta,
    Text,
    Subtitle,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            b"text" => Self::Text,
            b"subt" => Self::Subtitle,
            _ => Self::Unknown(bytes),
        }
    }

    /// The four-character code written in `hdlr`.
    pub fn to_bytes(self) -> [u8; 4] {
        match self {
            Self::Video => *b"vide",
            Self::Audio => *b"soun",
            Self::Hint => *b"hint",
            Self::Meta => *b"meta",
            Self::Text => *b"text",
            Self::Subtitle => *b"subt",
            Self::Unknown(bytes) => bytes,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

impl std::fmt::Display for HandlerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.to_bytes();
        write!(f, "{}", std::str::from_utf8(&code).unwrap_or("????"))
    }
}

/// Track information extracted from trak atom.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Track ID.
    pub track_id: u32,
    /// Handler type (video/audio/etc).
    pub handler_type: HandlerType,
    /// Handler name from hdlr, without the terminator.
    pub handler_name: Vec<u8>,
    /// Track duration in movie timescale (from tkhd).
    pub duration: u64,
    /// Media duration in media timescale (from mdhd).
    pub media_duration: u64,
    /// Media timescale (samples per second for this track).
    pub timescale: u32,
    /// Packed ISO-639-2/T language code from mdhd.
    pub language: u16,
    /// Sample table with all sample info.
    pub sample_table: SampleTable,
    /// The complete stsd box (header included), copied verbatim to the output.
    pub sample_descriptions: Option<Vec<u8>>,
    /// Width (for video tracks).
    pub width: Option<u32>,
    /// Height (for video tracks).
    pub height: Option<u32>,
}

impl TrackInfo {
    /// Create empty track info.
    pub fn new(track_id: u32) -> Self {
        Self {
            track_id,
            handler_type: HandlerType::Unknown([0; 4]),
            handler_name: Vec::new(),
            duration: 0,
            media_duration: 0,
            timescale: 1,
            language: 0x55C4, // und
            sample_table: SampleTable::default(),
            sample_descriptions: None,
            width: None,
            height: None,
        }
    }

    /// Number of samples in the track's sample table.
    pub fn sample_count(&self) -> u32 {
        self.sample_table.sample_count()
    }
}

/// Per-track fragment defaults from a trex atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackExtends {
    pub track_id: u32,
    /// Default sample description index (1-based).
    pub default_description_index: u32,
    pub default_duration: u32,
    pub default_size: u32,
    pub default_flags: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_round_trip_codes() {
        assert_eq!(HandlerType::from_bytes(*b"vide"), HandlerType::Video);
        assert_eq!(HandlerType::from_bytes(*b"sbtl").to_bytes(), *b"sbtl");
        assert_eq!(HandlerType::Audio.to_string(), "soun");
    }

    #[test]
    fn test_atom_bounds() {
        let atom = Atom {
            atom_type: AtomType::MOOF,
            size: 100,
            data_offset: 1016,
            header_size: 16,
        };
        assert_eq!(atom.start(), 1000);
        assert_eq!(atom.end(), 1100);
        assert_eq!(atom.data_size(), 84);
    }
}
