//! Index-addressable sample sources.

use crate::mp4::{SampleEntry, SampleTable};
use crate::{Error, Result};

/// Samples resolved on demand from the input's `moov` tables.
#[derive(Debug, Clone)]
pub struct TableSource {
    table: SampleTable,
}

impl TableSource {
    pub fn new(table: SampleTable) -> Self {
        Self { table }
    }
}

/// Samples collected in memory while walking a fragmented input.
#[derive(Debug, Clone, Default)]
pub struct BufferedSource {
    samples: Vec<SampleEntry>,
}

impl BufferedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample at the end.
    pub fn append(&mut self, sample: SampleEntry) {
        self.samples.push(sample);
    }
}

/// The samples of one track.
#[derive(Debug, Clone)]
pub enum SampleSource {
    Table(TableSource),
    Buffered(BufferedSource),
}

impl SampleSource {
    /// Number of samples currently available.
    pub fn count(&self) -> u32 {
        match self {
            Self::Table(source) => source.table.sample_count(),
            Self::Buffered(source) => source.samples.len() as u32,
        }
    }

    /// Sample at `index`.
    pub fn get(&self, index: u32) -> Result<SampleEntry> {
        let sample = match self {
            Self::Table(source) => source.table.get(index),
            Self::Buffered(source) => source.samples.get(index as usize).copied(),
        };
        sample.ok_or(Error::OutOfRange {
            index,
            count: self.count(),
        })
    }

    /// The buffered view, for sources that accept appends.
    pub fn buffered_mut(&mut self) -> Result<&mut BufferedSource> {
        match self {
            Self::Buffered(source) => Ok(source),
            Self::Table(_) => Err(Error::not_supported(
                "appending to a sample table backed source",
            )),
        }
    }
}

impl From<SampleTable> for SampleSource {
    fn from(table: SampleTable) -> Self {
        Self::Table(TableSource::new(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(count: u32) -> SampleTable {
        let mut builder = SampleTable::builder();
        builder.set_stts(vec![(count, 100)]);
        builder.set_stsc(vec![(1, count, 1)]);
        builder.set_stsz(50, count, vec![]);
        builder.set_chunk_offsets(vec![4096]);
        builder.build()
    }

    #[test]
    fn test_table_source() {
        let source = SampleSource::from(table(3));
        assert_eq!(source.count(), 3);

        let sample = source.get(2).unwrap();
        assert_eq!(sample.dts, 200);
        assert_eq!(sample.offset, 4196);

        let err = source.get(3).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { index: 3, count: 3 }));
    }

    #[test]
    fn test_table_source_rejects_append() {
        let mut source = SampleSource::from(table(1));
        assert!(matches!(source.buffered_mut(), Err(Error::NotSupported(_))));
    }

    #[test]
    fn test_buffered_source_grows() {
        let mut source = SampleSource::Buffered(BufferedSource::new());
        assert_eq!(source.count(), 0);
        assert!(source.get(0).is_err());

        for i in 0..4u64 {
            source.buffered_mut().unwrap().append(SampleEntry {
                dts: i * 10,
                duration: 10,
                ..Default::default()
            });
        }

        assert_eq!(source.count(), 4);
        assert_eq!(source.get(3).unwrap().dts, 30);
    }
}
