//! MP4 sample table parsing.
//!
//! Sample tables describe how samples (frames) are organized in the file:
//! - stts: sample durations (decoding time)
//! - stss: sync sample table (keyframes)
//! - stsc: sample-to-chunk mapping
//! - stsz: sample sizes
//! - stco/co64: chunk offsets
//! - ctts: composition time offsets (for B-frames)
//!
//! The tables are kept in their compact run-length form and individual
//! samples are resolved on demand, so a long movie never has its whole sample
//! list expanded in memory.

/// A resolved sample with everything needed to fragment it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleEntry {
    /// File offset where sample data starts.
    pub offset: u64,
    /// Sample size in bytes.
    pub size: u32,
    /// Decode timestamp in media timescale.
    pub dts: u64,
    /// Sample duration in media timescale.
    pub duration: u32,
    /// Composition time offset (for PTS calculation).
    pub cts_offset: i32,
    /// Whether this sample is a keyframe (sync sample).
    pub is_keyframe: bool,
    /// Sample description index (0-based).
    pub description_index: u32,
}

impl SampleEntry {
    /// Decode timestamp of the sample that follows this one.
    pub fn end_dts(&self) -> u64 {
        self.dts + self.duration as u64
    }
}

#[derive(Debug, Clone, Copy)]
struct TimeRun {
    first_sample: u32,
    count: u32,
    delta: u32,
    first_dts: u64,
}

#[derive(Debug, Clone, Copy)]
struct CtsRun {
    first_sample: u32,
    count: u32,
    offset: i32,
}

#[derive(Debug, Clone, Copy)]
struct ChunkRun {
    first_chunk: u32,
    first_sample: u32,
    samples_per_chunk: u32,
    description_index: u32,
}

/// Sample table of one track, resolved lazily.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    sample_count: u32,
    time_runs: Vec<TimeRun>,
    cts_runs: Vec<CtsRun>,
    /// 0-based sync sample indices; `None` when every sample is a sync sample.
    sync_samples: Option<Vec<u32>>,
    uniform_size: u32,
    sample_sizes: Vec<u32>,
    chunk_runs: Vec<ChunkRun>,
    chunk_offsets: Vec<u64>,
}

impl SampleTable {
    /// Create a new sample table builder.
    pub fn builder() -> SampleTableBuilder {
        SampleTableBuilder::new()
    }

    /// Number of samples in the table.
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Check whether the table has no samples.
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    /// Resolve the sample at `index`.
    pub fn get(&self, index: u32) -> Option<SampleEntry> {
        if index >= self.sample_count {
            return None;
        }

        let (dts, duration) = self.timing(index);
        let (offset, description_index) = self.location(index);

        Some(SampleEntry {
            offset,
            size: self.size_of(index),
            dts,
            duration,
            cts_offset: self.cts_offset(index),
            is_keyframe: self.is_sync(index),
            description_index,
        })
    }

    /// Iterate over all samples.
    pub fn iter(&self) -> impl Iterator<Item = SampleEntry> + '_ {
        (0..self.sample_count).filter_map(move |i| self.get(i))
    }

    /// Check whether the sample at `index` is a sync sample.
    pub fn is_sync(&self, index: u32) -> bool {
        match &self.sync_samples {
            None => true,
            Some(sync) => sync.binary_search(&index).is_ok(),
        }
    }

    fn size_of(&self, index: u32) -> u32 {
        if self.uniform_size > 0 {
            self.uniform_size
        } else {
            self.sample_sizes.get(index as usize).copied().unwrap_or(0)
        }
    }

    fn timing(&self, index: u32) -> (u64, u32) {
        let pos = self
            .time_runs
            .partition_point(|run| run.first_sample <= index);
        if pos == 0 {
            // No stts at all: one unit per sample
            return (index as u64, 1);
        }

        let run = self.time_runs[pos - 1];
        // Samples past the end of stts keep the last delta
        let into = (index - run.first_sample) as u64;
        (run.first_dts + into * run.delta as u64, run.delta)
    }

    fn cts_offset(&self, index: u32) -> i32 {
        let pos = self.cts_runs.partition_point(|run| run.first_sample <= index);
        if pos == 0 {
            return 0;
        }
        let run = self.cts_runs[pos - 1];
        if index - run.first_sample < run.count {
            run.offset
        } else {
            0
        }
    }

    fn location(&self, index: u32) -> (u64, u32) {
        let pos = self
            .chunk_runs
            .partition_point(|run| run.first_sample <= index);
        if pos == 0 {
            return (0, 0);
        }

        let run = self.chunk_runs[pos - 1];
        let spc = run.samples_per_chunk.max(1);
        let chunk_in_run = (index - run.first_sample) / spc;
        let chunk = run.first_chunk + chunk_in_run;
        let chunk_first_sample = run.first_sample + chunk_in_run * spc;

        let chunk_base = self.chunk_offsets.get(chunk as usize).copied().unwrap_or(0);
        let within: u64 = (chunk_first_sample..index)
            .map(|i| self.size_of(i) as u64)
            .sum();

        (chunk_base + within, run.description_index)
    }
}

/// Builder for constructing a sample table from raw atom data.
pub struct SampleTableBuilder {
    // stts: sample duration entries
    stts_entries: Vec<(u32, u32)>, // (count, delta)
    // stss: sync sample numbers (1-based)
    sync_samples: Option<Vec<u32>>,
    // stsc: sample-to-chunk entries
    stsc_entries: Vec<(u32, u32, u32)>, // (first_chunk, samples_per_chunk, sample_description_index)
    // stsz: sample sizes (if uniform_size > 0, all samples have that size)
    uniform_size: u32,
    sample_count: u32,
    sample_sizes: Vec<u32>,
    // stco/co64: chunk offsets
    chunk_offsets: Vec<u64>,
    // ctts: composition time offsets
    ctts_entries: Vec<(u32, i32)>, // (count, offset)
}

impl SampleTableBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            stts_entries: Vec::new(),
            sync_samples: None,
            stsc_entries: Vec::new(),
            uniform_size: 0,
            sample_count: 0,
            sample_sizes: Vec::new(),
            chunk_offsets: Vec::new(),
            ctts_entries: Vec::new(),
        }
    }

    /// Set stts (decoding time to sample) entries.
    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts_entries = entries;
    }

    /// Set stss (sync sample) entries.
    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.sync_samples = Some(samples);
    }

    /// Set stsc (sample to chunk) entries.
    pub fn set_stsc(&mut self, entries: Vec<(u32, u32, u32)>) {
        self.stsc_entries = entries;
    }

    /// Set stsz (sample size) data.
    pub fn set_stsz(&mut self, uniform_size: u32, sample_count: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.sample_count = sample_count;
        self.sample_sizes = sizes;
    }

    /// Set chunk offsets (from stco or co64).
    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    /// Set ctts (composition time to sample) entries.
    pub fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts_entries = entries;
    }

    /// Build the sample table.
    pub fn build(self) -> SampleTable {
        let sample_count = if self.uniform_size > 0 {
            self.sample_count
        } else {
            self.sample_sizes.len() as u32
        };

        if sample_count == 0 {
            return SampleTable::default();
        }

        let time_runs = self.resolve_time_runs();
        let cts_runs = self.resolve_cts_runs();
        let chunk_runs = self.resolve_chunk_runs(sample_count);

        let sync_samples = self.sync_samples.map(|numbers| {
            // stss uses 1-based numbering
            let mut sync: Vec<u32> = numbers
                .into_iter()
                .filter(|n| *n > 0)
                .map(|n| n - 1)
                .collect();
            sync.sort_unstable();
            sync.dedup();
            sync
        });

        SampleTable {
            sample_count,
            time_runs,
            cts_runs,
            sync_samples,
            uniform_size: self.uniform_size,
            sample_sizes: self.sample_sizes,
            chunk_runs,
            chunk_offsets: self.chunk_offsets,
        }
    }

    fn resolve_time_runs(&self) -> Vec<TimeRun> {
        let mut runs = Vec::with_capacity(self.stts_entries.len());
        let mut first_sample = 0u32;
        let mut first_dts = 0u64;

        for &(count, delta) in &self.stts_entries {
            if count == 0 {
                continue;
            }
            runs.push(TimeRun {
                first_sample,
                count,
                delta,
                first_dts,
            });
            first_sample = first_sample.saturating_add(count);
            first_dts += count as u64 * delta as u64;
        }

        runs
    }

    fn resolve_cts_runs(&self) -> Vec<CtsRun> {
        let mut runs = Vec::with_capacity(self.ctts_entries.len());
        let mut first_sample = 0u32;

        for &(count, offset) in &self.ctts_entries {
            if count == 0 {
                continue;
            }
            runs.push(CtsRun {
                first_sample,
                count,
                offset,
            });
            first_sample = first_sample.saturating_add(count);
        }

        runs
    }

    fn resolve_chunk_runs(&self, sample_count: u32) -> Vec<ChunkRun> {
        let mut runs = Vec::with_capacity(self.stsc_entries.len());
        let num_chunks = self.chunk_offsets.len() as u32;
        let mut first_sample = 0u32;

        for (i, &(first_chunk, samples_per_chunk, description_idx)) in
            self.stsc_entries.iter().enumerate()
        {
            if first_chunk == 0 || first_sample >= sample_count {
                break;
            }
            let next_first = match self.stsc_entries.get(i + 1) {
                Some(next) => next.0,
                None => num_chunks + 1,
            };

            runs.push(ChunkRun {
                first_chunk: first_chunk - 1, // Convert to 0-based
                first_sample,
                samples_per_chunk,
                description_index: description_idx.saturating_sub(1),
            });

            let chunks = next_first.saturating_sub(first_chunk);
            first_sample = first_sample.saturating_add(chunks.saturating_mul(samples_per_chunk));
        }

        runs
    }
}

impl Default for SampleTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}
