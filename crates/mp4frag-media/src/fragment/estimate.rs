//! Fragment duration inference from keyframe cadence.

use super::source::SampleSource;
use super::{DEFAULT_FRAGMENT_DURATION_MS, MAX_AUTO_FRAGMENT_DURATION_MS};
use crate::Result;
use tracing::{info, warn};

/// Estimate a fragment duration (ms) from the sync-sample interval.
///
/// Looks for the smallest interval `k` such that samples `0, k, 2k, ...` are
/// all sync samples. Returns `None` when the first sample is not a sync
/// sample or no regular interval exists.
pub fn estimate_fragment_duration(source: &SampleSource, timescale: u32) -> Result<Option<u32>> {
    let count = source.count();
    if count == 0 {
        return Ok(None);
    }

    if !source.get(0)?.is_keyframe {
        warn!("First sample is not a sync sample, cannot detect fragment duration");
        return Ok(None);
    }

    for interval in 1..count {
        let mut sampled = 0u64;
        let mut last_dts = 0u64;
        let mut regular = true;

        for index in (0..count).step_by(interval as usize) {
            let sample = source.get(index)?;
            if !sample.is_keyframe {
                regular = false;
                break;
            }
            sampled += 1;
            last_dts = sample.dts;
        }

        if !regular {
            continue;
        }

        if last_dts == 0 || timescale == 0 {
            return Ok(None);
        }

        // fps = interval * (n - 1) / (t / timescale); ms = 1000 * interval / fps
        let denominator = timescale as u128 * (sampled - 1) as u128;
        let ms = (1000 * last_dts as u128 + denominator / 2) / denominator;
        info!(
            interval,
            fps = interval as f64 * (sampled - 1) as f64 * timescale as f64 / last_dts as f64,
            "Found regular sync sample interval"
        );
        return Ok(Some(ms.min(u32::MAX as u128) as u32));
    }

    Ok(None)
}

/// Pick the fragment duration to use when none was given.
///
/// Falls back to the default when there is no estimate, the estimate is
/// zero, or it exceeds the auto-detection ceiling.
pub fn resolve_fragment_duration(estimate: Option<u32>) -> u32 {
    match estimate {
        None | Some(0) => {
            info!("Unable to detect fragment duration, using default");
            DEFAULT_FRAGMENT_DURATION_MS
        }
        Some(ms) if ms > MAX_AUTO_FRAGMENT_DURATION_MS => {
            info!(ms, "Detected fragment duration too large, using default");
            DEFAULT_FRAGMENT_DURATION_MS
        }
        Some(ms) => ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::source::BufferedSource;
    use crate::mp4::SampleEntry;

    fn source(count: u64, gop: u64, duration: u32) -> SampleSource {
        let mut source = BufferedSource::new();
        for i in 0..count {
            source.append(SampleEntry {
                dts: i * duration as u64,
                duration,
                is_keyframe: i % gop == 0,
                ..Default::default()
            });
        }
        SampleSource::Buffered(source)
    }

    #[test]
    fn test_regular_gop() {
        // sync every 48 samples, 1001/24000 per sample: ~2002 ms
        let s = source(480, 48, 1001);
        assert_eq!(estimate_fragment_duration(&s, 24000).unwrap(), Some(2002));
    }

    #[test]
    fn test_all_sync() {
        let s = source(10, 1, 1024);
        assert_eq!(estimate_fragment_duration(&s, 48000).unwrap(), Some(21));
    }

    #[test]
    fn test_formula_matches_closed_form() {
        // round(1000 * k * d / r)
        let s = source(100, 12, 3000);
        assert_eq!(estimate_fragment_duration(&s, 90000).unwrap(), Some(400));
    }

    #[test]
    fn test_first_sample_not_sync() {
        let mut buffered = BufferedSource::new();
        buffered.append(SampleEntry {
            duration: 10,
            ..Default::default()
        });
        buffered.append(SampleEntry {
            dts: 10,
            duration: 10,
            is_keyframe: true,
            ..Default::default()
        });
        let s = SampleSource::Buffered(buffered);
        assert_eq!(estimate_fragment_duration(&s, 1000).unwrap(), None);
    }

    #[test]
    fn test_no_regular_interval() {
        // only the first sample is a sync sample
        let s = source(5, 100, 10);
        assert_eq!(estimate_fragment_duration(&s, 1000).unwrap(), None);
    }

    #[test]
    fn test_resolve() {
        assert_eq!(resolve_fragment_duration(None), DEFAULT_FRAGMENT_DURATION_MS);
        assert_eq!(resolve_fragment_duration(Some(0)), DEFAULT_FRAGMENT_DURATION_MS);
        assert_eq!(resolve_fragment_duration(Some(15000)), 15000);
        assert_eq!(resolve_fragment_duration(Some(15001)), DEFAULT_FRAGMENT_DURATION_MS);
        assert_eq!(resolve_fragment_duration(Some(4000)), 4000);
    }
}
