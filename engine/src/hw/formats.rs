//! Expands the hardware's reported ranges into the discrete sample rates
//! and buffer sizes offered to callers.

use super::types::ValueRange;

pub const CANDIDATE_SAMPLE_RATES: [f64; 6] =
    [44_100.0, 48_000.0, 88_200.0, 96_000.0, 176_400.0, 192_000.0];

/// Hardware ranges are matched with this much slack, in Hz.
pub const SAMPLE_RATE_TOLERANCE: f64 = 2.0;

pub const BUFFER_SIZE_STEP: u32 = 32;

pub const PREFERRED_MIN_BUFFER_SIZE: usize = 512;

pub fn available_sample_rates(ranges: &[ValueRange], current: f64) -> Vec<f64> {
    let mut rates: Vec<f64> = CANDIDATE_SAMPLE_RATES
        .iter()
        .copied()
        .filter(|&rate| {
            ranges
                .iter()
                .any(|r| r.contains_within(rate, SAMPLE_RATE_TOLERANCE))
        })
        .collect();
    if rates.is_empty() && current > 0.0 {
        rates.push(current);
    }
    rates
}

pub fn available_buffer_sizes(ranges: &[ValueRange], current: usize, max: u32) -> Vec<usize> {
    let mut sizes = Vec::new();
    for range in ranges {
        let minimum = range.minimum.max(0.0) as usize;
        if minimum > 0 {
            sizes.push(minimum);
        }
    }
    for size in (BUFFER_SIZE_STEP..max).step_by(BUFFER_SIZE_STEP as usize) {
        if ranges.iter().any(|r| r.contains_within(size as f64, 0.0)) {
            sizes.push(size as usize);
        }
    }
    if current > 0 {
        sizes.push(current);
    }
    sizes.sort_unstable();
    sizes.dedup();
    sizes
}

/// First available size of at least 512 frames, else 512.
pub fn default_buffer_size(available: &[usize]) -> usize {
    available
        .iter()
        .copied()
        .find(|&size| size >= PREFERRED_MIN_BUFFER_SIZE)
        .unwrap_or(PREFERRED_MIN_BUFFER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_match_ranges_with_slack() {
        let ranges = [ValueRange::new(44_100.0, 48_000.0), ValueRange::single(95_999.0)];
        assert_eq!(
            available_sample_rates(&ranges, 48_000.0),
            vec![44_100.0, 48_000.0, 96_000.0]
        );
    }

    #[test]
    fn rates_fall_back_to_current() {
        let ranges = [ValueRange::single(22_050.0)];
        assert_eq!(available_sample_rates(&ranges, 22_050.0), vec![22_050.0]);
        assert!(available_sample_rates(&[], 0.0).is_empty());
    }

    #[test]
    fn buffer_sizes_expand_ranges() {
        let ranges = [ValueRange::new(15.0, 100.0)];
        assert_eq!(
            available_buffer_sizes(&ranges, 100, 8192),
            vec![15, 32, 64, 96, 100]
        );
    }

    #[test]
    fn buffer_sizes_stop_below_max() {
        let ranges = [ValueRange::new(4096.0, 16_384.0)];
        let sizes = available_buffer_sizes(&ranges, 4096, 8192);
        assert_eq!(sizes.first(), Some(&4096));
        assert_eq!(sizes.last(), Some(&8160));
    }

    #[test]
    fn buffer_sizes_fall_back_to_current() {
        assert_eq!(available_buffer_sizes(&[], 256, 8192), vec![256]);
    }

    #[test]
    fn default_prefers_512_or_more() {
        assert_eq!(default_buffer_size(&[64, 128, 1024]), 1024);
        assert_eq!(default_buffer_size(&[64, 128]), 512);
        assert_eq!(default_buffer_size(&[]), 512);
    }
}
