/// Fixed-width padding and validity masks for variable-length feature sequences.

use crate::error::{Result, TrackError};
use crate::track_types::{SegmentFeature, FEATURE_COUNT};

/// `max_len` rows of `[dh, dz, slope]`: the sequence first, zero rows after it.
pub fn pad_features(sequence: &[SegmentFeature], max_len: usize) -> Result<Vec<[f64; FEATURE_COUNT]>> {
    if max_len == 0 {
        return Err(TrackError::validation("max_len must be positive"));
    }
    if sequence.len() > max_len {
        return Err(TrackError::validation(format!(
            "sequence length {} exceeds max_len {}",
            sequence.len(),
            max_len
        )));
    }

    let mut rows = vec![[0.0; FEATURE_COUNT]; max_len];
    for (row, feature) in rows.iter_mut().zip(sequence) {
        *row = feature.to_array();
    }
    Ok(rows)
}

/// `real_len` ones followed by zeros, `max_len` entries in total. Negative
/// lengths are rejected.
pub fn make_mask(real_len: i64, max_len: i64) -> Result<Vec<f64>> {
    if real_len < 0 || max_len < 0 {
        return Err(TrackError::validation(format!(
            "lengths must be non-negative (real_len {}, max_len {})",
            real_len, max_len
        )));
    }
    if real_len > max_len {
        return Err(TrackError::validation(format!(
            "real_len {} exceeds max_len {}",
            real_len, max_len
        )));
    }

    let (real_len, max_len) = (real_len as usize, max_len as usize);
    Ok((0..max_len).map(|i| if i < real_len { 1.0 } else { 0.0 }).collect())
}
