//! Vector normalization: fixed-length vectors from weighted-term maps.

use semvec_core::WeightedTermMap;

/// Rank a map's entries and project them onto exactly `dimension` slots.
///
/// Entries are ordered by weight descending, ties by token byte order. The
/// top `dimension` weights fill the vector in that order; the remainder is
/// zero-padded or dropped. The result never depends on map iteration order.
pub fn normalize(map: &WeightedTermMap, dimension: usize) -> Vec<f32> {
    let mut ranked: Vec<(&str, f32)> = map.iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut vector: Vec<f32> = ranked
        .into_iter()
        .take(dimension)
        .map(|(_, weight)| weight)
        .collect();
    vector.resize(dimension, 0.0);
    vector
}
