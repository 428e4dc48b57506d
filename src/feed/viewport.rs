//! Pure viewport arithmetic.
//!
//! Active-index tracking and the load-more trigger both consume the same
//! visibility signal but are decided independently here.

/// Clamp `index` into `[0, len - 1]`. Returns 0 for an empty feed.
pub fn clamp_index(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

/// Whether the item at `index` is within `threshold` items of the end.
///
/// `index` is assumed to be a visible position in a feed of `len` items.
pub fn within_threshold(index: usize, len: usize, threshold: usize) -> bool {
    len > 0 && index.saturating_add(threshold) >= len
}

/// Full load-more trigger: near the end, more pages exist, nothing in flight.
pub fn should_load_more(
    index: usize,
    len: usize,
    threshold: usize,
    has_more: bool,
    loading_more: bool,
) -> bool {
    has_more && !loading_more && within_threshold(index, len, threshold)
}

pub fn next_index(current: usize, len: usize) -> usize {
    clamp_index(current.saturating_add(1), len)
}

pub fn previous_index(current: usize, len: usize) -> usize {
    clamp_index(current.saturating_sub(1), len)
}
