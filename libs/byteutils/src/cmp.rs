//! Checks of the counts declared in file headers against what was actually read

/// Returns true if `declared`, a count taken from the file, equals `found`
///
/// A declared count too large for `usize` never matches
#[inline]
pub fn count_matches<D: TryInto<usize>>(declared: D, found: usize) -> bool {
    declared.try_into().is_ok_and(|declared| declared == found)
}
