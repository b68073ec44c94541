// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Cross-component consistency checks

/// True when `getter` yields the same value for every item
///
/// Empty and single-item inputs are trivially consistent.
///
/// ```rust
/// use tempo_updater::all_equal;
///
/// let rates = [0.5, 0.5, 0.5];
/// assert!(all_equal(rates.iter(), |r| *r));
/// assert!(!all_equal(["a", "bb"], str::len));
/// ```
pub fn all_equal<I, V, F>(items: I, mut getter: F) -> bool
where
    I: IntoIterator,
    F: FnMut(I::Item) -> V,
    V: PartialEq,
{
    let mut values = items.into_iter().map(&mut getter);
    match values.next() {
        Some(first) => values.all(|value| value == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_consistent() {
        let empty: Vec<u32> = Vec::new();
        assert!(all_equal(empty, |v| v));
    }

    #[test]
    fn test_detects_mismatch() {
        assert!(all_equal(vec![(1, 'a'), (2, 'a')], |(_, c)| c));
        assert!(!all_equal(vec![(1, 'a'), (2, 'b')], |(_, c)| c));
    }
}
