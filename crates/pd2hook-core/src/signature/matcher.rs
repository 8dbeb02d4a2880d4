//! Masked pattern matching over a byte haystack.

use super::Pattern;

/// Iterator over every start position in a haystack where a pattern matches,
/// in ascending order.
///
/// Candidate positions are located with `memchr` on the first exact byte of
/// the pattern; every candidate is then verified against the full mask.
pub struct Matches<'h, 'p> {
    haystack: &'h [u8],
    pattern: &'p Pattern,
    anchor: Option<(usize, u8)>,
    next: usize,
    /// Last start position at which the pattern still fits
    last: Option<usize>,
}

impl Iterator for Matches<'_, '_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let last = self.last?;

        while self.next <= last {
            let start = match self.anchor {
                Some((index, byte)) => {
                    let window = &self.haystack[self.next + index..=last + index];
                    match memchr::memchr(byte, window) {
                        Some(found) => self.next + found,
                        None => {
                            self.next = last + 1;
                            return None;
                        }
                    }
                }
                None => self.next,
            };

            self.next = start + 1;
            if self
                .pattern
                .matches(&self.haystack[start..start + self.pattern.len()])
            {
                return Some(start);
            }
        }

        None
    }
}

/// Iterate over all match positions of `pattern` in `haystack`.
pub fn matches<'h, 'p>(haystack: &'h [u8], pattern: &'p Pattern) -> Matches<'h, 'p> {
    Matches {
        haystack,
        pattern,
        anchor: pattern.anchor(),
        next: 0,
        last: haystack.len().checked_sub(pattern.len()),
    }
}

/// Position of the first match of `pattern` in `haystack`.
pub fn find_position(haystack: &[u8], pattern: &Pattern) -> Option<usize> {
    matches(haystack, pattern).next()
}

/// First match location displaced by `offset`.
///
/// The result is relative to the start of the haystack and may be negative
/// when `offset` points before the match.
pub fn find(haystack: &[u8], pattern: &Pattern, offset: isize) -> Option<isize> {
    find_position(haystack, pattern).map(|pos| (pos as isize).wrapping_add(offset))
}

/// All match positions, ascending.
pub fn find_all(haystack: &[u8], pattern: &Pattern) -> Vec<usize> {
    matches(haystack, pattern).collect()
}
