//! Glob-style patterns for KEYS, SCAN MATCH, PSUBSCRIBE and FUNCTION LIST.
//!
//! Supported syntax:
//!
//! - `*` matches any sequence, including the empty one
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` character classes
//! - `\x` matches `x` literally

/// A compiled glob pattern over raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: Vec<u8>,
}

impl GlobPattern {
    pub fn new(pattern: impl AsRef<[u8]>) -> Self {
        Self {
            pattern: pattern.as_ref().to_vec(),
        }
    }

    /// Returns true for the pattern `*`, which every input matches.
    pub fn matches_everything(&self) -> bool {
        self.pattern == b"*"
    }

    pub fn matches(&self, text: impl AsRef<[u8]>) -> bool {
        match_bytes(&self.pattern, text.as_ref())
    }
}

/// Matches with single-star backtracking: on a mismatch we resume right
/// after the most recent `*`, consuming one more byte of text.
fn match_bytes(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    while p < pattern.len() && pattern[p] == b'*' {
                        p += 1;
                    }
                    if p == pattern.len() {
                        return true;
                    }
                    star = Some((p, t));
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Evaluates the class starting at `pattern[start] == '['` against `c`.
///
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` if the class is unterminated.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            i += 1;
            if pattern[i] == c {
                matched = true;
            }
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            if (lo..=hi).contains(&c) {
                matched = true;
            }
            i += 2;
        } else if pattern[i] == c {
            matched = true;
        }
        i += 1;
    }

    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_and_question() {
        let pattern = GlobPattern::new("h*llo");
        assert!(pattern.matches("hello"));
        assert!(pattern.matches("hllo"));
        assert!(pattern.matches("heeeello"));
        assert!(!pattern.matches("world"));

        let pattern = GlobPattern::new("h?llo");
        assert!(pattern.matches("hallo"));
        assert!(!pattern.matches("hllo"));
        assert!(!pattern.matches("heello"));

        let pattern = GlobPattern::new("*");
        assert!(pattern.matches_everything());
        assert!(pattern.matches(""));
        assert!(pattern.matches("anything"));
    }

    #[test]
    fn test_classes() {
        let pattern = GlobPattern::new("h[ae]llo");
        assert!(pattern.matches("hello"));
        assert!(pattern.matches("hallo"));
        assert!(!pattern.matches("hillo"));

        let pattern = GlobPattern::new("h[^e]llo");
        assert!(pattern.matches("hallo"));
        assert!(!pattern.matches("hello"));

        let pattern = GlobPattern::new("key:[0-9]");
        assert!(pattern.matches("key:7"));
        assert!(!pattern.matches("key:x"));
    }

    #[test]
    fn test_escape_and_backtracking() {
        assert!(GlobPattern::new("a\\*b").matches("a*b"));
        assert!(!GlobPattern::new("a\\*b").matches("axb"));
        assert!(GlobPattern::new("*a*b").matches("xxaxxab"));
        assert!(GlobPattern::new("user:*:name").matches("user:42:name"));
        assert!(!GlobPattern::new("user:*:name").matches("user:42:age"));
        assert!(GlobPattern::new("a*").matches("a"));
    }
}
