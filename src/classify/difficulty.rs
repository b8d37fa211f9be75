//! Whitewater difficulty grade parsing.
//!
//! AW stores a reach's grade as one combined string such as `IV-V(V+)`:
//! an optional minimum, the maximum, and an optional parenthesised outlier
//! (usually a single harder rapid).

use regex::Regex;
use std::sync::OnceLock;

const DIFFICULTY_PATTERN: &str = r"^(?:([IV5.\d|]{1,3})-)?-?([IV5.\d|]{1,3}[+|-]?)\(?([IV5.\d|]{0,3}[+|-]?)";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Difficulty {
    pub minimum: Option<String>,
    pub maximum: Option<String>,
    pub outlier: Option<String>,
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(DIFFICULTY_PATTERN).expect("difficulty pattern is valid"))
}

/// Splits a combined grade into its parts. Groups that are absent or match
/// nothing come back as `None`; an unparseable string yields all `None`.
pub fn parse_difficulty(combined: &str) -> Difficulty {
    let Some(caps) = pattern().captures(combined.trim()) else {
        return Difficulty::default();
    };

    let group = |i: usize| {
        caps.get(i)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    Difficulty {
        minimum: group(1),
        maximum: group(2),
        outlier: group(3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(s: &str) -> (Option<String>, Option<String>, Option<String>) {
        let d = parse_difficulty(s);
        (d.minimum, d.maximum, d.outlier)
    }

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_full_range_with_outlier() {
        assert_eq!(parts("IV-V(V+)"), (some("IV"), some("V"), some("V+")));
    }

    #[test]
    fn test_single_grade() {
        assert_eq!(parts("III"), (None, some("III"), None));
    }

    #[test]
    fn test_range_without_outlier() {
        assert_eq!(parts("II-III"), (some("II"), some("III"), None));
        assert_eq!(parts("III-IV+"), (some("III"), some("IV+"), None));
    }

    #[test]
    fn test_single_grade_with_outlier() {
        assert_eq!(parts("III(IV)"), (None, some("III"), some("IV")));
    }

    #[test]
    fn test_decimal_grades() {
        assert_eq!(parts("5.0-5.2"), (some("5.0"), some("5.2"), None));
    }

    #[test]
    fn test_leading_dash_without_minimum() {
        assert_eq!(parts("-III"), (None, some("III"), None));
        assert_eq!(parts("-IV+(V)"), (None, some("IV+"), some("V")));
    }

    #[test]
    fn test_unparseable_is_all_none() {
        assert_eq!(parse_difficulty("flatwater"), Difficulty::default());
        assert_eq!(parse_difficulty(""), Difficulty::default());
    }
}
