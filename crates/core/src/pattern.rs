//! Segment-wise pattern matching for fact keys and event topics.
//!
//! Keys and topics are split on `:` and `.` delimiters. `*` matches exactly
//! one segment; `**` matches one or more segments.

/// Split a key or topic into segments on `:` and `.`.
pub fn split_segments(s: &str) -> Vec<&str> {
    s.split(|c| c == ':' || c == '.').collect()
}

/// Whether a pattern contains wildcard segments.
pub fn is_pattern(s: &str) -> bool {
    split_segments(s).iter().any(|seg| *seg == "*" || *seg == "**")
}

/// Match a key or topic against a pattern, segment by segment.
pub fn matches(pattern: &str, candidate: &str) -> bool {
    let pat = split_segments(pattern);
    let segs = split_segments(candidate);
    match_segments(&pat, &segs)
}

fn match_segments(pattern: &[&str], segments: &[&str]) -> bool {
    match pattern.first() {
        None => segments.is_empty(),
        Some(&"**") => {
            // One or more segments: consume at least one, then try every split.
            if segments.is_empty() {
                return false;
            }
            (1..=segments.len()).any(|n| match_segments(&pattern[1..], &segments[n..]))
        }
        Some(&"*") => {
            !segments.is_empty() && match_segments(&pattern[1..], &segments[1..])
        }
        Some(literal) => {
            segments.first() == Some(literal) && match_segments(&pattern[1..], &segments[1..])
        }
    }
}
