use std::cmp::Ordering;

/// Canonical digits-only form of a runtime tag (`"3.8"` and `"python3.8"` both become `"38"`).
pub fn normalize_runtime_tag(tag: &str) -> String {
    tag.chars().filter(char::is_ascii_digit).collect()
}

/// Shortest-first, then lexicographic.
///
/// Orders runtime tags numerically for same-width tags (`"27" < "38" < "310"`) and makes the
/// compression codec prefer short keys as canonical copies.
pub fn key_order(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
