//! Hostname matching against certificate names.
//!
//! A pattern matches when it equals the hostname, or when both have the same
//! number of dot-separated labels and every pattern label is either `*` or
//! equal to the hostname label in that position. `*` stands for exactly one
//! non-empty label. Comparison is ASCII case-insensitive.

pub fn check_hostname(hostname: &str, allowed: &str) -> bool {
    if hostname.eq_ignore_ascii_case(allowed) {
        return true;
    }

    let host_labels = hostname.split('.');
    let pattern_labels = allowed.split('.');
    if host_labels.clone().count() != pattern_labels.clone().count() {
        return false;
    }

    host_labels
        .zip(pattern_labels)
        .all(|(h, p)| (p == "*" && !h.is_empty()) || h.eq_ignore_ascii_case(p))
}

/// True if `hostname` matches any of `names`.
pub fn matches_any<'a>(hostname: &str, names: impl IntoIterator<Item = &'a str>) -> bool {
    names.into_iter().any(|n| check_hostname(hostname, n))
}
