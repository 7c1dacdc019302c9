//! Release tag ordering and pagination helpers.
//!
//! Tags are compared as versions, never as strings: `0.10.0` is newer than
//! `0.9.0`. A tag is a dotted run of numbers with an optional leading `v` and
//! an optional pre-release suffix (`rc1`, `-beta.2`, `a1`); a suffixed version
//! sorts before the same version without one.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

/// Matches `v1.2.3`, `0.14.0rc1`, `1.0.0-beta.2`.
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[vV]?(\d+(?:\.\d+)*)(?:[-_.]?([A-Za-z][0-9A-Za-z.\-]*))?$")
        .expect("version regex")
});

/// Matches one `<url>; rel="..."` entry of a `Link` header.
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]*)>\s*;\s*rel="([^"]*)""#).expect("link regex")
});

/// A parsed release tag.
#[derive(Debug, Clone)]
pub struct ReleaseVersion {
    tag: String,
    release: Vec<u64>,
    pre: Option<Vec<SuffixPart>>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SuffixPart {
    Num(u64),
    Text(String),
}

impl ReleaseVersion {
    /// Parse a tag; `None` if it doesn't look like a version.
    pub fn parse(tag: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(tag.trim())?;
        let release = caps[1]
            .split('.')
            .map(|n| n.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        let pre = caps.get(2).map(|m| suffix_key(m.as_str()));
        Some(Self {
            tag: tag.to_string(),
            release,
            pre,
        })
    }

    /// The original tag text.
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ReleaseVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReleaseVersion {}

/// Split a suffix into alternating text and number runs so `rc10 > rc2`.
fn suffix_key(suffix: &str) -> Vec<SuffixPart> {
    let mut parts = Vec::new();
    let mut digits = String::new();
    let mut text = String::new();

    for c in suffix.chars().filter(|c| c.is_ascii_alphanumeric()) {
        if c.is_ascii_digit() {
            if !text.is_empty() {
                parts.push(SuffixPart::Text(std::mem::take(&mut text).to_ascii_lowercase()));
            }
            digits.push(c);
        } else {
            if !digits.is_empty() {
                parts.push(SuffixPart::Num(std::mem::take(&mut digits).parse().unwrap_or(0)));
            }
            text.push(c);
        }
    }
    if !text.is_empty() {
        parts.push(SuffixPart::Text(text.to_ascii_lowercase()));
    }
    if !digits.is_empty() {
        parts.push(SuffixPart::Num(digits.parse().unwrap_or(0)));
    }
    parts
}

/// Pick the greatest version among `tags`, skipping ones that don't parse.
pub fn select_latest<'a>(tags: impl IntoIterator<Item = &'a str>) -> Option<ReleaseVersion> {
    tags.into_iter()
        .filter_map(|tag| {
            let parsed = ReleaseVersion::parse(tag);
            if parsed.is_none() {
                tracing::warn!(tag, "ignoring release tag that is not a version");
            }
            parsed
        })
        .max()
}

/// Extract the `rel="next"` URL from a `Link` header value.
pub fn next_link(header: &str) -> Option<String> {
    LINK_RE
        .captures_iter(header)
        .find(|caps| caps[2].split_whitespace().any(|rel| rel == "next"))
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(tag: &str) -> ReleaseVersion {
        ReleaseVersion::parse(tag).unwrap_or_else(|| panic!("parse {tag}"))
    }

    #[test]
    fn numeric_not_lexical_ordering() {
        assert!(v("0.10.0") > v("0.9.0"));
        let latest = select_latest(["0.9.0", "0.10.0"]).expect("latest");
        assert_eq!(latest.tag(), "0.10.0");
    }

    #[test]
    fn leading_v_and_short_versions() {
        assert_eq!(v("v1.2"), v("1.2.0"));
        assert!(v("v2") > v("1.99.99"));
        assert_eq!(v("v0.3.1").tag(), "v0.3.1");
    }

    #[test]
    fn prerelease_sorts_before_release() {
        assert!(v("0.14.0rc1") < v("0.14.0"));
        assert!(v("0.14.0rc2") > v("0.14.0rc1"));
        assert!(v("0.14.0rc10") > v("0.14.0rc2"));
        assert!(v("1.0.0-beta.2") < v("1.0.0"));
        assert!(v("0.14.0rc1") > v("0.13.9"));
        assert!(v("1.0.0a1").pre.is_some());
    }

    #[test]
    fn unparseable_tags_are_skipped() {
        assert!(ReleaseVersion::parse("nightly").is_none());
        assert!(ReleaseVersion::parse("").is_none());
        let latest = select_latest(["nightly", "0.2.0", "latest"]).expect("latest");
        assert_eq!(latest.tag(), "0.2.0");
        assert!(select_latest(["nightly"]).is_none());
    }

    #[test]
    fn next_link_found() {
        let header = r#"<https://api.github.com/repositories/1/releases?per_page=100&page=2>; rel="next", <https://api.github.com/repositories/1/releases?per_page=100&page=5>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/releases?per_page=100&page=2")
        );
    }

    #[test]
    fn next_link_absent_on_last_page() {
        let header = r#"<https://api.github.com/x?page=1>; rel="prev", <https://api.github.com/x?page=1>; rel="first""#;
        assert!(next_link(header).is_none());
    }
}
