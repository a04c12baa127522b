//! Release update checking
//!
//! Parses the release metadata a GitHub-style releases endpoint returns
//! and decides whether it is newer than the running version. Fetching the
//! JSON is the embedding shell's job; this module only interprets it.

use serde::Deserialize;
use tracing::debug;

/// Metadata of a published release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Version with any leading `v` stripped
    pub version: String,
    /// Web page of the release
    pub url: String,
    /// Release notes body
    pub notes: String,
}

#[derive(Deserialize)]
struct RawRelease {
    tag_name: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    body: String,
}

/// Parse release JSON into [`ReleaseInfo`]. Returns `None` when the payload
/// is not a release document.
pub fn parse_release(json: &str) -> Option<ReleaseInfo> {
    let raw: RawRelease = serde_json::from_str(json).ok()?;
    let version = raw.tag_name.strip_prefix('v').unwrap_or(&raw.tag_name).to_string();
    Some(ReleaseInfo {
        version,
        url: raw.html_url,
        notes: raw.body,
    })
}

/// Whether `candidate` is a strictly newer dotted version than `current`.
///
/// Components compare numerically and a shorter version is padded with
/// zeros, so `1.2` equals `1.2.0` and `1.10` beats `1.9`. Components that
/// do not parse as numbers count as zero.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    let a = numeric_components(candidate);
    let b = numeric_components(current);
    let width = a.len().max(b.len());
    for i in 0..width {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        if x != y {
            return x > y;
        }
    }
    false
}

fn numeric_components(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map(|part| part.trim().parse().unwrap_or(0))
        .collect()
}

/// Interpret fetched release JSON against the running version.
///
/// Returns the release only when it is strictly newer. Unparseable payloads
/// yield `None`; a failed update check must never surface as an error.
pub fn check_release(json: &str, current_version: &str) -> Option<ReleaseInfo> {
    let release = parse_release(json)?;
    if is_newer(&release.version, current_version) {
        debug!(version = %release.version, "newer release available");
        Some(release)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELEASE: &str = r#"{
        "tag_name": "v1.3.0",
        "html_url": "https://example.com/releases/v1.3.0",
        "body": "Bug fixes and faster hashing."
    }"#;

    #[test]
    fn parses_and_strips_the_v_prefix() {
        let release = parse_release(RELEASE).unwrap();
        assert_eq!(release.version, "1.3.0");
        assert_eq!(release.url, "https://example.com/releases/v1.3.0");
        assert!(release.notes.contains("faster hashing"));

        let bare = parse_release(r#"{"tag_name": "2.0"}"#).unwrap();
        assert_eq!(bare.version, "2.0");
    }

    #[test]
    fn version_compare_is_numeric_with_padding() {
        assert!(is_newer("1.10.0", "1.9.0"));
        assert!(is_newer("2.0", "1.99.99"));
        assert!(is_newer("1.2.1", "1.2"));
        assert!(!is_newer("1.2", "1.2.0"));
        assert!(!is_newer("1.2.0", "1.2.0"));
        assert!(!is_newer("1.1.9", "1.2"));
    }

    #[test]
    fn unparseable_components_count_as_zero() {
        assert!(!is_newer("1.x", "1.0.1"));
        assert!(is_newer("1.0.1", "1.x"));
    }

    #[test]
    fn check_release_only_reports_strictly_newer() {
        assert!(check_release(RELEASE, "1.2.9").is_some());
        assert!(check_release(RELEASE, "1.3.0").is_none());
        assert!(check_release(RELEASE, "1.4.0").is_none());
        assert!(check_release("not json", "0.1.0").is_none());
        assert!(check_release(r#"{"message": "Not Found"}"#, "0.1.0").is_none());
    }
}
