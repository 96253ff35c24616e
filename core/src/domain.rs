//! URL scheme and domain-key extraction.
//!
//! The domain key is the lowercased host of the record URL. Rows whose URL
//! cannot be parsed yield no key and are excluded from routing and sampling.

use url::Url;

/// Splits a raw URL into `(scheme, domain_key)`. Returns `None` for empty,
/// unparseable, or host-less URLs.
pub fn split_url(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = Url::parse(trimmed).ok()?;
    let host = parsed.host_str()?.trim_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    Some((parsed.scheme().to_ascii_lowercase(), host))
}

/// The domain key alone, when only the partition key is needed.
pub fn domain_key(raw: &str) -> Option<String> {
    split_url(raw).map(|(_, host)| host)
}

/// Domain keys double as directory names in the bucket tree; dots are
/// replaced so `a.b` and `a/b` style collisions cannot occur on disk.
pub fn dir_name(domain: &str) -> String {
    domain.replace('.', "_")
}
