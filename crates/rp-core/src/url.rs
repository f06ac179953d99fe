//! URL utilities
//!
//! Host and path extraction run once per interception event and work
//! directly on string slices. URLs that are not in canonical form go
//! through the `url` crate instead, as does query rewriting on the page
//! path.

use url::Url;

// =============================================================================
// Scheme
// =============================================================================

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    if bytes.len() > colon_pos + 2
        && bytes[colon_pos + 1] == b'/'
        && bytes[colon_pos + 2] == b'/'
    {
        return Some(colon_pos + 3);
    }

    None
}

/// True for `http:` and `https:` URLs, the only documents the page-level
/// hooks are installed into.
#[inline]
pub fn is_web_url(url: &str) -> bool {
    let bytes = url.as_bytes();
    (bytes.len() >= 5 && bytes[..5].eq_ignore_ascii_case(b"http:"))
        || (bytes.len() >= 6 && bytes[..6].eq_ignore_ascii_case(b"https:"))
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Authority ends at the first '/', '?' or '#'
    let authority_end = bytes[scheme_end..]
        .iter()
        .position(|&b| b == b'/' || b == b'?' || b == b'#')
        .map_or(bytes.len(), |i| scheme_end + i);

    // Skip userinfo
    let host_start = bytes[scheme_end..authority_end]
        .iter()
        .rposition(|&b| b == b'@')
        .map_or(scheme_end, |i| scheme_end + i + 1);

    // IPv6 literal keeps its brackets
    if bytes.get(host_start) == Some(&b'[') {
        let close = bytes[host_start..authority_end].iter().position(|&b| b == b']')?;
        return Some((host_start, host_start + close + 1));
    }

    let host_end = bytes[host_start..authority_end]
        .iter()
        .position(|&b| b == b':')
        .map_or(authority_end, |i| host_start + i);

    Some((host_start, host_end))
}

/// Fast host extraction. Returns a slice into the original URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

// =============================================================================
// Path Extraction
// =============================================================================

/// Extract the path portion of a URL. Missing paths read as `/`.
#[inline]
pub fn extract_path(url: &str) -> &str {
    let scheme_end = match get_scheme_end(url) {
        Some(pos) => pos,
        None => return "/",
    };

    let bytes = url.as_bytes();

    let mut path_start = None;
    for (i, &b) in bytes[scheme_end..].iter().enumerate() {
        if b == b'/' {
            path_start = Some(scheme_end + i);
            break;
        }
        if b == b'?' || b == b'#' {
            return "/";
        }
    }

    let path_start = match path_start {
        Some(pos) => pos,
        None => return "/",
    };

    let path_end = bytes[path_start..]
        .iter()
        .position(|&b| b == b'?' || b == b'#')
        .map_or(bytes.len(), |i| path_start + i);

    &url[path_start..path_end]
}

// =============================================================================
// Normalization
// =============================================================================

/// True when the byte scanners above would disagree with a WHATWG parser:
/// backslashes, whitespace or non-ASCII bytes, escapes in the host, or dot
/// segments in the path. Browser-supplied URLs are already canonical.
pub fn needs_normalization(url: &str) -> bool {
    if url
        .bytes()
        .any(|b| !b.is_ascii() || b == b'\\' || b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return true;
    }
    if extract_host(url).map_or(true, |host| host.contains('%')) {
        return true;
    }
    extract_path(url).split('/').any(is_dot_segment)
}

fn is_dot_segment(segment: &str) -> bool {
    matches!(segment, "." | "..")
        || ["%2e", ".%2e", "%2e.", "%2e%2e"]
            .iter()
            .any(|dot| segment.eq_ignore_ascii_case(dot))
}

/// Host and path as a WHATWG parser reports them: punycode host, dot
/// segments collapsed, `\\` read as `/`. None if the URL does not parse.
pub fn normalized_host_path(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    let path = match parsed.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    Some((host, path))
}

// =============================================================================
// Query Parameter Handling
// =============================================================================

/// One query parameter edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEdit<'a> {
    /// Replace the first occurrence and drop the rest, or append
    Set(&'a str, &'a str),
    /// Drop every occurrence
    Remove(&'a str),
}

/// Apply query edits to a document URL.
/// Returns the rewritten URL, or None if the URL does not parse or no edit
/// was given.
pub fn rewrite_query(url: &str, edits: &[QueryEdit<'_>]) -> Option<String> {
    if edits.is_empty() {
        return None;
    }

    let mut parsed = Url::parse(url).ok()?;
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    for edit in edits {
        match *edit {
            QueryEdit::Set(key, value) => match pairs.iter().position(|(k, _)| k == key) {
                Some(first) => {
                    pairs[first].1 = value.to_string();
                    let mut idx = 0;
                    pairs.retain(|(k, _)| {
                        let keep = idx <= first || k != key;
                        idx += 1;
                        keep
                    });
                }
                None => pairs.push((key.to_string(), value.to_string())),
            },
            QueryEdit::Remove(key) => pairs.retain(|(k, _)| k != key),
        }
    }

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    Some(parsed.into())
}
