use url::Url;

/// Normalize an absolute HTTP(S) URL: lowercase host, no fragment, collapsed
/// duplicate slashes in the path, default ports removed. Equality between
/// URLs is defined on this form. Returns None for anything that is not an
/// absolute http/https URL.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;

    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str()?;

    url.set_fragment(None);

    let path = url.path().to_string();
    if path.contains("//") {
        url.set_path(&collapse_slashes(&path));
    }

    Some(url.to_string())
}

/// Normalize a URL that may be missing its scheme (e.g. a bare
/// "acme.example" typed into a spreadsheet). Prepends https:// when needed.
pub fn coerce_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        normalize_url(trimmed)
    } else {
        normalize_url(&format!("https://{}", trimmed))
    }
}

/// The (lowercased) host of a URL, if it parses.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.to_ascii_lowercase())
}

/// Registrable-domain approximation: the last two labels of the host with
/// any `www.` prefix stripped. Good enough to keep discovery on-site; a
/// public-suffix lookup is deliberately out of scope.
pub fn registrable_domain(host: &str) -> String {
    let host = host.strip_prefix("www.").unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        host.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

/// Whether two URLs share a registrable domain.
pub fn same_site(a: &str, b: &str) -> bool {
    match (host_of(a), host_of(b)) {
        (Some(ha), Some(hb)) => registrable_domain(&ha) == registrable_domain(&hb),
        _ => false,
    }
}

/// Resolve a possibly-relative href against a base URL, normalized.
pub fn resolve_href(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let joined = base.join(href.trim()).ok()?;
    normalize_url(joined.as_str())
}

fn collapse_slashes(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut prev_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_was_slash {
                result.push(c);
            }
            prev_was_slash = true;
        } else {
            result.push(c);
            prev_was_slash = false;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lowercases_host_and_strips_fragment() {
        assert_eq!(
            normalize_url("https://ACME.Example/About#team").as_deref(),
            Some("https://acme.example/About")
        );
    }

    #[test]
    fn test_normalize_removes_default_port() {
        assert_eq!(
            normalize_url("https://acme.example:443/pricing").as_deref(),
            Some("https://acme.example/pricing")
        );
        assert_eq!(
            normalize_url("http://acme.example:80/").as_deref(),
            Some("http://acme.example/")
        );
    }

    #[test]
    fn test_normalize_collapses_duplicate_slashes() {
        assert_eq!(
            normalize_url("https://acme.example//a///b").as_deref(),
            Some("https://acme.example/a/b")
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_url("https://ACME.example//x/#frag").unwrap();
        assert_eq!(normalize_url(&once).as_deref(), Some(once.as_str()));
    }

    #[test]
    fn test_rejects_non_http() {
        assert!(normalize_url("ftp://acme.example/file").is_none());
        assert!(normalize_url("not a url").is_none());
        assert!(normalize_url("mailto:team@acme.example").is_none());
    }

    #[test]
    fn test_coerce_adds_scheme() {
        assert_eq!(
            coerce_url("acme.example").as_deref(),
            Some("https://acme.example/")
        );
        assert_eq!(
            coerce_url("  http://acme.example  ").as_deref(),
            Some("http://acme.example/")
        );
        assert!(coerce_url("").is_none());
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("www.acme.example"), "acme.example");
        assert_eq!(registrable_domain("blog.acme.example"), "acme.example");
        assert_eq!(registrable_domain("acme.example"), "acme.example");
    }

    #[test]
    fn test_same_site() {
        assert!(same_site(
            "https://acme.example/a",
            "https://www.acme.example/b"
        ));
        assert!(!same_site("https://acme.example", "https://other.example"));
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(
            resolve_href("https://acme.example/about/", "../team").as_deref(),
            Some("https://acme.example/team")
        );
        assert_eq!(
            resolve_href("https://acme.example/", "https://other.example/x").as_deref(),
            Some("https://other.example/x")
        );
    }
}
