//! Browsable commit URLs for hosted repositories.
//!
//! A template is `host/{path1}/{path2}/.../{commitId}`. Placeholders other
//! than `{commitId}` are filled positionally from the remote URL's path
//! segments, in the order they appear in the template.

use tracing::debug;

/// Templates for the common hosting providers.
pub const DEFAULT_TEMPLATES: &[&str] = &[
    "github.com/{path1}/{path2}/commit/{commitId}",
    "gitlab.com/{path1}/{path2}/-/commit/{commitId}",
    "bitbucket.org/{path1}/{path2}/commits/{commitId}",
    "dev.azure.com/{path1}/{path2}/{path3}/{path4}/commit/{commitId}",
];

const COMMIT_PLACEHOLDER: &str = "{commitId}";

/// Default templates as owned strings, for settings.
pub fn default_templates() -> Vec<String> {
    DEFAULT_TEMPLATES.iter().map(|t| t.to_string()).collect()
}

/// Normalize a git remote URL to `https://host/path`.
///
/// Handles `git@host:owner/repo.git`, `ssh://git@host:22/owner/repo`,
/// `git://host/owner/repo` and plain http(s) URLs. A trailing `/` and
/// `.git` are removed.
pub fn normalize_remote_url(url: &str) -> String {
    let url = url.trim();

    let normalized = if let Some((scheme, rest)) = url.split_once("://") {
        match scheme {
            "ssh" | "git" | "git+ssh" | "ssh+git" => {
                let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
                format!("https://{}/{}", bare_host(authority), path)
            }
            _ => format!("{scheme}://{rest}"),
        }
    } else if let Some((authority, path)) = url.split_once(':') {
        // scp-style: [user@]host:path
        format!("https://{}/{}", bare_host(authority), path.trim_start_matches('/'))
    } else {
        url.to_string()
    };

    let trimmed = normalized.trim_end_matches('/');
    trimmed
        .strip_suffix(".git")
        .unwrap_or(trimmed)
        .trim_end_matches('/')
        .to_string()
}

/// Host part of an authority, without user info or port.
fn bare_host(authority: &str) -> &str {
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    host.split_once(':').map_or(host, |(h, _)| h)
}

/// Split a normalized URL into scheme, host and non-empty path segments.
fn split_url(url: &str) -> Option<(&str, &str, Vec<&str>)> {
    let (scheme, rest) = url.split_once("://")?;
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let segments = path.split('/').filter(|s| !s.is_empty()).collect();
    Some((scheme, bare_host(authority), segments))
}

/// Build the web URL for `commit_hash` on the repository at `remote_url`.
///
/// The first template whose host equals the URL's host and whose path
/// placeholders can all be filled wins. Otherwise the result is
/// `<normalized url>/commit/<hash>`.
pub fn resolve<S: AsRef<str>>(remote_url: &str, commit_hash: &str, templates: &[S]) -> String {
    let normalized = normalize_remote_url(remote_url);
    let commit_hash = commit_hash.trim();

    if let Some((scheme, host, segments)) = split_url(&normalized).filter(|_| !commit_hash.is_empty()) {
        for template in templates {
            let template = template.as_ref();
            if let Some(url) = apply_template(template, scheme, host, &segments, commit_hash) {
                debug!(template, url = %url, "matched scm url template");
                return url;
            }
        }
    }

    debug!(url = %normalized, "no scm url template matched");
    format!("{normalized}/commit/{commit_hash}")
}

fn apply_template(
    template: &str,
    scheme: &str,
    host: &str,
    segments: &[&str],
    commit_hash: &str,
) -> Option<String> {
    let template_host = template.split('/').next().unwrap_or_default();
    if !template_host.eq_ignore_ascii_case(host) {
        return None;
    }

    let mut filled = String::with_capacity(template.len() + commit_hash.len());
    let mut position = 0;
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let end = start + rest[start..].find('}')?;
        filled.push_str(&rest[..start]);
        let placeholder = &rest[start..=end];
        if placeholder == COMMIT_PLACEHOLDER {
            filled.push_str(commit_hash);
        } else {
            filled.push_str(segments.get(position)?);
            position += 1;
        }
        rest = &rest[end + 1..];
    }
    filled.push_str(rest);

    Some(format!("{scheme}://{}", collapse_slashes(&filled)))
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
