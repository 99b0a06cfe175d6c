//! Module name to script path mapping
//!
//! Format: `{base_url}{dir/}{kebab-file}.{ext}?v={token}`
//!
//! - Only the final `/` segment is rewritten (camelCase to kebab-case, lowercased)
//! - Directory segments are kept verbatim
//! - The query is omitted when the cache token is empty

use std::fmt;

/// Location of the script backing a module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptPath {
    module: String,
    relative: String,
    url: String,
}

impl ScriptPath {
    /// Derives the script location for a module name
    pub fn for_module(name: &str, base_url: &str, extension: &str, cache_token: &str) -> Self {
        let (dir, file) = match name.rfind('/') {
            Some(idx) => (&name[..=idx], &name[idx + 1..]),
            None => ("", name),
        };

        let extension = extension.trim_start_matches('.');
        let mut relative = format!("{}{}", dir, kebab_case(file));
        if !extension.is_empty() {
            relative.push('.');
            relative.push_str(extension);
        }

        let mut url = join_base(base_url, &relative);
        if !cache_token.is_empty() {
            url.push_str("?v=");
            url.push_str(cache_token);
        }

        Self {
            module: name.to_string(),
            relative,
            url,
        }
    }

    /// The module name this path was derived from
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Path relative to the base URL, without the cache-busting query
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Full location including base URL and cache-busting query
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for ScriptPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Converts `camelCase` to `kebab-case`
///
/// A dash is inserted before an uppercase letter that follows a lowercase
/// letter or digit; the result is lowercased. Existing dashes are kept.
pub fn kebab_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 4);
    let mut prev: Option<char> = None;

    for c in segment.chars() {
        if c.is_uppercase() {
            if let Some(p) = prev {
                if p.is_lowercase() || p.is_ascii_digit() {
                    out.push('-');
                }
            }
        }
        out.extend(c.to_lowercase());
        prev = Some(c);
    }

    out
}

fn join_base(base_url: &str, relative: &str) -> String {
    if base_url.is_empty() {
        return relative.to_string();
    }
    if base_url.ends_with('/') {
        format!("{}{}", base_url, relative)
    } else {
        format!("{}/{}", base_url, relative)
    }
}
