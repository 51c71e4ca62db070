//! Folder listing types and pattern resolution
//!
//! Users select folders with shell-style globs (`Lists/*`) or with
//! special-use shorthands (`@all` for the folder carrying `\All`).
//! [`resolve`] turns a pattern list into the concrete folder names to
//! process, in the order they should be processed.

use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Attribute marking a folder that cannot be selected.
pub const NOSELECT: &str = "\\Noselect";

/// Default pattern list: the folder flagged `\All` ("All Mail").
pub const DEFAULT_PATTERN: &str = "@all";

/// One entry of a LIST response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderInfo {
    /// Folder attributes with their leading backslash
    /// (e.g. `\HasNoChildren`, `\All`).
    pub attributes: Vec<String>,
    /// Hierarchy delimiter, if the server reports one.
    pub delimiter: Option<String>,
    /// Full folder name.
    pub name: String,
}

impl FolderInfo {
    /// Build a folder entry from borrowed parts.
    #[must_use]
    pub fn new(attributes: &[&str], delimiter: Option<&str>, name: &str) -> Self {
        Self {
            attributes: attributes.iter().map(ToString::to_string).collect(),
            delimiter: delimiter.map(ToString::to_string),
            name: name.to_string(),
        }
    }

    /// Whether the folder carries the given attribute (exact match).
    #[must_use]
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|a| a == attribute)
    }

    /// Whether the folder can be selected at all.
    #[must_use]
    pub fn is_selectable(&self) -> bool {
        !self.has_attribute(NOSELECT)
    }
}

/// A user-supplied folder selector.
#[derive(Debug, Clone)]
pub enum FolderPattern {
    /// `@name`: matches folders carrying the attribute `\Name`.
    Flag(String),
    /// A shell glob matched against the full folder name.
    Glob { pattern: String, regex: Option<Regex> },
}

impl FolderPattern {
    /// Classify a raw pattern string.
    ///
    /// # Examples
    ///
    /// ```
    /// use gmailfilters::FolderPattern;
    ///
    /// let p = FolderPattern::parse("@all");
    /// assert!(matches!(p, FolderPattern::Flag(ref f) if f == "\\All"));
    ///
    /// let g = FolderPattern::parse("Lists/*");
    /// assert!(g.matches_name("Lists/rust"));
    /// ```
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.strip_prefix('@').map_or_else(
            || Self::Glob {
                pattern: raw.to_string(),
                regex: Regex::new(&glob_to_regex(raw)).ok(),
            },
            |name| Self::Flag(format!("\\{}", titlecase(name))),
        )
    }

    /// Parse a list of raw patterns, falling back to `@all` when the
    /// list is empty.
    #[must_use]
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Vec<Self> {
        if raw.is_empty() {
            return vec![Self::parse(DEFAULT_PATTERN)];
        }
        raw.iter().map(|p| Self::parse(p.as_ref())).collect()
    }

    /// Glob match against a folder name. Flag patterns never match a
    /// bare name.
    #[must_use]
    pub fn matches_name(&self, name: &str) -> bool {
        match self {
            Self::Flag(_) => false,
            Self::Glob { pattern, regex } => regex
                .as_ref()
                .map_or_else(|| pattern == name, |re| re.is_match(name)),
        }
    }

    /// Whether this pattern selects the given folder. Does not apply
    /// the `\Noselect` exclusion.
    #[must_use]
    pub fn matches(&self, folder: &FolderInfo) -> bool {
        match self {
            Self::Flag(flag) => folder.has_attribute(flag),
            Self::Glob { .. } => self.matches_name(&folder.name),
        }
    }
}

impl std::fmt::Display for FolderPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag(flag) => write!(f, "@{}", flag.trim_start_matches('\\')),
            Self::Glob { pattern, .. } => f.write_str(pattern),
        }
    }
}

/// Resolve patterns against the listed folders.
///
/// Patterns are applied in order; for each pattern the folders are
/// scanned in listing order. A folder matching several patterns is
/// returned once per matching pattern. `\Noselect` folders are never
/// returned.
#[must_use]
pub fn resolve(all_folders: &[FolderInfo], patterns: &[FolderPattern]) -> Vec<String> {
    let mut selected = Vec::new();

    for pattern in patterns {
        debug!("applying pattern {}", pattern);
        for folder in all_folders {
            if !folder.is_selectable() {
                debug!("rejecting folder {} (noselect)", folder.name);
                continue;
            }
            if pattern.matches(folder) {
                debug!("selecting folder {} ({})", folder.name, pattern);
                selected.push(folder.name.clone());
            }
        }
    }

    debug!("selected folders = {:?}", selected);
    selected
}

/// Upper-case the first letter of every alphabetic run and lower-case
/// the rest (`all` -> `All`, `SENT` -> `Sent`, `foo_bar` -> `Foo_Bar`).
fn titlecase(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Translate a shell glob into an anchored regular expression.
///
/// `*` matches any run, `?` any single character, `[...]` a set and
/// `[!...]` its complement. An unterminated `[` is literal.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut re = String::from("^(?s:");
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    re.push_str("\\[");
                    continue;
                }

                let mut set = &chars[i..j];
                re.push('[');
                if set.first() == Some(&'!') {
                    re.push('^');
                    set = &set[1..];
                } else if set.first() == Some(&'^') {
                    re.push_str("\\^");
                    set = &set[1..];
                }
                for &sc in set {
                    if matches!(sc, '\\' | '[' | ']' | '&' | '~' | '^') {
                        re.push('\\');
                    }
                    re.push(sc);
                }
                re.push(']');
                i = j + 1;
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }

    re.push_str(")$");
    re
}
