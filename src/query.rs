//! Query parsing: pull `@repo` mentions out of a free-form question and
//! canonicalise repository sets into stable workspace keys.
//!
//! Pure functions, no I/O, no shared state — the lightest component in the
//! host.

use crate::error::{HostError, HostResult};

/// Result of parsing a raw question: the repository set it mentions and the
/// prompt with those mentions stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub repos: Vec<String>,
    pub prompt: String,
}

/// Extracts `@name` tokens matching `[a-zA-Z0-9_-]+`, lowercases and
/// deduplicates them, and returns the remaining prompt text with mentions
/// removed and whitespace runs collapsed.
///
/// The reserved `@name@version` extension is not implemented as a feature;
/// a `@version` run immediately following a mention is consumed and
/// discarded entirely (it becomes neither a second repository nor prompt
/// text), per spec: "version must be ignored by compliant parsers until
/// implemented."
pub fn parse(input: &str) -> ParsedQuery {
    let mut repos = Vec::new();
    let mut prompt = String::with_capacity(input.len());

    let mut idx = 0;
    while idx < input.len() {
        let ch = input[idx..].chars().next().expect("idx is a char boundary");
        let ch_len = ch.len_utf8();
        if ch == '@' {
            let (name, after_name) = scan_mention(input, idx + ch_len);
            if let Some(name) = name {
                if !repos.contains(&name) {
                    repos.push(name);
                }
                idx = skip_reserved_version_suffix(input, after_name);
                continue;
            }
        }
        prompt.push(ch);
        idx += ch_len;
    }

    repos.sort();
    ParsedQuery {
        repos,
        prompt: collapse_whitespace(&prompt),
    }
}

/// Scans a run of mention characters starting at `start`. Returns the
/// lowercased name (`None` if the run is empty) and the index just past it.
fn scan_mention(input: &str, start: usize) -> (Option<String>, usize) {
    let mut end = start;
    for ch in input[start..].chars() {
        if is_mention_char(ch) {
            end += ch.len_utf8();
        } else {
            break;
        }
    }
    if end > start {
        (Some(input[start..end].to_lowercase()), end)
    } else {
        (None, start)
    }
}

/// If a `@version`-shaped run immediately follows a just-parsed mention,
/// returns the index past it so `parse` discards it; otherwise returns
/// `after_name` unchanged.
fn skip_reserved_version_suffix(input: &str, after_name: usize) -> usize {
    if let Some(rest) = input[after_name..].strip_prefix('@') {
        let (version, version_end) = scan_mention(input, input.len() - rest.len());
        if version.is_some() {
            return version_end;
        }
    }
    after_name
}

fn is_mention_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

/// Canonical `+`-joined sorted lowercase identifier for a non-empty set of
/// repository names. Fails on an empty set.
pub fn workspace_key<I, S>(names: I) -> HostResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = merge_one(names);
    if set.is_empty() {
        return Err(HostError::EmptyRepositorySet);
    }
    set.sort();
    Ok(set.join("+"))
}

/// Splits a workspace key back into its member names.
pub fn split_workspace_key(key: &str) -> Vec<String> {
    key.split('+').map(|s| s.to_string()).collect()
}

/// Flattens any number of name lists, lowercases, deduplicates, and sorts.
pub fn merge<I, S>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = Vec<S>>,
    S: AsRef<str>,
{
    let flattened = lists.into_iter().flatten();
    merge_one(flattened)
}

fn merge_one<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let lower = name.as_ref().to_lowercase();
        if !out.contains(&lower) {
            out.push(lower);
        }
    }
    out.sort();
    out
}

/// Renders a canonical query back into `@repo1 @repo2 prompt text` form.
/// Exists for the round-trip test property; no production code path calls it.
pub fn render(query: &ParsedQuery) -> String {
    let mut parts: Vec<String> = query.repos.iter().map(|r| format!("@{r}")).collect();
    if !query.prompt.is_empty() {
        parts.push(query.prompt.clone());
    }
    parts.join(" ")
}
