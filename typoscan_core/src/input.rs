use crate::error::ConfigError;
use std::collections::HashSet;
use std::path::Path;

/// The identifiers a search is trying to hit. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSet {
    identifiers: HashSet<String>,
}

impl TargetSet {
    /// Builds a target set, rejecting an empty one.
    pub fn new<I, S>(identifiers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identifiers: HashSet<String> = identifiers.into_iter().map(Into::into).collect();
        if identifiers.is_empty() {
            return Err(ConfigError::EmptyTargetSet);
        }
        Ok(Self { identifiers })
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }
}

/// Decodes UTF-8, silently dropping invalid byte sequences. A U+FFFD that was
/// genuinely encoded in the input is kept.
pub(crate) fn decode_dropping_invalid(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

/// Reads a text file leniently. A missing file reads as `None`; invalid UTF-8
/// bytes are dropped.
fn read_text(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(decode_dropping_invalid(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// The first non-blank line of `path`, trimmed.
pub fn load_base_secret(path: &Path) -> Result<String, ConfigError> {
    read_text(path)?
        .and_then(|text| {
            text.lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        })
        .ok_or_else(|| ConfigError::MissingBaseSecret(path.to_path_buf()))
}

/// Every non-blank trimmed line of `path`.
pub fn load_targets(path: &Path) -> Result<TargetSet, ConfigError> {
    let text = read_text(path)?.unwrap_or_default();
    TargetSet::new(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty()),
    )
}

/// Deduplicates `lines` keeping first occurrences, with the empty candidate
/// placed first unless `skip_empty` is set.
pub fn base_candidates<I>(lines: I, skip_empty: bool) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    if !skip_empty {
        seen.insert(String::new());
        candidates.push(String::new());
    }
    for line in lines {
        if seen.insert(line.clone()) {
            candidates.push(line);
        }
    }
    candidates
}

/// Loads base candidates from `path`, one per line. Whitespace inside a line
/// is significant. A missing file contributes no lines.
pub fn load_base_candidates(path: &Path, skip_empty: bool) -> Result<Vec<String>, ConfigError> {
    let text = read_text(path)?.unwrap_or_default();
    let candidates = base_candidates(text.lines().map(str::to_string), skip_empty);
    if candidates.is_empty() {
        return Err(ConfigError::NoCandidates);
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn invalid_utf8_bytes_are_dropped() {
        assert_eq!(decode_dropping_invalid(b"pass\xFFword\xC3"), "password");
        assert_eq!(decode_dropping_invalid("caf\u{e9}\u{FFFD}".as_bytes()), "caf\u{e9}\u{FFFD}");
    }

    #[test]
    fn load_base_candidates_drops_invalid_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passphrases.txt");
        fs::write(&path, b"hun\xFEter2\nok\n").unwrap();
        assert_eq!(
            load_base_candidates(&path, true).unwrap(),
            vec!["hunter2", "ok"]
        );
    }

    #[test]
    fn base_candidates_prepend_empty_and_dedup() {
        let lines = vec!["b".to_string(), "a".to_string(), "b".to_string(), String::new()];
        assert_eq!(base_candidates(lines, false), vec!["", "b", "a"]);
    }

    #[test]
    fn base_candidates_skip_empty_keeps_explicit_blank_line() {
        let lines = vec!["x".to_string(), String::new(), "x".to_string()];
        assert_eq!(base_candidates(lines, true), vec!["x", ""]);
    }

    #[test]
    fn target_set_rejects_empty() {
        assert!(matches!(
            TargetSet::new(Vec::<String>::new()),
            Err(ConfigError::EmptyTargetSet)
        ));
        let targets = TargetSet::new(["X123", "X123", "Y9"]).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains("Y9"));
        assert!(!targets.contains("y9"));
    }

    #[test]
    fn load_base_secret_takes_first_non_blank_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.txt");
        fs::write(&path, "\n   \n  abandon ability able  \nsecond\n").unwrap();
        assert_eq!(load_base_secret(&path).unwrap(), "abandon ability able");
    }

    #[test]
    fn load_base_secret_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");
        assert!(matches!(
            load_base_secret(&path),
            Err(ConfigError::MissingBaseSecret(_))
        ));
    }

    #[test]
    fn load_targets_trims_and_skips_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addresses.txt");
        fs::write(&path, " addr1 \n\naddr2\r\n").unwrap();
        let targets = load_targets(&path).unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains("addr1"));
        assert!(targets.contains("addr2"));
    }

    #[test]
    fn load_targets_empty_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("addresses.txt");
        fs::write(&path, "\n\n").unwrap();
        assert!(matches!(
            load_targets(&path),
            Err(ConfigError::EmptyTargetSet)
        ));
    }

    #[test]
    fn load_base_candidates_keeps_inner_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passphrases.txt");
        fs::write(&path, "my pass \nother\nmy pass \n").unwrap();
        assert_eq!(
            load_base_candidates(&path, false).unwrap(),
            vec!["", "my pass ", "other"]
        );
    }

    #[test]
    fn load_base_candidates_missing_file_still_tries_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");
        assert_eq!(load_base_candidates(&path, false).unwrap(), vec![""]);
        assert!(matches!(
            load_base_candidates(&path, true),
            Err(ConfigError::NoCandidates)
        ));
    }
}
