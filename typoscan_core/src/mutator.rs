use crate::error::ConfigError;
use crate::input::decode_dropping_invalid;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

/// A single kind of typo the engine knows how to apply.
///
/// Variants are declared in the order the engine applies them when expanding
/// a string, so iterating a `BTreeSet<MutationRule>` yields that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationRule {
    /// Invert the case of every letter at once.
    CapsLock,
    /// Remove one character.
    Delete,
    /// Type one character twice.
    Repeat,
    /// Swap two adjacent characters.
    Swap,
    /// Flip the case of a single letter.
    Case,
    /// Replace one character with an alternative from the [`CharMap`].
    Map,
}

/// Per-character substitution table for [`MutationRule::Map`].
///
/// Every entry maps a character to a non-empty list of alternatives; each
/// alternative is tried on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharMap {
    entries: HashMap<char, Vec<char>>,
}

impl CharMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps every character of `sources` to the characters of `alternatives`.
    /// Later calls override earlier ones for the same source character. An
    /// empty `alternatives` string is ignored.
    pub fn insert(&mut self, sources: &str, alternatives: &str) {
        let alternatives: Vec<char> = alternatives.chars().collect();
        if alternatives.is_empty() {
            return;
        }
        for source in sources.chars() {
            self.entries.insert(source, alternatives.clone());
        }
    }

    /// Parses the typos map format: one rule per line, the characters to
    /// replace and their replacements separated by whitespace. Lines with
    /// fewer than two fields are skipped.
    pub fn parse(text: &str) -> Self {
        let mut map = Self::new();
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            if let (Some(sources), Some(alternatives)) = (fields.next(), fields.next()) {
                map.insert(sources, alternatives);
            }
        }
        map
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Self::parse(&decode_dropping_invalid(&bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ConfigError::MissingTyposMap(path.to_path_buf()))
            }
            Err(source) => Err(ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn get(&self, c: char) -> Option<&[char]> {
        self.entries.get(&c).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Expands a base string into every variant reachable within a fixed number
/// of typos.
///
/// The engine is immutable once built and can be shared by reference across
/// worker threads; all traversal state lives in the [`Variants`] iterator
/// returned by [`MutationEngine::generate`].
#[derive(Debug, Clone, Default)]
pub struct MutationEngine {
    budget: usize,
    rules: BTreeSet<MutationRule>,
    char_map: CharMap,
}

impl MutationEngine {
    /// Creates an engine with the given typo budget and no rules enabled.
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    pub fn with_rule(mut self, rule: MutationRule) -> Self {
        self.rules.insert(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = MutationRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Installs a substitution table and enables [`MutationRule::Map`].
    pub fn with_char_map(mut self, char_map: CharMap) -> Self {
        self.char_map = char_map;
        self.rules.insert(MutationRule::Map);
        self
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Returns a lazy iterator over `base` and all of its variants.
    ///
    /// `base` is always yielded first and no string is yielded twice. Every
    /// call starts from a fresh visited set.
    pub fn generate(&self, base: &str) -> Variants<'_> {
        let mut visited = HashSet::new();
        visited.insert(base.to_string());
        let mut frontier = VecDeque::new();
        frontier.push_back((base.to_string(), self.budget));
        Variants {
            engine: self,
            visited,
            frontier,
        }
    }

    /// Calls `emit` once for every single-typo child of `s`, in rule order.
    /// Children are not deduplicated here.
    fn expand(&self, s: &str, mut emit: impl FnMut(String)) {
        let chars: Vec<char> = s.chars().collect();

        if self.rules.contains(&MutationRule::CapsLock) {
            emit(invert_case(s));
        }

        for i in 0..chars.len() {
            for rule in &self.rules {
                match rule {
                    MutationRule::CapsLock => {}
                    MutationRule::Delete => emit(splice(&chars, i, None)),
                    MutationRule::Repeat => {
                        emit(splice(&chars, i, Some(&[chars[i], chars[i]][..])))
                    }
                    MutationRule::Swap => {
                        if i + 1 < chars.len() {
                            let mut swapped = chars.clone();
                            swapped.swap(i, i + 1);
                            emit(swapped.into_iter().collect());
                        }
                    }
                    MutationRule::Case => {
                        let c = chars[i];
                        let toggled: Vec<char> = if c.is_lowercase() {
                            c.to_uppercase().collect()
                        } else if c.is_uppercase() {
                            c.to_lowercase().collect()
                        } else {
                            continue;
                        };
                        emit(splice(&chars, i, Some(toggled.as_slice())));
                    }
                    MutationRule::Map => {
                        if let Some(alternatives) = self.char_map.get(chars[i]) {
                            for alt in alternatives {
                                emit(splice(&chars, i, Some(std::slice::from_ref(alt))));
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Breadth-first walk over the typo graph of one base string.
///
/// Strings are marked visited when first discovered, so each is yielded and
/// expanded exactly once, and always at the shortest typo distance from the
/// base. The yielded set is therefore every string within `budget` typos.
pub struct Variants<'a> {
    engine: &'a MutationEngine,
    visited: HashSet<String>,
    frontier: VecDeque<(String, usize)>,
}

impl Iterator for Variants<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let (current, remaining) = self.frontier.pop_front()?;
        if remaining > 0 {
            let engine = self.engine;
            let visited = &mut self.visited;
            let frontier = &mut self.frontier;
            engine.expand(&current, |child| {
                if !visited.contains(&child) {
                    visited.insert(child.clone());
                    frontier.push_back((child, remaining - 1));
                }
            });
        }
        Some(current)
    }
}

fn splice(chars: &[char], at: usize, replacement: Option<&[char]>) -> String {
    chars[..at]
        .iter()
        .chain(replacement.unwrap_or_default())
        .chain(&chars[at + 1..])
        .collect()
}

fn invert_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_lowercase() {
            out.extend(c.to_uppercase());
        } else if c.is_uppercase() {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    const ALL_FIXED_RULES: [MutationRule; 5] = [
        MutationRule::CapsLock,
        MutationRule::Delete,
        MutationRule::Repeat,
        MutationRule::Swap,
        MutationRule::Case,
    ];

    fn variant_set(engine: &MutationEngine, base: &str) -> HashSet<String> {
        engine.generate(base).collect()
    }

    fn set_of(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn random_base(rng: &mut ChaCha8Rng) -> String {
        const ALPHABET: &[char] = &['a', 'B', 'c', '1', 'a', 'Z', '-'];
        let len = rng.random_range(0..=5);
        (0..len)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())])
            .collect()
    }

    #[test]
    fn delete_budget_one_yields_each_single_deletion() {
        let engine = MutationEngine::new(1).with_rule(MutationRule::Delete);
        assert_eq!(
            variant_set(&engine, "abc"),
            set_of(&["abc", "bc", "ac", "ab"])
        );
    }

    #[test]
    fn capslock_inverts_whole_string_once() {
        let engine = MutationEngine::new(1).with_rule(MutationRule::CapsLock);
        assert_eq!(variant_set(&engine, "Go"), set_of(&["Go", "gO"]));
    }

    #[test]
    fn repeat_duplicates_each_position() {
        let engine = MutationEngine::new(1).with_rule(MutationRule::Repeat);
        assert_eq!(
            variant_set(&engine, "abc"),
            set_of(&["abc", "aabc", "abbc", "abcc"])
        );
    }

    #[test]
    fn swap_exchanges_adjacent_pairs() {
        let engine = MutationEngine::new(1).with_rule(MutationRule::Swap);
        assert_eq!(variant_set(&engine, "abc"), set_of(&["abc", "bac", "acb"]));
    }

    #[test]
    fn case_toggles_only_letters() {
        let engine = MutationEngine::new(1).with_rule(MutationRule::Case);
        assert_eq!(variant_set(&engine, "a1B"), set_of(&["a1B", "A1B", "a1b"]));
    }

    #[test]
    fn map_tries_each_alternative_independently() {
        let mut map = CharMap::new();
        map.insert("o", "0O");
        let engine = MutationEngine::new(1).with_char_map(map);
        assert_eq!(
            variant_set(&engine, "go"),
            set_of(&["go", "g0", "gO"])
        );
    }

    #[test]
    fn base_is_always_first() {
        let engine = MutationEngine::new(2).with_rules(ALL_FIXED_RULES);
        assert_eq!(engine.generate("Secret").next().as_deref(), Some("Secret"));
    }

    #[test]
    fn zero_budget_yields_only_base() {
        let engine = MutationEngine::new(0).with_rules(ALL_FIXED_RULES);
        let variants: Vec<String> = engine.generate("hunter2").collect();
        assert_eq!(variants, vec!["hunter2".to_string()]);
    }

    #[test]
    fn empty_base_yields_only_empty_string() {
        let mut map = CharMap::new();
        map.insert("a", "4");
        let engine = MutationEngine::new(3)
            .with_rules(ALL_FIXED_RULES)
            .with_char_map(map);
        let variants: Vec<String> = engine.generate("").collect();
        assert_eq!(variants, vec![String::new()]);
    }

    #[test]
    fn single_char_base_does_not_swap() {
        let engine = MutationEngine::new(1).with_rule(MutationRule::Swap);
        let variants: Vec<String> = engine.generate("x").collect();
        assert_eq!(variants, vec!["x".to_string()]);
    }

    #[test]
    fn single_char_base_can_be_deleted_to_empty() {
        let engine = MutationEngine::new(2).with_rule(MutationRule::Delete);
        assert_eq!(variant_set(&engine, "x"), set_of(&["x", ""]));
    }

    #[test]
    fn converging_paths_emit_once() {
        let engine = MutationEngine::new(2)
            .with_rule(MutationRule::Swap)
            .with_rule(MutationRule::Case);
        let variants: Vec<String> = engine.generate("ab").collect();
        let upper_count = variants.iter().filter(|v| v.as_str() == "AB").count();
        assert_eq!(upper_count, 1, "\"AB\" should be emitted exactly once");

        let unique: HashSet<&String> = variants.iter().collect();
        assert_eq!(unique.len(), variants.len(), "Duplicate variant emitted");
    }

    #[test]
    fn two_rule_kinds_need_two_budget_units() {
        let one = MutationEngine::new(1)
            .with_rule(MutationRule::Delete)
            .with_rule(MutationRule::CapsLock);
        assert!(!variant_set(&one, "ab").contains("B"));

        let two = MutationEngine::new(2)
            .with_rule(MutationRule::Delete)
            .with_rule(MutationRule::CapsLock);
        assert!(variant_set(&two, "ab").contains("B"));
    }

    #[test]
    fn case_handles_multi_char_uppercase() {
        let engine = MutationEngine::new(1).with_rule(MutationRule::Case);
        assert!(variant_set(&engine, "ß").contains("SS"));
    }

    #[test]
    fn repeated_generation_is_deterministic() {
        let mut rng = ChaCha8Rng::from_seed([7u8; 32]);
        let engine = MutationEngine::new(2).with_rules(ALL_FIXED_RULES);
        for _ in 0..50 {
            let base = random_base(&mut rng);
            let first: Vec<String> = engine.generate(&base).collect();
            let second: Vec<String> = engine.generate(&base).collect();
            assert_eq!(
                first.iter().collect::<HashSet<_>>(),
                second.iter().collect::<HashSet<_>>(),
                "Variant set changed between calls for base {base:?}"
            );
        }
    }

    #[test]
    fn no_duplicates_for_random_bases() {
        let mut rng = ChaCha8Rng::from_seed([11u8; 32]);
        let engine = MutationEngine::new(2).with_rules(ALL_FIXED_RULES);
        for _ in 0..50 {
            let base = random_base(&mut rng);
            let variants: Vec<String> = engine.generate(&base).collect();
            let unique: HashSet<&String> = variants.iter().collect();
            assert_eq!(
                unique.len(),
                variants.len(),
                "Duplicate variant for base {base:?}"
            );
        }
    }

    #[test]
    fn larger_budget_is_superset() {
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        for _ in 0..30 {
            let base = random_base(&mut rng);
            for k in 0..2 {
                let smaller =
                    variant_set(&MutationEngine::new(k).with_rules(ALL_FIXED_RULES), &base);
                let larger =
                    variant_set(&MutationEngine::new(k + 1).with_rules(ALL_FIXED_RULES), &base);
                assert!(
                    smaller.is_subset(&larger),
                    "Budget {} not a subset of budget {} for base {base:?}",
                    k,
                    k + 1
                );
            }
        }
    }

    #[test]
    fn generate_is_lazy() {
        let engine = MutationEngine::new(6).with_rules(ALL_FIXED_RULES);
        let first_three: Vec<String> = engine.generate("abcdefghij").take(3).collect();
        assert_eq!(first_three.len(), 3);
        assert_eq!(first_three[0], "abcdefghij");
    }

    #[test]
    fn char_map_parse_skips_short_lines_and_overrides() {
        let map = CharMap::parse("oO 0\nskip\n\nO Q\n");
        assert_eq!(map.get('o'), Some(&['0'][..]));
        assert_eq!(map.get('O'), Some(&['Q'][..]));
        assert_eq!(map.get('s'), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn char_map_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        match CharMap::load(&missing) {
            Err(ConfigError::MissingTyposMap(p)) => assert_eq!(p, missing),
            other => panic!("Expected MissingTyposMap, got {other:?}"),
        }
    }

    #[test]
    fn char_map_load_drops_invalid_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typos.txt");
        std::fs::write(&path, b"a 4\xFF@\n").unwrap();
        let map = CharMap::load(&path).unwrap();
        assert_eq!(map.get('a'), Some(&['4', '@'][..]));
    }
}
