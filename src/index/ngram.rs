//! `NgramIndex`: noun-phrase index over CJK runs and ASCII words, rather
//! than full n-grams, to avoid the combinatorial blowup of indexing every
//! substring.
use crate::error::RecallResult;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, HashMap};
use std::path::PathBuf;
use std::sync::OnceLock;

const STOPWORDS: &[&str] = &[
    "的", "了", "是", "在", "和", "有", "这", "那", "the", "a", "is", "are", "to", "and", "of", "in",
];

fn cjk_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\u{4e00}-\u{9fa5}]{2,4}").unwrap())
}

fn ascii_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z]{3,}").unwrap())
}

/// Extract candidate noun phrases: 2-4 character CJK runs plus 3+ letter
/// ASCII words, with stopwords dropped (case-insensitive on the ASCII
/// side, since CJK stopwords have no case).
pub fn extract_noun_phrases(content: &str) -> Vec<String> {
    let mut phrases: Vec<String> = cjk_phrase_re().find_iter(content).map(|m| m.as_str().to_string()).collect();
    phrases.extend(ascii_word_re().find_iter(content).map(|m| m.as_str().to_string()));
    phrases.retain(|p| !STOPWORDS.contains(&p.to_lowercase().as_str()));
    phrases
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    phrases: HashMap<String, HashSet<String>>,
}

/// No bloom filter: a plain `HashSet` membership probe serves the same
/// role at this crate's expected scale without an optional native
/// dependency (see `DESIGN.md`).
pub struct NgramIndex {
    path: PathBuf,
    phrases: DashMap<String, HashSet<String>>,
    seen: DashMap<String, ()>,
}

impl NgramIndex {
    pub fn open(data_root: &std::path::Path) -> RecallResult<Self> {
        let dir = data_root.join("indexes");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("ngram_index.json");

        let phrases = DashMap::new();
        let seen = DashMap::new();
        if let Ok(data) = std::fs::read_to_string(&path) {
            if let Ok(snap) = serde_json::from_str::<Snapshot>(&data) {
                for (phrase, ids) in snap.phrases {
                    seen.insert(phrase.clone(), ());
                    phrases.insert(phrase, ids);
                }
            }
        }

        Ok(Self { path, phrases, seen })
    }

    pub fn add(&self, item_id: &str, content: &str) {
        for phrase in extract_noun_phrases(content) {
            self.seen.insert(phrase.clone(), ());
            self.phrases.entry(phrase).or_default().insert(item_id.to_string());
        }
    }

    pub fn search(&self, query: &str) -> HashSet<String> {
        let mut candidates = HashSet::new();
        for phrase in extract_noun_phrases(query) {
            if !self.seen.contains_key(&phrase) {
                continue;
            }
            if let Some(ids) = self.phrases.get(&phrase) {
                candidates.extend(ids.iter().cloned());
            }
        }
        candidates
    }

    pub fn remove_by_ids(&self, ids: &HashSet<String>) {
        self.phrases.retain(|_, v| {
            v.retain(|id| !ids.contains(id));
            !v.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn flush(&self) -> RecallResult<()> {
        let snapshot = Snapshot {
            phrases: self.phrases.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn clear(&self) -> RecallResult<()> {
        self.phrases.clear();
        self.seen.clear();
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_cjk_runs_and_ascii_words_dropping_stopwords() {
        let phrases = extract_noun_phrases("DeepSeek is a great AI company in the world");
        assert!(phrases.contains(&"DeepSeek".to_string()));
        assert!(phrases.contains(&"great".to_string()));
        assert!(phrases.contains(&"company".to_string()));
        assert!(!phrases.contains(&"the".to_string()));
        assert!(!phrases.contains(&"and".to_string()));
    }

    #[test]
    fn extracts_chinese_two_to_four_char_runs() {
        let phrases = extract_noun_phrases("深度求索发布了新模型");
        assert!(phrases.iter().any(|p| p.chars().count() >= 2 && p.chars().count() <= 4));
    }

    #[test]
    fn add_and_search_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let idx = NgramIndex::open(dir.path()).unwrap();
        idx.add("m1", "DeepSeek released a new model");
        let results = idx.search("tell me about DeepSeek");
        assert_eq!(results, HashSet::from(["m1".to_string()]));
    }

    #[test]
    fn reload_from_disk_preserves_phrases() {
        let dir = tempfile::tempdir().unwrap();
        {
            let idx = NgramIndex::open(dir.path()).unwrap();
            idx.add("m1", "DeepSeek released a new model");
            idx.flush().unwrap();
        }
        let idx = NgramIndex::open(dir.path()).unwrap();
        assert_eq!(idx.search("DeepSeek"), HashSet::from(["m1".to_string()]));
    }

    #[test]
    fn remove_by_ids_drops_phrase_entries() {
        let dir = tempfile::tempdir().unwrap();
        let idx = NgramIndex::open(dir.path()).unwrap();
        idx.add("m1", "DeepSeek model");
        idx.add("m2", "DeepSeek paper");
        idx.remove_by_ids(&HashSet::from(["m1".to_string()]));
        assert_eq!(idx.search("DeepSeek"), HashSet::from(["m2".to_string()]));
    }
}
