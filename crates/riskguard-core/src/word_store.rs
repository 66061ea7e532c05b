//! Live sensitive word list.
//!
//! Words are loaded from newline-delimited files; blank lines and lines
//! starting with `#` are skipped. A reload only replaces the active list when
//! it produced at least one word, so a missing or empty file never wipes a
//! working list.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::detector::WordChecker;

/// Thread-safe sensitive word list with file-backed reloads.
#[derive(Debug, Default)]
pub struct SensitiveWordStore {
    /// Active words, deduplicated, in load order.
    words: RwLock<Vec<String>>,
    paths: RwLock<Vec<PathBuf>>,
}

impl SensitiveWordStore {
    /// Creates an empty store that reads from `paths` on [`update`](Self::update).
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            words: RwLock::new(Vec::new()),
            paths: RwLock::new(paths),
        }
    }

    /// Creates a store and performs the initial load.
    pub fn load(paths: Vec<PathBuf>) -> Self {
        let store = Self::new(paths);
        if store.update() == 0 {
            warn!("No sensitive words loaded");
        }
        store
    }

    /// Re-reads every configured file.
    ///
    /// Returns the number of words read. Unreadable files are logged and
    /// skipped; if nothing was read the active list is left untouched.
    pub fn update(&self) -> usize {
        let paths = self.paths.read().clone();
        let mut candidate = Vec::new();

        for path in &paths {
            if let Err(e) = read_words(path, &mut candidate) {
                warn!(path = %path.display(), error = %e, "Failed to load sensitive words");
            }
        }

        if candidate.is_empty() {
            debug!("Sensitive word reload produced no words, keeping current list");
            return 0;
        }

        let count = candidate.len();
        *self.words.write() = candidate;
        info!(count, "Loaded sensitive words");
        count
    }

    /// Adds a single word. Empty words are ignored.
    pub fn add_word(&self, word: impl Into<String>) {
        let word = word.into();
        if word.is_empty() {
            return;
        }
        let mut words = self.words.write();
        if !words.contains(&word) {
            words.push(word);
        }
    }

    /// Removes a word. Returns true if it was present.
    pub fn remove_word(&self, word: &str) -> bool {
        let mut words = self.words.write();
        let before = words.len();
        words.retain(|w| w != word);
        words.len() != before
    }

    /// Returns a copy of the active words.
    pub fn all_words(&self) -> Vec<String> {
        self.words.read().clone()
    }

    /// Replaces the active list. Empty entries are dropped.
    pub fn set_word_list(&self, list: Vec<String>) {
        let mut next: Vec<String> = Vec::with_capacity(list.len());
        for word in list {
            if !word.is_empty() && !next.contains(&word) {
                next.push(word);
            }
        }
        *self.words.write() = next;
    }

    /// Adds a file to read on the next update.
    pub fn add_file_path(&self, path: impl Into<PathBuf>) {
        self.paths.write().push(path.into());
    }

    /// Returns the configured file paths.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.paths.read().clone()
    }

    pub fn len(&self) -> usize {
        self.words.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.read().is_empty()
    }
}

impl WordChecker for SensitiveWordStore {
    fn contains_word(&self, content: &str) -> Option<String> {
        if content.is_empty() {
            return None;
        }
        self.words
            .read()
            .iter()
            .find(|w| content.contains(w.as_str()))
            .cloned()
    }
}

fn read_words(path: &Path, into: &mut Vec<String>) -> std::io::Result<()> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        let word = line.trim();
        if word.is_empty() || word.starts_with('#') {
            continue;
        }
        if !into.iter().any(|w| w == word) {
            into.push(word.to_string());
        }
    }
    Ok(())
}
