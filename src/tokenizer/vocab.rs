use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use derive_new::new;
use log::debug;

use super::{StringPair, TokenId, VocabularyError};

pub const VOCAB_FILE: &str = "vocab.json";
pub const MERGES_FILE: &str = "merges.txt";

/// Where the vocabulary and merge rules live on disk.
#[derive(new, Clone, Debug)]
pub struct VocabularyFiles {
    pub vocab: PathBuf,
    pub merges: PathBuf,
}

impl VocabularyFiles {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(VOCAB_FILE), dir.join(MERGES_FILE))
    }

    pub fn read(&self) -> Result<(String, String), VocabularyError> {
        Ok((read_text(&self.vocab)?, read_text(&self.merges)?))
    }
}

fn read_text(path: &Path) -> Result<String, VocabularyError> {
    fs::read_to_string(path).map_err(|source| VocabularyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Subword vocabulary plus the ordered merge rules.
///
/// Read-only once loaded; share it behind an `Arc` between sessions.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    string_to_id: HashMap<String, TokenId>,
    id_to_string: Vec<String>,
    merges: Vec<StringPair>,
}

impl Vocabulary {
    /// Parses a `{ token: id }` JSON object and a newline separated list of
    /// `left right` merge rules.
    ///
    /// Every id in `0..=max(id)` must be owned by exactly one token.
    pub fn load(vocab_text: &str, merges_text: &str) -> Result<Self, VocabularyError> {
        let string_to_id: HashMap<String, TokenId> = serde_json::from_str(vocab_text)
            .map_err(|e| VocabularyError::Format(format!("expected a token -> id object: {e}")))?;

        let id_to_string = invert(&string_to_id)?;
        let merges = parse_merges(merges_text)?;

        debug!(
            "loaded vocabulary with {} tokens and {} merge rules",
            id_to_string.len(),
            merges.len()
        );

        Ok(Self {
            string_to_id,
            id_to_string,
            merges,
        })
    }

    pub fn from_files(files: &VocabularyFiles) -> Result<Self, VocabularyError> {
        let (vocab_text, merges_text) = files.read()?;
        Self::load(&vocab_text, &merges_text)
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, VocabularyError> {
        Self::from_files(&VocabularyFiles::in_dir(dir))
    }

    pub fn id(&self, token: &str) -> Option<TokenId> {
        self.string_to_id.get(token).copied()
    }

    pub fn token(&self, id: TokenId) -> Option<&str> {
        self.id_to_string.get(id as usize).map(String::as_str)
    }

    pub fn merges(&self) -> &[StringPair] {
        &self.merges
    }

    pub fn len(&self) -> usize {
        self.id_to_string.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_string.is_empty()
    }
}

fn invert(string_to_id: &HashMap<String, TokenId>) -> Result<Vec<String>, VocabularyError> {
    let Some(max_id) = string_to_id.values().copied().max() else {
        return Err(VocabularyError::Format("vocabulary is empty".to_string()));
    };

    // ids are distinct map values, so a max id at or past the entry count
    // leaves some id below it unowned
    if max_id as usize >= string_to_id.len() {
        return Err(VocabularyError::Format(format!(
            "{} tokens cannot cover ids 0..={max_id}",
            string_to_id.len()
        )));
    }

    let mut slots: Vec<Option<&str>> = vec![None; max_id as usize + 1];
    for (token, &id) in string_to_id {
        if let Some(owner) = slots[id as usize].replace(token) {
            return Err(VocabularyError::Format(format!(
                "id {id} is assigned to both {owner:?} and {token:?}"
            )));
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(id, slot)| {
            slot.map(str::to_string)
                .ok_or_else(|| VocabularyError::Format(format!("no token for id {id}")))
        })
        .collect()
}

fn parse_merges(merges_text: &str) -> Result<Vec<StringPair>, VocabularyError> {
    let mut merges = Vec::new();

    for (idx, line) in merges_text.lines().enumerate() {
        if line.trim().is_empty() || (idx == 0 && line.starts_with("#version")) {
            continue;
        }

        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(left), Some(right), None) => merges.push((left.to_string(), right.to_string())),
            _ => {
                return Err(VocabularyError::MergeRuleFormat {
                    line: idx + 1,
                    text: line.to_string(),
                })
            }
        }
    }

    Ok(merges)
}
