//! Error types for vocabulary loading, encoding and decoding.

use std::path::PathBuf;

use thiserror::Error;

use super::{Token, TokenId};

/// Errors raised while loading a vocabulary. All of them are fatal: a
/// tokenizer cannot be built from malformed vocabulary data.
#[derive(Debug, Error)]
pub enum VocabularyError {
    /// The vocabulary JSON is not a usable flat `token -> id` object.
    #[error("malformed vocabulary: {0}")]
    Format(String),

    /// A merge line did not split into exactly two tokens.
    #[error("malformed merge rule on line {line}: {text:?}")]
    MergeRuleFormat { line: usize, text: String },

    /// A vocabulary source file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while encoding text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A merged token has no vocabulary entry and the policy is `Fail`.
    #[error("token {0:?} is not in the vocabulary")]
    NotInVocabulary(Token),
}

/// Errors raised while turning token ids back into text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Token id outside `[0, vocab_size)`.
    #[error("unknown token id {id} (vocabulary size {vocab_size})")]
    UnknownToken { id: TokenId, vocab_size: usize },

    /// Decoded bytes are not valid UTF-8.
    #[error("invalid UTF-8 in decoded bytes: {0:?}")]
    TextDecode(Vec<u8>),
}
