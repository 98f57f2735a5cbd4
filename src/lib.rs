//! Byte-level BPE tokenization and sliding-window text generation for small
//! GPT-2 style story models.

pub mod generation;
pub mod inference;
pub mod model;
pub mod tokenizer;
