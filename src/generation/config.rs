use burn::config::Config;
use serde::{Deserialize, Serialize};

use super::SessionError;
use crate::tokenizer::TokenId;

/// Which part of an over-long prompt survives seeding the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptOverflow {
    /// Keep the most recent `capacity` tokens.
    KeepTail,
    /// Keep the first `capacity` tokens.
    KeepHead,
}

#[derive(Config, Debug)]
pub struct GenerationConfig {
    /// Size of the token window handed to the predictor.
    #[config(default = 100)]
    pub capacity: usize,
    /// Maximum number of generated tokens, independent of `capacity`.
    #[config(default = 100)]
    pub stop_limit: usize,
    /// Token id that ends generation. 50256 is GPT-2's `<|endoftext|>`.
    #[config(default = 50256)]
    pub end_of_text: TokenId,
    #[config(default = "PromptOverflow::KeepTail")]
    pub prompt_overflow: PromptOverflow,
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.capacity == 0 {
            return Err(SessionError::InvalidConfig("capacity must be at least 1".into()));
        }
        if self.stop_limit == 0 {
            return Err(SessionError::InvalidConfig("stop_limit must be at least 1".into()));
        }
        Ok(())
    }
}
