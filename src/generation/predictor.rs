use anyhow::Result;

use crate::tokenizer::TokenId;

/// Produces the next token for a window of history.
///
/// `window` is always the full fixed-size window. Only `window[..=position]`
/// is context; later slots are padding and must not affect the result.
/// Sampling policy is entirely up to the implementation.
pub trait NextTokenPredictor {
    fn predict(&mut self, window: &[TokenId], position: usize) -> Result<TokenId>;
}

impl<F> NextTokenPredictor for F
where
    F: FnMut(&[TokenId], usize) -> Result<TokenId>,
{
    fn predict(&mut self, window: &[TokenId], position: usize) -> Result<TokenId> {
        self(window, position)
    }
}
