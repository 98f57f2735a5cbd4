use crate::tokenizer::TokenId;

/// Fixed-capacity token history.
///
/// Slots after `position` are padding; they keep whatever was there before and
/// must not influence prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWindow {
    tokens: Vec<TokenId>,
    position: Option<usize>,
}

impl TokenWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            tokens: vec![0; capacity],
            position: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.tokens.len()
    }

    /// Index of the most recent token, `None` while empty.
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn is_full(&self) -> bool {
        self.position.is_some_and(|pos| pos + 1 == self.capacity())
    }

    /// The whole window including padding, always `capacity` long.
    pub fn as_slice(&self) -> &[TokenId] {
        &self.tokens
    }

    /// Only the tokens placed so far.
    pub fn contents(&self) -> &[TokenId] {
        match self.position {
            Some(pos) => &self.tokens[..=pos],
            None => &[],
        }
    }

    /// Replaces the window contents with `ids`, which must fit.
    pub fn seed(&mut self, ids: &[TokenId]) {
        debug_assert!(ids.len() <= self.capacity());
        self.clear();
        self.tokens[..ids.len()].copy_from_slice(ids);
        self.position = ids.len().checked_sub(1);
    }

    /// Appends `id`, first evicting the oldest token when full. Returns `true`
    /// if an eviction happened.
    pub fn push(&mut self, id: TokenId) -> bool {
        let slid = self.is_full();
        if slid {
            self.tokens.rotate_left(1);
        }

        let next = match self.position {
            Some(pos) if slid => pos,
            Some(pos) => pos + 1,
            None => 0,
        };
        self.tokens[next] = id;
        self.position = Some(next);
        slid
    }

    pub fn clear(&mut self) {
        self.tokens.fill(0);
        self.position = None;
    }
}
