use std::sync::Arc;

use log::{debug, trace, warn};

use super::{GenerationConfig, NextTokenPredictor, PromptOverflow, SessionError, TokenWindow};
use crate::tokenizer::{drain_utf8, BpeTokenizer, DecodeError, TokenId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The predictor returned the end-of-text token.
    EndOfText,
    /// `stop_limit` tokens were generated.
    StopLimit,
    /// The predictor or the decoder failed.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Generating,
    Stopped(StopReason),
}

/// Result of a single [`GenerationSession::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A token was generated. `text` is the newly completed output, empty when
    /// the token ends inside a multi-byte character.
    Token { id: TokenId, text: String },
    /// The session stopped; the final token is in the window but not in the
    /// output text.
    Finished(StopReason),
}

/// One autoregressive generation run over a sliding token window.
///
/// The session owns its predictor; dropping the session or swapping the
/// predictor releases it. The tokenizer is shared read-only.
pub struct GenerationSession<P> {
    tokenizer: Arc<BpeTokenizer>,
    predictor: P,
    config: GenerationConfig,
    window: TokenWindow,
    total_generated: usize,
    state: SessionState,
    output_text: String,
    pending: Vec<u8>,
}

impl<P: NextTokenPredictor> GenerationSession<P> {
    pub fn new(
        tokenizer: Arc<BpeTokenizer>,
        predictor: P,
        config: GenerationConfig,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        Ok(Self {
            tokenizer,
            predictor,
            window: TokenWindow::new(config.capacity),
            config,
            total_generated: 0,
            state: SessionState::Idle,
            output_text: String::new(),
            pending: Vec::new(),
        })
    }

    /// Encodes `prompt`, seeds the window with it and begins generating. The
    /// prompt text itself is the start of [`output_text`](Self::output_text).
    pub fn start(&mut self, prompt: &str) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let ids = self.tokenizer.encode_text(prompt)?;
        self.start_from_ids(&ids)?;
        self.output_text.push_str(prompt);
        Ok(())
    }

    /// Seeds the window with already encoded tokens. Output text starts empty.
    pub fn start_from_ids(&mut self, ids: &[TokenId]) -> Result<(), SessionError> {
        self.ensure_idle()?;
        if ids.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let capacity = self.window.capacity();
        let seeded = if ids.len() > capacity {
            warn!(
                "prompt has {} tokens but the window holds {capacity}; keeping {:?}",
                ids.len(),
                self.config.prompt_overflow
            );
            match self.config.prompt_overflow {
                PromptOverflow::KeepTail => &ids[ids.len() - capacity..],
                PromptOverflow::KeepHead => &ids[..capacity],
            }
        } else {
            ids
        };

        self.window.seed(seeded);
        self.state = SessionState::Generating;
        debug!("session started with {} prompt tokens", seeded.len());
        Ok(())
    }

    /// Asks the predictor for one token and appends it.
    pub fn step(&mut self) -> Result<StepOutcome, SessionError> {
        let position = match (self.state, self.window.position()) {
            (SessionState::Generating, Some(pos)) => pos,
            (state, _) => return Err(SessionError::Inactive(state)),
        };

        let id = match self.predictor.predict(self.window.as_slice(), position) {
            Ok(id) => id,
            Err(e) => {
                self.stop(StopReason::Failed);
                return Err(SessionError::Predictor(e));
            }
        };

        if self.window.push(id) {
            trace!("window full, evicted oldest token");
        }
        self.total_generated += 1;

        if id == self.config.end_of_text {
            return Ok(self.stop(StopReason::EndOfText));
        }
        if self.total_generated >= self.config.stop_limit {
            return Ok(self.stop(StopReason::StopLimit));
        }

        match self.append_token(id) {
            Ok(text) => Ok(StepOutcome::Token { id, text }),
            Err(e) => {
                self.stop(StopReason::Failed);
                Err(e.into())
            }
        }
    }

    /// Returns to `Idle`, discarding the window, counters and output.
    pub fn reset(&mut self) {
        self.window.clear();
        self.total_generated = 0;
        self.state = SessionState::Idle;
        self.output_text.clear();
        self.pending.clear();
        trace!("session reset");
    }

    /// Installs a new predictor and hands back the previous one.
    pub fn replace_predictor(&mut self, predictor: P) -> P {
        std::mem::replace(&mut self.predictor, predictor)
    }

    pub fn into_predictor(self) -> P {
        self.predictor
    }

    pub fn output_text(&self) -> &str {
        &self.output_text
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Generating
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn total_generated(&self) -> usize {
        self.total_generated
    }

    pub fn window(&self) -> &TokenWindow {
        &self.window
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => Ok(()),
            state => Err(SessionError::AlreadyStarted(state)),
        }
    }

    fn append_token(&mut self, id: TokenId) -> Result<String, DecodeError> {
        let bytes = self.tokenizer.decode_bytes(id)?;
        self.pending.extend(bytes);

        let mut text = String::new();
        drain_utf8(&mut self.pending, &mut text)?;
        self.output_text.push_str(&text);
        Ok(text)
    }

    fn stop(&mut self, reason: StopReason) -> StepOutcome {
        debug!(
            "session stopped after {} tokens: {reason:?}",
            self.total_generated
        );
        if !self.pending.is_empty() {
            debug!(
                "dropping {} bytes of an unfinished character: {:02x?}",
                self.pending.len(),
                self.pending
            );
            self.pending.clear();
        }
        self.state = SessionState::Stopped(reason);
        StepOutcome::Finished(reason)
    }
}
