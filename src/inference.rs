use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use burn::{config::Config, tensor::backend::Backend};
use burn_tensor::{Data, Distribution, ElementConversion, Int, Shape, Tensor};
use log::{debug, info};

use crate::generation::{GenerationConfig, GenerationSession, NextTokenPredictor, StepOutcome};
use crate::model::{load_pretrained_model, LogitsModel, TextGenerationModel};
use crate::tokenizer::{BpeTokenizer, TokenId};

#[derive(Config, Debug)]
pub struct SamplerConfig {
    /// Multiplier applied to the logits before sampling; higher is more
    /// deterministic.
    #[config(default = 5.0)]
    pub predictability: f64,
    /// Always take the most likely token.
    #[config(default = false)]
    pub greedy: bool,
}

/// Next-token predictor backed by a burn model.
///
/// Only `window[..=position]` is fed to the model, so padding never reaches
/// it. The row of logits at `position` is scaled by `predictability` and one
/// token is drawn with the Gumbel-max trick, which samples from
/// `softmax(predictability * logits)`.
pub struct ModelPredictor<'m, B: Backend, M> {
    model: &'m M,
    device: B::Device,
    sampler: SamplerConfig,
    _backend: PhantomData<B>,
}

impl<'m, B: Backend, M: LogitsModel<B>> ModelPredictor<'m, B, M> {
    pub fn new(model: &'m M, device: B::Device, sampler: SamplerConfig) -> Self {
        Self {
            model,
            device,
            sampler,
            _backend: PhantomData,
        }
    }
}

impl<'m, B: Backend, M: LogitsModel<B>> NextTokenPredictor for ModelPredictor<'m, B, M> {
    fn predict(&mut self, window: &[TokenId], position: usize) -> Result<TokenId> {
        ensure!(
            position < window.len(),
            "position {position} outside window of {}",
            window.len()
        );
        let context = &window[..=position];
        ensure!(
            context.len() <= self.model.context_size(),
            "context of {} tokens exceeds model limit {}",
            context.len(),
            self.model.context_size()
        );

        let indices: Vec<i64> = context.iter().map(|&id| id as i64).collect();
        let inputs = Tensor::<B, 1, Int>::from_data(
            Data::new(indices, Shape::new([context.len()])).convert::<B::IntElem>(),
            &self.device,
        )
        .unsqueeze::<2>();

        let logits = self.model.logits(inputs);
        let [_, n_vocab] = logits.dims();
        let row: Tensor<B, 1> = logits
            .slice([position..position + 1, 0..n_vocab])
            .reshape([n_vocab]);

        let choice = if self.sampler.greedy {
            row.argmax(0)
        } else {
            let uniform = Tensor::<B, 1>::random(
                [n_vocab],
                Distribution::Uniform(1.0e-10, 1.0),
                &self.device,
            );
            let gumbel = uniform.log().neg().log().neg();
            (row * self.sampler.predictability + gumbel).argmax(0)
        };

        let id = choice.into_scalar().elem::<i64>();
        TokenId::try_from(id).with_context(|| format!("model produced invalid token id {id}"))
    }
}

/// Runs one generation for `prompt` from a fresh state, handing each piece
/// of new text to `on_text`. Returns the full output (prompt included).
///
/// An error from `on_text` ends the run and resets the session.
pub fn generate<P: NextTokenPredictor>(
    session: &mut GenerationSession<P>,
    prompt: &str,
    mut on_text: impl FnMut(&str) -> Result<()>,
) -> Result<String> {
    session.reset();
    session.start(prompt)?;

    while session.is_active() {
        let streamed = match session.step() {
            Ok(StepOutcome::Token { text, .. }) => on_text(&text),
            Ok(StepOutcome::Finished(reason)) => {
                debug!("generation finished: {reason:?}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = streamed {
            let partial = session.output_text().len();
            session.reset();
            return Err(e).with_context(|| format!("generation aborted after {partial} bytes"));
        }
    }

    Ok(session.output_text().to_string())
}

/// Loads the pretrained model from `model_dir` and generates a continuation of
/// `prompt`, streaming text to `on_text`.
pub fn infer<B: Backend>(
    tokenizer: Arc<BpeTokenizer>,
    model_dir: &Path,
    device: B::Device,
    prompt: &str,
    config: GenerationConfig,
    sampler: SamplerConfig,
    on_text: impl FnMut(&str) -> Result<()>,
) -> Result<String> {
    let model: TextGenerationModel<B> = load_pretrained_model(model_dir, &device)?;
    ensure!(
        config.capacity <= model.context_size(),
        "window capacity {} exceeds model context {}",
        config.capacity,
        model.context_size()
    );

    info!("generating up to {} tokens", config.stop_limit);
    let predictor = ModelPredictor::<B, _>::new(&model, device, sampler);
    let mut session = GenerationSession::new(tokenizer, predictor, config)?;
    generate(&mut session, prompt, on_text)
}
