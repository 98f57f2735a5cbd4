use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use burn::{
    config::Config,
    module::{Module, Param},
    nn::{Embedding, EmbeddingConfig, Gelu, Linear, LinearConfig},
    tensor::backend::Backend,
};
use burn_tensor::{activation, Data, Int, Shape, Tensor};
use log::{debug, info};
use ndarray::{Array1, Array2};

/// Anything that turns a `[1, seq]` batch of token ids into `[seq, n_vocab]`
/// next-token logits.
pub trait LogitsModel<B: Backend> {
    fn logits(&self, tokens: Tensor<B, 2, Int>) -> Tensor<B, 2>;

    /// Longest sequence the model accepts.
    fn context_size(&self) -> usize;
}

#[derive(Config, Debug)]
pub struct TextGenerationModelConfig {
    /// Number of tokens in the vocabulary.
    /// GPT-2 has a vocabulary size of 50,257,
    /// which corresponds to the 256 bytes base tokens,
    /// a special end-of-text token and the symbols learned with 50,000 merges
    pub n_vocab: usize,
    /// Maximum context / prompt sequence.
    pub n_ctx: usize,
    /// Number of attention heads.
    /// Must be a divisor of `n_embd`.
    pub n_head: usize,
    /// Width of the network, or the embedding dimension.
    pub n_embd: usize,
    /// Number of transformer blocks.
    pub n_layer: usize,
}

impl TextGenerationModelConfig {
    pub fn from_dir(model_dir: impl AsRef<Path>) -> Result<Self> {
        let path = model_dir.as_ref().join("hparams.json");
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))?;

        ensure!(
            config.n_head > 0 && config.n_embd % config.n_head == 0,
            "n_embd {} is not divisible by n_head {}",
            config.n_embd,
            config.n_head
        );
        Ok(config)
    }

    /// Builds the model from an exploded checkpoint: one directory per block
    /// (`h0`, `h1`, ...) plus `wte.npy`, `wpe.npy` and `ln_f/`.
    pub fn init_from_pretrained_weights<B: Backend>(
        &self,
        weights_dir: &Path,
        device: &B::Device,
    ) -> Result<TextGenerationModel<B>> {
        info!(
            "loading {}-layer model from {}",
            self.n_layer,
            weights_dir.display()
        );

        let mut token_embedding: Embedding<B> =
            EmbeddingConfig::new(self.n_vocab, self.n_embd).init(device);
        token_embedding.weight =
            Param::from_tensor(read_matrix::<B>(&weights_dir.join("wte.npy"), device)?);

        let mut position_embedding: Embedding<B> =
            EmbeddingConfig::new(self.n_ctx, self.n_embd).init(device);
        position_embedding.weight =
            Param::from_tensor(read_matrix::<B>(&weights_dir.join("wpe.npy"), device)?);

        let blocks = (0..self.n_layer)
            .map(|idx| {
                Block::<B>::from_dir(&weights_dir.join(format!("h{idx}")), self.n_head, device)
            })
            .collect::<Result<Vec<_>>>()?;

        let layer_norm = Gpt2LayerNorm::<B>::from_dir(&weights_dir.join("ln_f"), device)?;

        debug!("model loaded: {} blocks", blocks.len());

        Ok(TextGenerationModel {
            token_embedding,
            position_embedding,
            blocks,
            layer_norm,
            n_ctx: self.n_ctx,
        })
    }
}

fn read_matrix<B: Backend>(path: &Path, device: &B::Device) -> Result<Tensor<B, 2>> {
    let arr: Array2<f32> =
        ndarray_npy::read_npy(path).with_context(|| format!("reading {}", path.display()))?;
    let shape = Shape::new([arr.shape()[0], arr.shape()[1]]);
    let values = arr.iter().copied().collect::<Vec<_>>();

    Ok(Tensor::from_data(
        Data::new(values, shape).convert::<B::FloatElem>(),
        device,
    ))
}

fn read_vector<B: Backend>(path: &Path, device: &B::Device) -> Result<Tensor<B, 1>> {
    let arr: Array1<f32> =
        ndarray_npy::read_npy(path).with_context(|| format!("reading {}", path.display()))?;
    let values = arr.to_vec();
    let shape = Shape::new([values.len()]);

    Ok(Tensor::from_data(
        Data::new(values, shape).convert::<B::FloatElem>(),
        device,
    ))
}

fn read_linear<B: Backend>(dir: &Path, device: &B::Device) -> Result<Linear<B>> {
    let weight = read_matrix::<B>(&dir.join("w.npy"), device)?;
    let bias = read_vector::<B>(&dir.join("b.npy"), device)?;
    let [d_input, d_output] = weight.dims();

    let mut linear: Linear<B> = LinearConfig::new(d_input, d_output).init(device);
    linear.weight = Param::from_tensor(weight);
    linear.bias = Some(Param::from_tensor(bias));
    Ok(linear)
}

#[derive(Module, Debug)]
pub struct TextGenerationModel<B: Backend> {
    pub token_embedding: Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub blocks: Vec<Block<B>>,
    pub layer_norm: Gpt2LayerNorm<B>,
    pub n_ctx: usize,
}

impl<B: Backend> TextGenerationModel<B> {
    /// `inputs` is `[1, seq]`; returns `[seq, n_vocab]` logits.
    pub fn forward(&self, inputs: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let device = inputs.device();
        let [_, seq_len] = inputs.dims();

        let positions =
            Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device).reshape([1, seq_len]);
        let x = self.token_embedding.forward(inputs) + self.position_embedding.forward(positions);
        // single batch
        let mut x: Tensor<B, 2> = x.squeeze(0);

        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.layer_norm.forward(x);

        // the output projection reuses the token embedding matrix
        x.matmul(self.token_embedding.weight.val().transpose())
    }
}

impl<B: Backend> LogitsModel<B> for TextGenerationModel<B> {
    fn logits(&self, tokens: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        self.forward(tokens)
    }

    fn context_size(&self) -> usize {
        self.n_ctx
    }
}

#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    pub attention: Attention<B>,
    pub feedforward: FeedForward<B>,
}

impl<B: Backend> Block<B> {
    fn from_dir(block_dir: &Path, num_heads: usize, device: &B::Device) -> Result<Self> {
        let attention = Attention {
            layer_norm: Gpt2LayerNorm::<B>::from_dir(&block_dir.join("ln_1"), device)?,
            expand: read_linear::<B>(&block_dir.join("attn/c_attn"), device)?,
            contract: read_linear::<B>(&block_dir.join("attn/c_proj"), device)?,
            num_heads,
        };
        let feedforward = FeedForward {
            layer_norm: Gpt2LayerNorm::<B>::from_dir(&block_dir.join("ln_2"), device)?,
            expand: read_linear::<B>(&block_dir.join("mlp/c_fc"), device)?,
            contract: read_linear::<B>(&block_dir.join("mlp/c_proj"), device)?,
            activation: Gelu::new(),
        };

        Ok(Self {
            attention,
            feedforward,
        })
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = x.clone() + self.attention.forward(x);
        x.clone() + self.feedforward.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub layer_norm: Gpt2LayerNorm<B>,
    pub expand: Linear<B>,
    pub contract: Linear<B>,
    pub activation: Gelu,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.layer_norm.forward(x);
        let x = self.activation.forward(self.expand.forward(x));
        self.contract.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    pub layer_norm: Gpt2LayerNorm<B>,
    pub expand: Linear<B>,
    pub contract: Linear<B>,
    pub num_heads: usize,
}

impl<B: Backend> Attention<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = x.device();
        let [seq_len, n_embd] = x.dims();
        let head_dim = n_embd / self.num_heads;

        let x = self.layer_norm.forward(x);
        let qkv = self.expand.forward(x).chunk(3, 1);

        // [seq, n_embd] -> [heads, seq, head_dim]
        let split_heads = |t: Tensor<B, 2>| -> Tensor<B, 3> {
            t.reshape([seq_len, self.num_heads, head_dim]).swap_dims(0, 1)
        };
        let q = split_heads(qkv[0].clone());
        let k = split_heads(qkv[1].clone());
        let v = split_heads(qkv[2].clone());

        // positions may only attend to themselves and earlier positions
        let ones = Tensor::<B, 2>::ones([seq_len, seq_len], &device);
        let causal_mask = (ones.clone() - ones.tril(0)) * -1.0e4;

        let scores = q.matmul(k.transpose()) / (head_dim as f64).sqrt()
            + causal_mask.unsqueeze::<3>();
        let probs = activation::softmax(scores, 2);
        let out = probs.matmul(v).swap_dims(0, 1).reshape([seq_len, n_embd]);

        self.contract.forward(out)
    }
}

/// Layer norm with GPT-2's learned `g` and `b` parameters.
#[derive(Module, Debug)]
pub struct Gpt2LayerNorm<B: Backend> {
    pub beta: Param<Tensor<B, 1>>,
    pub gamma: Param<Tensor<B, 1>>,
}

impl<B: Backend> Gpt2LayerNorm<B> {
    fn from_dir(dir: &Path, device: &B::Device) -> Result<Self> {
        Ok(Self {
            beta: Param::from_tensor(read_vector::<B>(&dir.join("b.npy"), device)?),
            gamma: Param::from_tensor(read_vector::<B>(&dir.join("g.npy"), device)?),
        })
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let eps = 1e-5;

        let mean = x.clone().mean_dim(1);
        let centered = x - mean;
        let var = (centered.clone() * centered.clone()).mean_dim(1);
        let x = centered / (var + eps).sqrt();

        let gamma: Tensor<B, 2> = self.gamma.val().unsqueeze();
        let beta: Tensor<B, 2> = self.beta.val().unsqueeze();
        x * gamma + beta
    }
}

/// Loads `hparams.json` from `model_dir` and weights from
/// `model_dir/exploded_model`.
pub fn load_pretrained_model<B: Backend>(
    model_dir: &Path,
    device: &B::Device,
) -> Result<TextGenerationModel<B>> {
    let config = TextGenerationModelConfig::from_dir(model_dir)?;
    let weights_dir: PathBuf = model_dir.join("exploded_model");
    config.init_from_pretrained_weights(&weights_dir, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn layer_norm_normalises_rows() {
        let device = Default::default();
        let norm = Gpt2LayerNorm::<TestBackend> {
            beta: Param::from_tensor(Tensor::zeros([4], &device)),
            gamma: Param::from_tensor(Tensor::ones([4], &device)),
        };

        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0, 4.0], [2.0, 2.0, 2.0, 2.0]], &device);
        let out = norm.forward(x).into_data().value;

        let first_row_mean: f32 = out[..4].iter().sum::<f32>() / 4.0;
        assert!(first_row_mean.abs() < 1e-5);
        assert!((out[3] - 1.3416).abs() < 1e-3);
        assert!(out[4..].iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn missing_hparams_is_reported() {
        let err = TextGenerationModelConfig::from_dir("/nonexistent/model").unwrap_err();
        assert!(err.to_string().contains("hparams.json"));
    }
}
