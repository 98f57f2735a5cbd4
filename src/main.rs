use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{NdArray, Wgpu};
use burn::config::Config;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{info, LevelFilter};

use tinystories::generation::GenerationConfig;
use tinystories::inference::{infer, SamplerConfig};
use tinystories::tokenizer::{BpeTokenizer, TokenId, UnknownTokenPolicy};

#[derive(Parser)]
#[command(about = "Byte-level BPE tokenizer and story generator")]
struct Cli {
    /// Directory containing vocab.json and merges.txt.
    #[arg(long, global = true, default_value = "data/124M")]
    vocab_dir: PathBuf,

    /// Fail instead of dropping text that has no vocabulary entry.
    #[arg(long, global = true)]
    strict: bool,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the token ids for some text.
    Encode { text: String },
    /// Print the text for a list of token ids.
    Decode { ids: Vec<TokenId> },
    /// Continue a prompt with the pretrained model.
    Generate(GenerateArgs),
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,

    /// Directory with hparams.json and exploded_model/.
    #[arg(long, default_value = "data/124M")]
    model_dir: PathBuf,

    /// Optional GenerationConfig JSON; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    capacity: Option<usize>,

    #[arg(long)]
    stop_after: Option<usize>,

    #[arg(long)]
    end_of_text: Option<TokenId>,

    #[arg(long, default_value_t = 5.0)]
    predictability: f64,

    /// Take the most likely token instead of sampling.
    #[arg(long)]
    greedy: bool,

    /// Run on the CPU ndarray backend instead of wgpu.
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let policy = if cli.strict {
        UnknownTokenPolicy::Fail
    } else {
        UnknownTokenPolicy::Drop
    };
    let tokenizer = BpeTokenizer::from_dir(&cli.vocab_dir)
        .with_context(|| format!("loading vocabulary from {}", cli.vocab_dir.display()))?
        .with_unknown_policy(policy);

    match cli.command {
        Commands::Encode { text } => {
            let ids = tokenizer.encode_text(&text)?;
            println!("{ids:?}");
        }
        Commands::Decode { ids } => {
            println!("{}", tokenizer.decode_ids(&ids)?);
        }
        Commands::Generate(args) => run_generate(Arc::new(tokenizer), args)?,
    }

    Ok(())
}

fn run_generate(tokenizer: Arc<BpeTokenizer>, args: GenerateArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GenerationConfig::load(path).map_err(|e| {
            anyhow::anyhow!("loading generation config {}: {e}", path.display())
        })?,
        None => GenerationConfig::new(),
    };
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if let Some(stop_after) = args.stop_after {
        config.stop_limit = stop_after;
    }
    if let Some(end_of_text) = args.end_of_text {
        config.end_of_text = end_of_text;
    }

    let sampler = SamplerConfig::new()
        .with_predictability(args.predictability)
        .with_greedy(args.greedy);

    let mut stdout = std::io::stdout();
    let stream = |text: &str| -> Result<()> {
        write!(stdout, "{text}").context("writing to stdout")?;
        stdout.flush().context("flushing stdout")
    };

    print!("{}", args.prompt);
    let output = if args.cpu {
        infer::<NdArray>(
            tokenizer,
            &args.model_dir,
            NdArrayDevice::default(),
            &args.prompt,
            config,
            sampler,
            stream,
        )?
    } else {
        infer::<Wgpu>(
            tokenizer,
            &args.model_dir,
            WgpuDevice::default(),
            &args.prompt,
            config,
            sampler,
            stream,
        )?
    };
    println!();
    info!("generated {} bytes", output.len() - args.prompt.len());

    Ok(())
}

fn init_logging(verbose: u8, quiet: u8) {
    let level = match (quiet, verbose) {
        (1, _) => LevelFilter::Error,
        (q, _) if q > 1 => LevelFilter::Off,
        (_, 0) => LevelFilter::Warn,
        (_, 1) => LevelFilter::Info,
        (_, 2) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("warn"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}
