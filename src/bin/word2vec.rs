use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use word2vec::{vectors, Dataset, Subsampler, TrainConfig, TrainEvent, Trainer};

#[derive(Parser)]
#[command(about = "Skip-gram word vectors with a sampled softmax", long_about = None)]
struct Options {
    /// Read a dataset (vocabulary, counts and corpus) saved in bincode format
    #[arg(long, value_name = "FILE", conflicts_with_all = ["vocab", "train"])]
    data: Option<PathBuf>,

    /// Read the vocabulary from FILE, one `word count` pair per line
    #[arg(long, value_name = "FILE", requires = "train")]
    vocab: Option<PathBuf>,

    /// Use text data from FILE to train the model
    #[arg(long = "train", value_name = "FILE", requires = "vocab")]
    train: Option<PathBuf>,

    /// Use FILE to save the resulting word vectors
    #[arg(long = "output", value_name = "FILE")]
    output_file: PathBuf,

    /// Save the resulting vectors in binary mode
    #[arg(long, group = "format")]
    binary: bool,

    /// Save the whole model in bincode format
    #[arg(long, group = "format")]
    bincode: bool,

    /// Set size of word vectors
    #[arg(long = "size", default_value_t = 300)]
    layer1_size: usize,

    /// Exponent applied to word counts to get the noise distribution
    #[arg(long, default_value_t = 0.75)]
    alpha: f64,

    /// Number of noise classes per example
    #[arg(long, default_value_t = 15)]
    negative: usize,

    /// Let a noise sample contain the same word more than once
    #[arg(long)]
    allow_duplicates: bool,

    /// Set the starting learning rate
    #[arg(long, default_value_t = 3e-3)]
    lr: f32,

    /// Multiply the learning rate by this after each schedule segment
    #[arg(long, default_value_t = 0.8)]
    lr_decay: f32,

    /// Number of learning rate decay steps
    #[arg(long, default_value_t = 10)]
    lr_steps: usize,

    /// Samples per learning rate step; default is half the subsampled corpus
    #[arg(long, value_name = "N")]
    lr_segment: Option<u64>,

    /// Truncate gradients to [-clip, clip]
    #[arg(long, default_value_t = 5.0)]
    clip: f32,

    /// Number of training epochs
    #[arg(long, default_value_t = 10)]
    iter: usize,

    /// Set max skip length between words
    #[arg(long, default_value_t = 2)]
    window: usize,

    /// Set threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled
    #[arg(long, default_value_t = 4e-5)]
    sample: f64,

    /// Number of tokens subsampled per step
    #[arg(long = "subsample-batch", value_name = "N", default_value_t = 5000)]
    subsample_batch: usize,

    /// Report subsampling progress every N tokens (0 = never)
    #[arg(long = "subsample-progress", value_name = "N", default_value_t = 10_000_000)]
    subsample_progress: usize,

    /// Number of (word, context) pairs per SGD step
    #[arg(long, default_value_t = 128)]
    minibatch: usize,

    /// Report training loss every N minibatches
    #[arg(long = "progress-every", value_name = "N", default_value_t = 200)]
    progress_every: usize,

    /// Periodically save the model to FILE in bincode format
    #[arg(long, value_name = "FILE")]
    checkpoint: Option<PathBuf>,

    /// Save a checkpoint every N training samples
    #[arg(long = "checkpoint-every", value_name = "N", default_value_t = 100_000 * 128)]
    checkpoint_every: u64,

    /// Seed for all random number generation
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Set the debug mode (default = 2 = more info during training)
    #[arg(long = "debug", default_value_t = 2)]
    debug_mode: usize,
}

impl Options {
    fn train_config(&self) -> TrainConfig {
        TrainConfig {
            hidden_dim: self.layer1_size,
            smoothing: self.alpha,
            num_samples: self.negative,
            allow_duplicates: self.allow_duplicates,
            learning_rate: self.lr,
            lr_decay: self.lr_decay,
            lr_steps: self.lr_steps,
            lr_segment: self.lr_segment,
            clip: self.clip,
            epochs: self.iter,
            max_window: self.window,
            subsampling: self.sample,
            subsample_batch: self.subsample_batch,
            subsample_progress: self.subsample_progress,
            minibatch_size: self.minibatch,
            progress_every: self.progress_every,
            checkpoint_every: self.checkpoint_every,
            seed: self.seed,
            ..TrainConfig::default()
        }
    }

    fn load_dataset(&self) -> Result<Dataset> {
        match (&self.data, &self.vocab, &self.train) {
            (Some(data), _, _) => Dataset::load(data),
            (None, Some(vocab), Some(train)) => Dataset::from_text(vocab, train),
            _ => anyhow::bail!("either --data or both --vocab and --train are required"),
        }
    }
}

fn subsample(options: &Options, config: &TrainConfig, dataset: &mut Dataset) -> Result<()> {
    let subsampler = Subsampler::new(&dataset.freqs, config.subsampling)?
        .with_batch_size(config.subsample_batch)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let debug_mode = options.debug_mode;
    let summary = subsampler.subsample(
        dataset.corpus_mut(),
        &mut rng,
        config.subsample_progress,
        |progress| {
            if debug_mode > 1 {
                println!("{progress}");
            }
        },
    )?;
    if debug_mode > 0 {
        println!("Subsampling: {summary}");
    }
    Ok(())
}

fn train_model(options: &Options) -> Result<()> {
    let config = options.train_config();
    config.validate()?;

    let mut dataset = options.load_dataset()?;
    if options.debug_mode > 0 {
        println!("Vocab size: {}", dataset.vocab_size());
        println!("Words in train file: {}", dataset.corpus().len());
    }
    subsample(options, &config, &mut dataset)?;

    let mut trainer = Trainer::new(config, &dataset)?;
    if let Some(path) = &options.checkpoint {
        trainer = trainer.with_checkpoints(path.clone());
    }

    let bar = if options.debug_mode > 0 {
        ProgressBar::new(options.iter as u64)
    } else {
        ProgressBar::hidden()
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("epoch {pos}/{len} [{bar:40}] {elapsed_precise} {msg}")?
            .progress_chars("=>-"),
    );

    let start = Instant::now();
    let debug_mode = options.debug_mode;
    let total = trainer.train(dataset.corpus(), |event| match event {
        TrainEvent::Progress {
            samples_seen,
            learning_rate,
            stats,
            ..
        } => {
            bar.set_message(format!(
                "lr {:e}  loss {:.4}  error {:.2}%  samples {}",
                learning_rate,
                stats.mean_loss(),
                stats.error_rate() * 100.0,
                samples_seen,
            ));
        }
        TrainEvent::EpochEnd { epoch, stats } => {
            if debug_mode > 1 {
                bar.println(format!(
                    "Epoch {}: loss {:.4}  error {:.2}%  over {} samples",
                    epoch + 1,
                    stats.mean_loss(),
                    stats.error_rate() * 100.0,
                    stats.examples,
                ));
            }
            bar.inc(1);
        }
        TrainEvent::Checkpoint { path, samples_seen } => {
            if debug_mode > 1 {
                bar.println(format!("Saved checkpoint {path:?} at {samples_seen} samples"));
            }
        }
    })?;
    bar.finish();

    if options.debug_mode > 0 {
        println!(
            "Trained on {} samples in {:.1}s, mean loss {:.4}",
            total.examples,
            start.elapsed().as_secs_f64(),
            total.mean_loss(),
        );
    }

    save_output(options, &trainer, &options.output_file)
}

fn save_output(options: &Options, trainer: &Trainer, output_file: &Path) -> Result<()> {
    if options.bincode {
        let fo = BufWriter::new(File::create(output_file).context("error creating output file")?);
        bincode::serialize_into(fo, &trainer.model()).context("error writing output file")?;
    } else if options.binary {
        vectors::save_binary(output_file, trainer.vocab(), trainer.embeddings().table())?;
    } else {
        vectors::save_text(output_file, trainer.vocab(), trainer.embeddings().table())?;
    }
    if options.debug_mode > 0 {
        println!("Saved vectors to {}", output_file.display());
        let _ = io::stdout().flush();
    }
    Ok(())
}

fn main() {
    let options = Options::parse();

    if let Err(err) = train_model(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
