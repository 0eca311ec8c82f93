// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `train` and `generate`
// and all their configurable flags.
//
// clap's derive macros generate help text, error messages for
// missing args, and string → number conversion. The ValueEnum
// wrappers keep clap types out of the domain layer; the From
// impls at the bottom are the only crossing point.

use clap::{Args, Subcommand, ValueEnum};

use crate::application::{
    generate_use_case::GenerateConfig,
    train_use_case::TrainConfig,
};
use crate::domain::policy::{OverflowPolicy, RemainderPolicy, TrainTask};
use crate::ml::mapper::MappingKind;

/// The two top-level subcommands available to the user
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune the prefix model on embedding/text splits
    Train(TrainArgs),

    /// Generate captions or answers from a trained checkpoint
    Generate(GenerateArgs),
}

/// Training task, as spelled on the command line.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TaskArg {
    Captioning,
    Vqa,
    Multitask,
}

impl From<TaskArg> for TrainTask {
    fn from(t: TaskArg) -> Self {
        match t {
            TaskArg::Captioning => TrainTask::Captioning,
            TaskArg::Vqa => TrainTask::Vqa,
            TaskArg::Multitask => TrainTask::MultiTask,
        }
    }
}

/// Prefix mapper architecture.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum MappingArg {
    Mlp,
    Transformer,
}

impl From<MappingArg> for MappingKind {
    fn from(m: MappingArg) -> Self {
        match m {
            MappingArg::Mlp => MappingKind::Mlp,
            MappingArg::Transformer => MappingKind::Transformer,
        }
    }
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Caption training split (JSON with embeddings + records)
    #[arg(long)]
    pub caption_data: Option<String>,

    /// Caption validation split; when omitted, 10% of the
    /// training records are held out
    #[arg(long)]
    pub caption_val_data: Option<String>,

    /// Question-answer training split
    #[arg(long)]
    pub qa_data: Option<String>,

    /// Question-answer validation split; when omitted, 10% of
    /// the training records are held out
    #[arg(long)]
    pub qa_val_data: Option<String>,

    /// Directory for checkpoints, tokenizer, and metrics
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Base name for checkpoint files
    #[arg(long, default_value = "caption_prefix")]
    pub model_name: String,

    /// Which task(s) to train on
    #[arg(long, value_enum, default_value_t = TaskArg::Captioning)]
    pub task: TaskArg,

    /// Prefix mapper architecture
    #[arg(long, value_enum, default_value_t = MappingArg::Mlp)]
    pub mapping: MappingArg,

    /// Number of soft-prompt vectors handed to the language
    /// model (at least 1)
    #[arg(long, default_value_t = 10)]
    pub prefix_length: usize,

    /// Number of visual tokens inside the transformer mapper
    #[arg(long, default_value_t = 10)]
    pub clip_length: usize,

    /// Expect 640-dimensional ResNet embeddings instead of
    /// 512-dimensional ViT embeddings
    #[arg(long)]
    pub resnet_features: bool,

    /// L2-normalize every visual embedding before mapping
    #[arg(long)]
    pub normalize_prefix: bool,

    /// Freeze the language model; train the mapper only
    #[arg(long)]
    pub only_prefix: bool,

    /// Drop question-answer pairs that exceed the sequence cap
    /// instead of keeping them with zero supervision
    #[arg(long)]
    pub drop_overflow: bool,

    /// In multi-task training, keep stepping on the longer
    /// stream alone after the shorter one is exhausted
    #[arg(long)]
    pub drain_remainder: bool,

    /// Loss weight for the captioning task
    #[arg(long, default_value_t = 1.0)]
    pub weight_captioning: f64,

    /// Loss weight for the answering task
    #[arg(long, default_value_t = 1.0)]
    pub weight_vqa: f64,

    /// Number of examples per optimization step
    #[arg(long, default_value_t = 40)]
    pub batch_size: usize,

    /// Number of full passes through the training data
    #[arg(long, default_value_t = 10)]
    pub epochs: usize,

    /// Peak learning rate (linear warmup, then linear decay)
    #[arg(long, default_value_t = 2e-5)]
    pub lr: f64,

    /// Optimization steps spent ramping the rate up
    #[arg(long, default_value_t = 5000)]
    pub warmup_steps: usize,

    /// Save a periodic checkpoint every N epochs
    #[arg(long, default_value_t = 1)]
    pub save_every: usize,

    /// Shuffling seed for the data loaders
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Vocabulary budget for the tokenizer
    #[arg(long, default_value_t = 10000)]
    pub vocab_size: usize,

    /// Hidden dimension of the language model
    #[arg(long, default_value_t = 256)]
    pub d_model: usize,

    /// Attention heads — d_model must be divisible by this
    #[arg(long, default_value_t = 8)]
    pub num_heads: usize,

    /// Stacked decoder layers in the language model
    #[arg(long, default_value_t = 6)]
    pub num_layers: usize,

    /// Inner dimension of the feed-forward network
    #[arg(long, default_value_t = 1024)]
    pub d_ff: usize,

    /// Dropout probability (language model and attention)
    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,

    /// Position-embedding capacity: prefix + sequence must fit
    #[arg(long, default_value_t = 1024)]
    pub max_positions: usize,

    /// Attention layers inside the transformer mapper
    #[arg(long, default_value_t = 8)]
    pub mapper_layers: usize,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// This is the boundary between Layer 1 and Layer 2 — the
/// application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            caption_data:     a.caption_data,
            caption_val_data: a.caption_val_data,
            qa_data:          a.qa_data,
            qa_val_data:      a.qa_val_data,
            checkpoint_dir:   a.checkpoint_dir,
            model_name:       a.model_name,

            task:             a.task.into(),
            mapping:          a.mapping.into(),
            prefix_length:    a.prefix_length,
            clip_length:      a.clip_length,
            prefix_dim:       if a.resnet_features { 640 } else { 512 },
            normalize_prefix: a.normalize_prefix,
            only_prefix:      a.only_prefix,
            overflow: if a.drop_overflow {
                OverflowPolicy::Drop
            } else {
                OverflowPolicy::ZeroSupervision
            },
            remainder: if a.drain_remainder {
                RemainderPolicy::DrainLonger
            } else {
                RemainderPolicy::StopAtShorter
            },
            weight_captioning: a.weight_captioning,
            weight_vqa:        a.weight_vqa,

            batch_size:   a.batch_size,
            epochs:       a.epochs,
            lr:           a.lr,
            warmup_steps: a.warmup_steps,
            save_every:   a.save_every,
            seed:         a.seed,

            vocab_size:    a.vocab_size,
            d_model:       a.d_model,
            num_heads:     a.num_heads,
            num_layers:    a.num_layers,
            d_ff:          a.d_ff,
            dropout:       a.dropout,
            max_positions: a.max_positions,
            mapper_layers: a.mapper_layers,
        }
    }
}

/// All arguments for the `generate` command
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Dataset split to generate for (JSON with embeddings + records)
    #[arg(long)]
    pub data: String,

    /// Directory where checkpoints were saved during training
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Which task the split belongs to (captioning or vqa)
    #[arg(long, value_enum, default_value_t = TaskArg::Captioning)]
    pub task: TaskArg,

    /// Where to write the evaluation records
    #[arg(long, default_value = "evaluation_records.json")]
    pub output: String,

    /// Number of sequences decoded together
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Hard cap on generated tokens per sequence
    #[arg(long, default_value_t = 67)]
    pub entry_length: usize,

    /// Logit scaling before the greedy pick; non-positive skips it
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f64,
}

impl From<GenerateArgs> for GenerateConfig {
    fn from(a: GenerateArgs) -> Self {
        GenerateConfig {
            data_path:      a.data,
            checkpoint_dir: a.checkpoint_dir,
            task:           a.task.into(),
            output_path:    a.output,
            batch_size:     a.batch_size,
            entry_length:   a.entry_length,
            temperature:    a.temperature,
        }
    }
}
