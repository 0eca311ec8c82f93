// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with clap.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — fine-tunes the prefix model on a dataset split
//   2. `generate` — loads a checkpoint and generates text for a split

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, GenerateArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "clip-prefix-caption",
    version = "0.1.0",
    about = "Fine-tune a captioning/VQA language model on visual prefix embeddings."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use
    /// case. The CLI layer only routes, never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => Self::run_train(args),
            Commands::Generate(args) => Self::run_generate(args),
        }
    }

    fn run_train(args: TrainArgs) -> Result<()> {
        use crate::application::train_use_case::TrainUseCase;

        tracing::info!("Starting {:?} training", args.task);
        let use_case = TrainUseCase::new(args.into());
        use_case.execute()?;

        println!("Training complete. Checkpoint saved.");
        Ok(())
    }

    fn run_generate(args: GenerateArgs) -> Result<()> {
        use crate::application::generate_use_case::GenerateUseCase;

        let use_case = GenerateUseCase::new(args.into());
        use_case.execute()
    }
}
