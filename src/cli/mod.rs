pub mod config;
pub mod validate;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::cli::config::Overrides;

#[derive(Parser)]
#[command(name = "barrage")]
#[command(about = "Staged HTTP load generator with outcome classification and thresholds", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that override values from the config file.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    /// Target service root
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Coupon to issue (coupon-issue scenario)
    #[arg(long, env = "COUPON_ID")]
    pub coupon_id: Option<u64>,
}

impl From<OverrideArgs> for Overrides {
    fn from(args: OverrideArgs) -> Self {
        Overrides {
            base_url: args.base_url,
            coupon_id: args.coupon_id,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a load test
    Run {
        /// Path to the configuration file (YAML/JSON)
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        overrides: OverrideArgs,

        /// Print the final summary as JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Export final summary to a JSON file
        #[arg(long)]
        export_json: Option<PathBuf>,

        /// Export final summary to a CSV file
        #[arg(long)]
        export_csv: Option<PathBuf>,

        /// Enable interactive control mode (ramp, pause, resume, status, stop)
        #[arg(long, short = 'i')]
        interactive: bool,

        /// Record the run in a SQLite history database
        #[arg(long, value_name = "DB", num_args = 0..=1, default_missing_value = crate::stats::db::DEFAULT_HISTORY_PATH)]
        history: Option<PathBuf>,
    },
    /// Validate a config file without generating load
    Validate {
        /// Path to the configuration file (YAML/JSON)
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Print the JSON schema of the config file
    Schema {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List recorded runs, or show one
    History {
        /// Run id to show in full
        id: Option<i64>,
        #[arg(long, default_value = crate::stats::db::DEFAULT_HISTORY_PATH)]
        db: PathBuf,
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
