use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "role-bench")]
#[command(about = "Role framing experiment runner with LLM-as-judge scoring", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the model x scenario x role x iteration matrix and persist the results
    Run {
        /// Generation model identifiers (exactly two, from different families)
        #[arg(long = "model", value_name = "MODEL")]
        models: Vec<String>,

        /// Judge model identifier (third family)
        #[arg(long)]
        judge_model: Option<String>,

        /// Scenario ids to include (defaults to every scenario in the catalog)
        #[arg(long = "scenario", value_name = "ID")]
        scenarios: Vec<String>,

        /// Role ids to include (defaults to every role in the catalog)
        #[arg(long = "role", value_name = "ID")]
        roles: Vec<String>,

        /// Iterations per (model, scenario, role) combination
        #[arg(long)]
        iterations: Option<u32>,

        /// Sampling temperature for generation models
        #[arg(long)]
        temperature: Option<f64>,

        /// Sampling temperature for the judge model
        #[arg(long)]
        judge_temperature: Option<f64>,

        /// Token budget for generation responses
        #[arg(long)]
        max_tokens: Option<u32>,

        /// Scenario/role catalog file (JSON); falls back to the built-in catalog
        #[arg(long, value_name = "FILE")]
        catalog: Option<PathBuf>,
    },
    /// List persisted experiment runs, newest first
    List,
    /// Export a persisted run to CSV
    Export {
        /// Run id (full id or the 8-char file prefix)
        run_id: String,

        /// Output CSV path (defaults to analysis_<run_id[..8]>.csv next to the run file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
