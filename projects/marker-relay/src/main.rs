mod calibration;
mod cli;
mod net;
mod pipeline;
mod run_context;
mod video;

use anyhow::Result;
use cli::Args;
use run_context::RunContext;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();
    let ctx = RunContext::from_args(args)?;

    pipeline::runner::run(ctx)
}
