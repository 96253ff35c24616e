use anyhow::Result;
use clap::{Parser, Subcommand};
use strata_pipeline::{count, normalize, route, sample};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Domain-stratified sampling over sharded web-crawl archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream shards and build the domain frequency report
    Count(count::CountArgs),
    /// Partition shard records into per-domain buckets
    Route(route::RouteArgs),
    /// Draw a bounded two-phase sample from every bucket
    Sample(sample::SampleArgs),
    /// Extract text from sampled content and merge per domain
    Normalize(normalize::NormalizeArgs),
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Count(args) => {
            count::run(&args)?;
        }
        Commands::Route(args) => {
            route::run(&args)?;
        }
        Commands::Sample(args) => {
            sample::run(&args)?;
        }
        Commands::Normalize(args) => {
            normalize::run(&args)?;
        }
    }
    Ok(())
}
