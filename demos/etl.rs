use std::path::PathBuf;

use clap::Parser;
use kumiki::pipeline::{Pipeline, PipelineConfig};
use kumiki::{Client, Cluster, ClusterConfig, DEFAULT_PORT};

#[derive(Parser, Debug, Clone)]
#[command(about = "Runs the irregular ETL workflow locally or on a worker pool")]
struct Args {
    /// JSON file with pipeline settings, overridden by the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    files: Option<usize>,

    #[arg(long)]
    window: Option<usize>,

    #[arg(long)]
    samples: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Upper bound of the simulated work per task.
    #[arg(long)]
    max_delay_ms: Option<u64>,

    /// Evaluate on the calling thread instead of submitting to a cluster.
    #[arg(long)]
    local: bool,

    #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    address: String,

    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Print the task graph as a Mermaid diagram and exit.
    #[arg(long)]
    mermaid: bool,
}

fn pipeline_config(args: &Args) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => PipelineConfig::default(),
    };

    if let Some(files) = args.files {
        config.files = files;
    }
    if let Some(window) = args.window {
        config.window = window;
    }
    if let Some(samples) = args.samples {
        config.samples = samples;
    }
    if let Some(max_delay_ms) = args.max_delay_ms {
        config.max_delay_ms = max_delay_ms;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    Ok(config)
}

fn main() -> anyhow::Result<()> {
    #[cfg(feature = "logging")]
    kumiki::init_logging()?;

    let args = Args::parse();
    let config = pipeline_config(&args)?;

    let mut blueprint = config.blueprint();
    let pipeline = Pipeline::build(&mut blueprint, &config)?;
    let graph = blueprint.finish();

    if args.mermaid {
        println!("{graph}");
        return Ok(());
    }

    println!(
        "{} tasks, {} rolled windows, {} comparisons, seed {}",
        graph.len(),
        pipeline.rolled.len(),
        pipeline.compared.len(),
        graph.seed()
    );

    let summary = if args.local {
        let outcome = graph.execute(&pipeline.summary)?;
        let diagnostics = outcome.diagnostics();
        println!(
            "busy {:.2?}, wall {:.2?}",
            diagnostics.busy_time(),
            diagnostics.wall_time()
        );
        outcome.get(pipeline.summary)?
    } else {
        let _cluster = Cluster::start(ClusterConfig::new(&args.address).workers(args.workers))?;

        Client::scoped(&args.address, |client| -> anyhow::Result<_> {
            let future = client.submit(&graph, pipeline.summary)?;
            Ok(future.watch_progress()?)
        })??
    };

    println!("{}", serde_json::to_string_pretty(&*summary)?);

    Ok(())
}
