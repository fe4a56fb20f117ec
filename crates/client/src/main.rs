use std::sync::Arc;

use arrow::util::pretty::pretty_format_batches;
use pfq_client::{Engine, init_tracing};
use pfq_common::EngineConfig;
use pfq_planner::Operator;
use pfq_storage::{InMemoryMetadata, InMemoryProvider};

#[derive(Debug, Clone, Default)]
struct Opts {
    plan: Option<String>,
    catalog: Option<String>,
    config: Option<String>,
    explain_only: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let opts = parse_opts(&args)?;
    let plan_path = opts.plan.clone().ok_or("missing --plan")?;
    let plan: Operator = serde_json::from_str(&std::fs::read_to_string(&plan_path)?)?;
    let config = match &opts.config {
        Some(path) => EngineConfig::load_from_json(path)?,
        None => EngineConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let metadata = match &opts.catalog {
            Some(path) => InMemoryMetadata::load_from_json(path)?,
            None => InMemoryMetadata::new(),
        };
        let units = metadata.storage_units();
        let provider = InMemoryProvider::new();
        let mut builder = Engine::builder(config).metadata(Arc::new(metadata));
        for unit in units {
            builder = builder.provider(unit.id, provider.clone());
        }
        let engine = builder.build()?;

        if opts.explain_only {
            println!("{}", engine.explain(&plan)?);
            return Ok(());
        }
        let batches = engine.collect(&plan).await?;
        if batches.is_empty() {
            println!("OK: 0 rows");
        } else {
            println!("{}", pretty_format_batches(&batches)?);
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}

fn parse_opts(args: &[String]) -> Result<Opts, Box<dyn std::error::Error>> {
    let mut opts = Opts::default();
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--plan" => {
                i += 1;
                opts.plan = Some(args.get(i).cloned().ok_or("missing value for --plan")?);
            }
            "--catalog" => {
                i += 1;
                opts.catalog = Some(args.get(i).cloned().ok_or("missing value for --catalog")?);
            }
            "--config" => {
                i += 1;
                opts.config = Some(args.get(i).cloned().ok_or("missing value for --config")?);
            }
            "--explain" => opts.explain_only = true,
            other => return Err(format!("unknown argument: {other}").into()),
        }
        i += 1;
    }
    Ok(opts)
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  pfq-client --plan PLAN.json [--catalog CATALOG.json] [--config CONFIG.json] [--explain]");
}
