use anyhow::{Context, Result};
use cancer_abm::*;
use clap::Parser;
use std::path::PathBuf;
// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Spatial tumor growth simulation with metastatic sites and treatment")]
struct Args {
    /// JSON simulation config (defaults if omitted)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Random seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    steps: Option<usize>,
    #[arg(long)]
    runs: Option<usize>,
    /// Record entity locations every N steps
    #[arg(long)]
    snapshot_every: Option<usize>,
    /// Initial population record file ("phenotype invasive site x y" per line)
    #[arg(long)]
    records: Option<PathBuf>,
    /// Initial phenotype fractions, e.g. "3/4,1/4"
    #[arg(long, value_delimiter = ',')]
    distribution: Option<Vec<String>>,
    #[arg(long)]
    population: Option<usize>,
    #[arg(long, default_value = "output")]
    output: PathBuf,
    #[arg(long)]
    parallel: bool,
    #[arg(long)]
    progress: bool,
    #[arg(long)]
    checkpoint_every: Option<usize>,
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    /// Continue a single run from this checkpoint file
    #[arg(long)]
    resume: Option<PathBuf>,
    /// Run index used with --resume
    #[arg(long, default_value_t = 0)]
    run: usize,
}

fn apply_overrides(config: &mut SimulationConfig, args: &Args) -> Result<()> {
    let batch = &mut config.batch;
    if args.seed.is_some() {
        batch.seed = args.seed;
    }
    if let Some(steps) = args.steps {
        batch.steps = steps;
    }
    if let Some(runs) = args.runs {
        batch.runs = runs;
    }
    if let Some(k) = args.snapshot_every {
        batch.snapshot_every = k;
    }
    if args.checkpoint_every.is_some() {
        batch.checkpoint_every = args.checkpoint_every;
    }
    if args.checkpoint_dir.is_some() {
        batch.checkpoint_dir = args.checkpoint_dir.clone();
    }
    batch.parallel_runs |= args.parallel;
    batch.show_progress |= args.progress;

    let initial = &mut config.initial;
    if args.records.is_some() {
        initial.records_path = args.records.clone();
    }
    if let Some(n) = args.population {
        initial.total_count = n;
    }
    if let Some(fractions) = &args.distribution {
        initial.distribution = fractions
            .iter()
            .map(|f| parse_fraction(f))
            .collect::<Result<_, _>>()?;
    }
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_path(path)?,
        None => SimulationConfig::default(),
    };
    apply_overrides(&mut config, &args)?;
    eprintln!("{:?}", config);

    let driver = Driver::new(config)?;
    let cancel = CancelToken::new();
    let output = args.output.clone();

    let summaries = match &args.resume {
        Some(path) => {
            let checkpoint = Checkpoint::load(path)?;
            let mut recorder = JsonlRecorder::append(&output, args.run, checkpoint.next_step)?;
            vec![driver.resume_from(checkpoint, args.run, &mut recorder, &cancel)?]
        }
        None => driver.run_batch(|run| JsonlRecorder::create(&output, run), &cancel)?,
    };

    let summary_path = output.join("summary.json");
    let file = std::fs::File::create(&summary_path)
        .with_context(|| format!("creating {}", summary_path.display()))?;
    serde_json::to_writer_pretty(file, &summaries)?;
    for s in &summaries {
        eprintln!(
            "run {}: seed {}, {} steps, final population {}",
            s.run, s.seed, s.steps_completed, s.final_population
        );
    }
    Ok(())
}
