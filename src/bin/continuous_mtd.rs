use anyhow::Result;
use cancer_abm::*;
use clap::Parser;
use std::path::PathBuf;
// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Continuous maximum tolerated dose, optionally with anti-migratory treatment")]
struct Args {
    /// Random seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 300)]
    steps: usize,
    #[arg(long, default_value_t = 2000)]
    population: usize,
    #[arg(long, default_value_t = 50)]
    mtd_start_step: usize,
    #[arg(long, default_value_t = 0.9)]
    kill_fraction: f64,
    /// Also start anti-migratory treatment at this step
    #[arg(long)]
    anti_migratory_step: Option<usize>,
    #[arg(long, default_value_t = 0.01)]
    treated_migration_probability: f64,
    #[arg(long, default_value_t = 1)]
    runs: usize,
    #[arg(long, default_value = "mtd_output")]
    output: PathBuf,
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    eprintln!("=== Continuous MTD from step {} ===", args.mtd_start_step);

    let config = SimulationConfig {
        rules: RuleSetParams {
            mtd_start_step: Some(args.mtd_start_step),
            kill_fraction: args.kill_fraction,
            anti_migratory_start_step: args.anti_migratory_step,
            migration_probability_under_treatment: args.treated_migration_probability,
            ..RuleSetParams::default()
        },
        initial: InitialPopulationConfig {
            total_count: args.population,
            ..InitialPopulationConfig::default()
        },
        batch: BatchConfig {
            steps: args.steps,
            runs: args.runs,
            seed: args.seed,
            snapshot_every: 10,
            parallel_runs: args.runs > 1,
            ..BatchConfig::default()
        },
    };
    eprintln!("{:?}", config.rules);

    let driver = Driver::new(config)?;
    let output = args.output.clone();
    let summaries = driver.run_batch(|run| JsonlRecorder::create(&output, run), &CancelToken::new())?;

    // ── Summary ───────────────────────────────────────────────────────────────
    for s in &summaries {
        eprintln!("run {} (seed {}): final population {}", s.run, s.seed, s.final_population);
    }
    Ok(())
}
