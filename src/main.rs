//! LOTKA - CLI Entry Point
//!
//! Headless predator/prey simulation runner.

use clap::{Parser, Subcommand};
use lotka::estimator::{fit_error, LotkaVolterraModel};
use lotka::{benchmark, Config, CsvStatsSink, Simulation, Species, StatsHistory};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "lotka")]
#[command(version)]
#[command(about = "Tick-synchronized concurrent predator/prey simulation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a new simulation
    Run {
        /// Configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Maximum number of ticks (defaults to tick.max_ticks)
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Output directory for statistics
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Quiet mode (no periodic summaries)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Generate default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Fit Lotka-Volterra parameters to a saved stats history
    Fit {
        /// Stats history file (JSON)
        #[arg(long, default_value = "output/stats_history.json")]
        history: PathBuf,

        /// Ticks of theoretical trajectory to print
        #[arg(short, long, default_value = "20")]
        ticks: usize,
    },

    /// Run performance benchmark
    Benchmark {
        /// Number of ticks
        #[arg(short, long, default_value = "200")]
        ticks: u64,

        /// Initial prey
        #[arg(long, default_value = "400")]
        prey: usize,

        /// Initial predators
        #[arg(long, default_value = "60")]
        predators: usize,
    },
}

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            ticks,
            seed,
            output,
            quiet,
        } => run_simulation(config, ticks, seed, output, quiet),

        Commands::Init { output } => {
            init_logging("info");
            generate_config(output)
        }

        Commands::Fit { history, ticks } => {
            init_logging("info");
            fit_history(history, ticks)
        }

        Commands::Benchmark {
            ticks,
            prey,
            predators,
        } => {
            init_logging("warn");
            run_benchmark(ticks, prey, predators)
        }
    }
}

fn run_simulation(
    config_path: PathBuf,
    ticks: Option<u64>,
    seed: Option<u64>,
    output: PathBuf,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Load or create config
    let (mut config, source) = if config_path.exists() {
        (Config::from_file(&config_path)?, format!("{:?}", config_path))
    } else {
        (Config::default(), "defaults".to_string())
    };
    init_logging(&config.logging.log_level);
    println!("Configuration: {}", source);

    if quiet {
        config.logging.stats_interval = 0;
    }

    std::fs::create_dir_all(&output)?;

    let mut sim = match seed {
        Some(s) => Simulation::new_with_seed(config.clone(), s)?,
        None => Simulation::new(config.clone())?,
    };
    let csv_path = output.join("stats.csv");
    sim.add_sink(Box::new(CsvStatsSink::create(&csv_path)?));

    println!("Starting simulation");
    println!("  Seed: {}", sim.seed());
    println!("  Grid size: {}x{}", config.world.width, config.world.height);
    println!(
        "  Prey: {}  Predators: {}",
        sim.count(Species::Prey),
        sim.count(Species::Predator)
    );
    match ticks.or(Some(config.tick.max_ticks).filter(|&n| n > 0)) {
        Some(n) => println!("  Ticks: {}", n),
        None => println!("  Ticks: until extinction"),
    }
    println!();

    let start = Instant::now();
    let summary = sim.run(ticks)?;
    let elapsed = start.elapsed();

    println!();
    println!("=== Simulation Complete ===");
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!("Ticks: {}", sim.tick());
    println!(
        "Speed: {:.1} ticks/s",
        summary.ticks as f64 / elapsed.as_secs_f64().max(1e-9)
    );
    println!("End: {}", summary.end);
    if let Some(stats) = &summary.final_stats {
        println!("Final: {}", stats.summary());
    }
    println!(
        "Peaks: prey {} / predators {}",
        summary.peak_prey, summary.peak_predators
    );
    println!("Timed-out ticks: {}", summary.timeouts);
    println!("Regime: {:?}", sim.controller().regime());
    if let Some(fit) = summary.fit {
        let (x, y) = fit.equilibrium();
        println!("Fitted model: {}", fit);
        println!("  Equilibrium: prey {:.1} / predators {:.1}", x, y);
    }

    println!("Stats CSV: {:?}", csv_path);
    let history_path = output.join("stats_history.json");
    sim.history().save(&history_path)?;
    println!("Stats history: {:?}", history_path);

    Ok(())
}

fn generate_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    config.save(&output)?;
    println!("Generated default configuration: {:?}", output);
    Ok(())
}

fn fit_history(path: PathBuf, ticks: usize) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading stats history: {:?}", path);
    let history = StatsHistory::load(&path)?;
    let observed = history.population_series();
    let Some(&(x0, y0)) = observed.first() else {
        println!("History is empty");
        return Ok(());
    };

    let model = LotkaVolterraModel::fit(&observed);
    let params = model.params;
    let horizon = ticks.max(observed.len().saturating_sub(1));
    let predicted = model.simulate(x0, y0, horizon);
    let (ex, ey) = params.equilibrium();

    println!();
    println!("=== Lotka-Volterra Fit ===");
    println!("Observations: {}", observed.len());
    println!("Parameters: {}", params);
    println!("Equilibrium: prey {:.1} / predators {:.1}", ex, ey);
    println!("Period: {:.1} ticks", params.period());
    println!("RMSE: {:.3}", fit_error(&observed, &predicted));
    println!();
    println!("{:>6} {:>9} {:>9} {:>9} {:>9}", "Tick", "Prey", "Model", "Pred", "Model");
    for (t, &(px, py)) in predicted.iter().enumerate().take(ticks + 1) {
        match observed.get(t) {
            Some(&(ox, oy)) => {
                println!("{:>6} {:>9.0} {:>9.1} {:>9.0} {:>9.1}", t, ox, px, oy, py)
            }
            None => println!("{:>6} {:>9} {:>9.1} {:>9} {:>9.1}", t, "-", px, "-", py),
        }
    }

    Ok(())
}

fn run_benchmark(
    ticks: u64,
    prey: usize,
    predators: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Benchmark: {} ticks, {} prey, {} predators", ticks, prey, predators);
    println!();
    let result = benchmark(ticks, prey, predators)?;
    print!("{}", result);
    Ok(())
}
