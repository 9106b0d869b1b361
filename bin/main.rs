use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use ddcomp::cnf::Cnf;
use ddcomp::dump::{count_models, sample, CanonicalDump};
use ddcomp::options::{DboGraph, EngineKind, Options};
use ddcomp::order::OrderingAlgorithm;
use ddcomp::pipeline::{Pipeline, Report};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    None,
}

impl LogLevel {
    fn to_trace(&self) -> Option<tracing::Level> {
        Some(match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::None => return None,
        })
    }
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value.parse().map_err(|err| format!("{err}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|err| err.to_string())
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to DIMACS file with the CNF to compile
    #[arg(value_name = "dimacs.cnf")]
    file: PathBuf,

    /// Native engine building the diagram.
    #[arg(short, long, value_enum, default_value_t = EngineKind::Buddy)]
    engine: EngineKind,

    /// Static variable ordering heuristic.
    #[arg(short, long, value_enum, default_value_t = OrderingAlgorithm::Off)]
    ordering: OrderingAlgorithm,

    /// Dynamic reordering of the engine, by stub. `off` disables it.
    #[arg(long, default_value = "lib-default")]
    dynamic_reorder: String,

    /// How DBO connects the variables of a clause.
    #[arg(long, value_enum, default_value_t = DboGraph::Clique)]
    dbo_graph: DboGraph,

    /// Let DBO reorder the clauses as well.
    #[arg(long)]
    dbo_clause_reordering: bool,

    /// Seed for the random start orders of FORCE.
    #[arg(long)]
    seed: Option<u64>,

    /// Wall-clock budget of FORCE, in seconds.
    #[arg(long, value_parser = parse_seconds, default_value = "60")]
    force_budget: Duration,

    /// Random start orders evaluated by FORCE-triage.
    #[arg(long, default_value_t = 32)]
    triage_seeds: usize,

    /// FORCE budget of every triage seed, in seconds.
    #[arg(long, value_parser = parse_seconds, default_value = "30")]
    triage_seed_budget: Duration,

    /// FORCE budget of every refinement round of the triage survivors, in seconds.
    #[arg(long, value_parser = parse_seconds, default_value = "15")]
    triage_refine_budget: Duration,

    /// Watchdog bound for a single diagram operation, in seconds.
    #[arg(long, value_parser = parse_seconds)]
    op_timeout: Option<Duration>,

    /// Where orders and compiled diagrams are cached.
    #[arg(long, default_value = "_cache")]
    cache_dir: PathBuf,

    /// Directory searched for libbuddy.so / libcudd.so first.
    #[arg(long)]
    lib_dir: Option<PathBuf>,

    /// Neither read nor cache orders, and ignore cached diagrams.
    #[arg(long)]
    no_cache: bool,

    /// Recompute the variable order even if one is cached.
    #[arg(long)]
    ignore_cached_order: bool,

    /// Recompile even if a compiled diagram is cached.
    #[arg(long)]
    ignore_cached_results: bool,

    /// Print count of the models to the stdout.
    #[arg(short, long)]
    count_models: bool,

    /// Print N uniformly drawn models to the stdout.
    #[arg(short, long, value_name = "N")]
    samples: Option<usize>,

    /// Verbosity level. See `tracing::Level` for more information.
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    verbosity: LogLevel,
}

impl Cli {
    fn options(&self) -> Options {
        Options::builder()
            .engine(self.engine)
            .ordering(self.ordering)
            .dynamic_reorder(self.dynamic_reorder.as_str())
            .dbo_graph(self.dbo_graph)
            .dbo_clause_reordering(self.dbo_clause_reordering)
            .maybe_seed(self.seed)
            .force_budget(self.force_budget)
            .triage_seeds(self.triage_seeds)
            .triage_seed_budget(self.triage_seed_budget)
            .triage_refine_budget(self.triage_refine_budget)
            .maybe_operation_timeout(self.op_timeout)
            .cache_dir(self.cache_dir.clone())
            .maybe_library_dir(self.lib_dir.clone())
            .use_cache(!self.no_cache)
            .use_cached_order(!self.ignore_cached_order)
            .use_cached_results(!self.ignore_cached_results)
            .build()
    }
}

fn print_report(report: &Report, elapsed: Duration) {
    let origin = if report.from_cache { "cached" } else { "compiled" };
    println!("diagram ({origin}): {}", report.dump_path.display());
    println!("order          : {}", report.order);
    if report.skipped_clauses > 0 {
        println!("skipped clauses: {}", report.skipped_clauses);
    }
    println!("total time     : {elapsed:.2?}");
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    if let Some(level) = args.verbosity.to_trace() {
        tracing_subscriber::fmt().with_max_level(level).init();
    }

    let options = args.options();
    let started = Instant::now();
    let report = Pipeline::new(&options)
        .run(&args.file)
        .with_context(|| format!("could not compile {}", args.file.display()))?;
    print_report(&report, started.elapsed());

    if !args.count_models && args.samples.is_none() {
        return Ok(());
    }

    let dump = CanonicalDump::from_path(&report.dump_path)
        .with_context(|| format!("could not read back {}", report.dump_path.display()))?;

    if args.count_models {
        println!("{}", count_models(&dump));
    }

    if let Some(k) = args.samples {
        let cnf = Cnf::from_path(&args.file)?;
        let mut rng = match args.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        println!("{}", sample(&dump, k, &mut rng).with_labels(|v| cnf.label(v)));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use clap::Parser;
    use ddcomp::order::OrderingAlgorithm;
    use pretty_assertions::assert_eq;

    use super::Cli;

    #[test]
    fn triage_flags_reach_the_options() {
        let cli = Cli::try_parse_from([
            "ddcompc",
            "formula.cnf",
            "--ordering",
            "force-triage",
            "--triage-seeds",
            "4",
            "--triage-seed-budget",
            "2.5",
            "--triage-refine-budget",
            "1",
        ])
        .unwrap();
        let options = cli.options();

        assert_eq!(options.ordering, OrderingAlgorithm::ForceTriage);
        assert_eq!(options.triage_seeds, 4);
        assert_eq!(options.triage_seed_budget, Duration::from_millis(2500));
        assert_eq!(options.triage_refine_budget, Duration::from_secs(1));
    }

    #[test]
    fn triage_defaults() {
        let options = Cli::try_parse_from(["ddcompc", "formula.cnf"]).unwrap().options();
        assert_eq!(options.triage_seeds, 32);
        assert_eq!(options.triage_seed_budget, Duration::from_secs(30));
        assert_eq!(options.triage_refine_budget, Duration::from_secs(15));
    }
}
