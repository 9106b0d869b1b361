use std::{fmt::Display, path::PathBuf, time::Duration};

use bon::Builder;
use clap::ValueEnum;

use crate::{order::OrderingAlgorithm, Error, Result};

/// Native decision-diagram engines the adapter can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    Buddy,
    Cudd,
}

impl EngineKind {
    #[must_use]
    pub fn stub(self) -> &'static str {
        match self {
            EngineKind::Buddy => "buddy",
            EngineKind::Cudd => "cudd",
        }
    }

    pub fn from_stub(stub: &str) -> Result<EngineKind> {
        EngineKind::value_variants()
            .iter()
            .copied()
            .find(|kind| kind.stub().eq_ignore_ascii_case(stub.trim()))
            .ok_or_else(|| Error::UnsupportedEngine(stub.to_owned()))
    }
}

impl Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stub())
    }
}

/// How DBO connects the variables of one clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DboGraph {
    /// Every pair of co-occurring variables.
    Clique,
    /// Every variable to the clause's smallest variable.
    Star,
}

impl DboGraph {
    #[must_use]
    pub fn stub(self) -> &'static str {
        match self {
            DboGraph::Clique => "clique",
            DboGraph::Star => "star",
        }
    }

    pub fn from_stub(stub: &str) -> Result<DboGraph> {
        DboGraph::value_variants()
            .iter()
            .copied()
            .find(|graph| graph.stub().eq_ignore_ascii_case(stub.trim()))
            .ok_or_else(|| Error::UnsupportedOrderingAlgorithm(format!("dbo-{stub}")))
    }
}

/// Run configuration, built once and passed by reference to every stage.
#[allow(clippy::module_name_repetitions, clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Builder)]
pub struct Options {
    #[builder(default = EngineKind::Buddy)]
    pub engine: EngineKind,

    #[builder(default = OrderingAlgorithm::Off)]
    pub ordering: OrderingAlgorithm,

    /// Dynamic reordering stub, resolved against the engine's table; `off` disables it.
    #[builder(default = "lib-default".to_owned())]
    #[builder(into)]
    pub dynamic_reorder: String,

    #[builder(default = Duration::from_secs(60))]
    pub force_budget: Duration,

    #[builder(default = 32)]
    pub triage_seeds: usize,

    #[builder(default = Duration::from_secs(30))]
    pub triage_seed_budget: Duration,

    #[builder(default = Duration::from_secs(15))]
    pub triage_refine_budget: Duration,

    /// Seed for every random choice; fresh entropy when absent.
    pub seed: Option<u64>,

    #[builder(default = DboGraph::Clique)]
    pub dbo_graph: DboGraph,

    #[builder(default = false)]
    pub dbo_clause_reordering: bool,

    /// Watchdog bound for a single binary diagram operation; unbounded when absent.
    pub operation_timeout: Option<Duration>,

    #[builder(default = PathBuf::from("_cache"))]
    #[builder(into)]
    pub cache_dir: PathBuf,

    /// Master switch for cache lookups; when off, orders are not cached and
    /// stored entries are ignored. Compiled diagrams are still written to `cache_dir`.
    #[builder(default = true)]
    pub use_cache: bool,

    #[builder(default = true)]
    pub use_cached_order: bool,

    #[builder(default = true)]
    pub use_cached_results: bool,

    /// Directory searched for native engine libraries before the system paths.
    #[builder(into)]
    pub library_dir: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Options::builder().build()
    }
}
