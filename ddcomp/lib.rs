//! # CNF compiler for pluggable decision-diagram engines.
//!
//! Compile propositional formulas in
//! [DIMACS](https://www21.in.tum.de/~lammich/2015_SS_Seminar_SAT/resources/dimacs-cnf.pdf)
//! CNF into [Binary Decision Diagrams](https://en.wikipedia.org/wiki/Binary_decision_diagram)
//! built by a native engine (BuDDy or CUDD), under a static variable order
//! chosen beforehand.
//!
//! The crate currently supports:
//! * static variable ordering by FORCE, FORCE with seed triage, and degree-based ordering (DBO),
//! * clause reordering tailored to the chosen variable order,
//! * clause-by-clause compilation with a per-operation watchdog,
//! * an engine-neutral canonical dump format, translated from each engine's native dump,
//! * model counting and uniform sampling over canonical dumps,
//! * a content-addressed cache of orders and compiled diagrams.
//!
//! The following snippet orders and compiles a DIMACS file with CUDD and
//! counts the models of the result:
//!
//! ```rust,no_run
//! use ddcomp::{
//!     dump::{count_models, CanonicalDump},
//!     options::{EngineKind, Options},
//!     order::OrderingAlgorithm,
//!     pipeline::Pipeline,
//! };
//!
//! let options = Options::builder()
//!     .engine(EngineKind::Cudd)
//!     .ordering(OrderingAlgorithm::ForceTriage)
//!     .build();
//!
//! let report = Pipeline::new(&options).run("formula.cnf")?;
//! let dump = CanonicalDump::from_path(&report.dump_path)?;
//! println!("{} models", count_models(&dump));
//! # Ok::<(), ddcomp::Error>(())
//! ```
//!
//! ---
//!
//! The stages can also be driven one by one:
//!
//! * [`crate::order::orderer`] -- select a static ordering heuristic
//! * [`crate::engine::Manager::open`] -- bind a native engine
//! * [`crate::compiler::compile`] -- fold the clauses into one diagram
//! * [`crate::engine::Manager::canonical_dump`] -- translate the result to the canonical format
pub mod cache;
pub mod cnf;
pub mod compiler;
pub mod dump;
pub mod engine;
pub mod options;
pub mod order;
pub mod pipeline;

mod error;

pub use crate::error::{Error, Result};

/// Version written into every canonical dump.
pub const TOOL_VERSION: &str = concat!("ddcomp ", env!("CARGO_PKG_VERSION"));
