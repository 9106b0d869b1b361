//! The full run: parse, order, compile and dump, with caching in between.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Instant,
};

use tracing::{info, instrument, warn};

use crate::{
    cache::{write_atomically, ArtifactCache},
    cnf::Cnf,
    compiler::{self, Compilation, KEY_SKIPPED},
    dump::{is_reserved, CanonicalDump},
    engine::Manager,
    options::Options,
    order::{self, OrderingAlgorithm, VariableOrder},
    Result,
};

pub const KEY_SVO: &str = "svo";
pub const KEY_RUNTIME_SVO: &str = "runtime-svo";
pub const KEY_DVO: &str = "dvo";

/// Outcome of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct Report {
    /// Canonical dump of the compiled formula.
    pub dump_path: PathBuf,
    /// Whether the dump was reused instead of compiled.
    pub from_cache: bool,
    pub order: VariableOrder,
    pub skipped_clauses: usize,
    pub meta: BTreeMap<String, String>,
}

/// Drives every stage under one set of [`Options`].
pub struct Pipeline<'o> {
    options: &'o Options,
}

impl<'o> Pipeline<'o> {
    #[must_use]
    pub fn new(options: &'o Options) -> Pipeline<'o> {
        Pipeline { options }
    }

    fn cache(&self) -> Result<ArtifactCache> {
        ArtifactCache::open(&self.options.cache_dir)
    }

    fn caching_orders(&self) -> bool {
        self.options.use_cache && self.options.ordering != OrderingAlgorithm::Off
    }

    /// Choose the static order for `cnf` and permute its clauses if the
    /// ordering heuristic asks for it.
    #[instrument(skip_all, fields(ordering = %self.options.ordering))]
    pub fn order_for(&self, cnf: &mut Cnf) -> Result<VariableOrder> {
        let algorithm = self.options.ordering;
        let orderer = order::orderer(algorithm, self.options);
        let started = Instant::now();

        let stage = orderer.stage();
        let source = cnf
            .source()
            .filter(|_| self.caching_orders())
            .map(Path::to_path_buf);
        let cache = source.as_ref().map(|_| self.cache()).transpose()?;

        // A cached order for an earlier version of the input is a starting
        // point for orderers that refine one.
        let (cached, resume) = match (&source, &cache) {
            (Some(source), Some(cache)) if self.options.use_cached_order => {
                match cache.lookup_order(source, &stage, cnf.variable_count()) {
                    Some(order) => (Some(order), None),
                    None => (None, cache.stale_order(source, &stage, cnf.variable_count())),
                }
            }
            _ => (None, None),
        };

        let order = match cached {
            Some(order) => order,
            None => {
                if resume.is_some() {
                    info!(stage = %stage, "resuming from the order of an earlier input version");
                }
                let order = orderer.order(cnf, resume.as_ref())?;
                if let (Some(source), Some(cache)) = (&source, &cache) {
                    cache.store_order(source, &stage, &order)?;
                }
                order
            }
        };

        if orderer.reorders_clauses() {
            orderer.reorder_clauses(cnf, &order)?;
        }

        let elapsed = started.elapsed();
        info!(?elapsed, "static variable order ready");
        cnf.meta
            .insert(KEY_RUNTIME_SVO.to_owned(), format!("{:.6}", elapsed.as_secs_f64()));
        cnf.meta.insert(KEY_SVO.to_owned(), stage);
        Ok(order)
    }

    pub fn compile<'m>(
        &self,
        manager: &'m Manager,
        cnf: &Cnf,
        order: Option<&VariableOrder>,
    ) -> Result<Compilation<'m>> {
        compiler::compile(manager, cnf, order)
    }

    /// Write the canonical dump of `compilation` and return its path.
    #[instrument(skip_all, fields(engine = manager.stub()))]
    pub fn dump(
        &self,
        manager: &Manager,
        compilation: &Compilation<'_>,
        cnf: &Cnf,
    ) -> Result<PathBuf> {
        let mut dump = manager.canonical_dump(&compilation.diagram)?;
        let meta = cnf.meta.iter().chain(&compilation.meta);
        for (key, value) in meta.filter(|(key, _)| !is_reserved(key)) {
            dump.meta.insert(key.clone(), value.clone());
        }
        dump.meta
            .insert(KEY_DVO.to_owned(), self.options.dynamic_reorder.clone());

        let cache = self.cache()?;
        let engine = self.options.engine.stub();
        let dynamic_reorder = &self.options.dynamic_reorder;
        let path = match cnf.source() {
            Some(source) => cache.store_diagram(source, engine, dynamic_reorder, &dump)?,
            None => {
                let path = cache.diagram_path(Path::new("formula"), engine, dynamic_reorder);
                write_atomically(&path, dump.to_text().as_bytes())?;
                path
            }
        };

        info!(path = %path.display(), nodes = dump.node_count(), "wrote diagram");
        Ok(path)
    }

    /// Path of a valid cached diagram for `cnf`, unless cached results are ignored.
    #[must_use]
    pub fn cached_diagram(&self, cnf: &Cnf) -> Option<PathBuf> {
        if !(self.options.use_cache && self.options.use_cached_results) {
            return None;
        }
        let source = cnf.source()?;
        let cache = self
            .cache()
            .inspect_err(|err| warn!(%err, "cache directory unavailable"))
            .ok()?;
        cache.lookup_diagram(source, self.options.engine.stub(), &self.options.dynamic_reorder)
    }

    /// Compile the DIMACS file at `path` with the configured native engine.
    pub fn run(&self, path: impl AsRef<Path>) -> Result<Report> {
        self.run_with(path, |options| Manager::open(options.engine, options))
    }

    /// Like [`Pipeline::run`], with the engine supplied by `open_manager`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn run_with(
        &self,
        path: impl AsRef<Path>,
        open_manager: impl FnOnce(&Options) -> Result<Manager>,
    ) -> Result<Report> {
        let path = path.as_ref();
        let mut cnf = Cnf::from_path(path)?;
        let _lock = self.cache()?.lock(path)?;

        if let Some(dump_path) = self.cached_diagram(&cnf) {
            let dump = CanonicalDump::from_path(&dump_path)?;
            info!(path = %dump_path.display(), "reusing compiled diagram");
            return Ok(Report {
                dump_path,
                from_cache: true,
                skipped_clauses: dump
                    .meta
                    .get(KEY_SKIPPED)
                    .and_then(|skipped| skipped.parse().ok())
                    .unwrap_or_default(),
                order: dump.order,
                meta: dump.meta,
            });
        }

        let order = self.order_for(&mut cnf)?;

        let manager = open_manager(self.options)?;
        manager.declare_variables(cnf.variable_count())?;
        if !order.is_empty() {
            manager.set_order(&order)?;
        }
        manager.set_dynamic_reordering(&self.options.dynamic_reorder)?;

        let compilation = self.compile(&manager, &cnf, None)?;
        let dump_path = self.dump(&manager, &compilation, &cnf)?;

        let mut meta = cnf.meta.clone();
        meta.extend(compilation.meta.clone());
        Ok(Report {
            dump_path,
            from_cache: false,
            order,
            skipped_clauses: compilation.skipped_clauses,
            meta,
        })
    }
}
