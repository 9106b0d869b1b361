//! In-memory CNF: clauses over 1-based variables plus the metadata that travels
//! with them through ordering, compilation, and dumping.
mod literal;

pub mod dimacs;

pub use crate::cnf::literal::*;

use std::{
    collections::BTreeMap,
    fmt::Display,
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use md5::{Digest, Md5};
use tracing::{instrument, warn};

use crate::{order::VariableOrder, Error, Result};

/// Disjunction of distinct literals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Clause {
    literals: Vec<Literal>,
}

impl Clause {
    /// Create a clause, keeping only the first occurrence of repeated literals.
    #[must_use]
    pub fn new(literals: impl IntoIterator<Item = Literal>) -> Clause {
        let mut distinct: Vec<Literal> = Vec::new();
        for literal in literals {
            if !distinct.contains(&literal) {
                distinct.push(literal);
            }
        }
        Clause { literals: distinct }
    }

    /// A clause containing both `k` and `¬k` is satisfied by every assignment.
    #[must_use]
    pub fn is_tautology(&self) -> bool {
        self.literals
            .iter()
            .any(|lit| self.literals.contains(&!*lit))
    }

    #[must_use]
    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    pub fn variables(&self) -> impl Iterator<Item = u32> + '_ {
        self.literals.iter().map(|lit| lit.variable())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.literals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    #[must_use]
    pub fn eval(&self, assignment: &[bool]) -> bool {
        self.literals.iter().any(|lit| {
            let value = assignment[lit.variable() as usize - 1];
            value != lit.is_negated()
        })
    }
}

impl From<Vec<i32>> for Clause {
    fn from(literals: Vec<i32>) -> Self {
        Clause::new(literals.into_iter().map(Literal::new))
    }
}

impl Display for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let literals: Vec<_> = self.literals.iter().map(ToString::to_string).collect();
        write!(f, "({})", literals.join(" ∨ "))
    }
}

/// Conjunction of clauses over variables `1..=variable_count`.
///
/// The clause sequence may be permuted by ordering passes; it is never touched
/// once compilation starts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cnf {
    clauses: Vec<Clause>,
    variable_count: usize,
    descriptions: BTreeMap<u32, String>,
    pub meta: BTreeMap<String, String>,
    source: Option<PathBuf>,
}

impl Cnf {
    /// Build a CNF, dropping tautological clauses and widening `variable_count`
    /// if a literal refers past it.
    #[must_use]
    pub fn new(variable_count: usize, clauses: impl IntoIterator<Item = Clause>) -> Cnf {
        let mut variable_count = variable_count;
        let mut kept = Vec::new();
        let mut tautologies = 0_usize;

        for (idx, clause) in clauses.into_iter().enumerate() {
            if clause.is_tautology() {
                warn!(clause = idx, %clause, "dropping tautological clause");
                tautologies += 1;
                continue;
            }

            if clause.is_empty() {
                warn!(clause = idx, "empty clause makes the formula unsatisfiable");
            }

            if let Some(max) = clause.variables().max() {
                if max as usize > variable_count {
                    warn!(
                        clause = idx,
                        declared = variable_count,
                        found = max,
                        "literal exceeds declared variable count"
                    );
                    variable_count = max as usize;
                }
            }

            kept.push(clause);
        }

        let mut meta = BTreeMap::new();
        if tautologies > 0 {
            meta.insert("dropped-tautologies".to_owned(), tautologies.to_string());
        }

        Cnf {
            clauses: kept,
            variable_count,
            descriptions: BTreeMap::new(),
            meta,
            source: None,
        }
    }

    /// Parse a DIMACS file and remember where it came from and what it hashed to.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_path(path: impl AsRef<Path>) -> Result<Cnf> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| Error::io(path, err))?;
        let mut reader = BufReader::new(file);
        let mut cnf = dimacs::read(&mut reader)?;

        cnf.meta
            .insert("input-name".to_owned(), path.display().to_string());
        cnf.meta.insert("input-hash".to_owned(), hash_file(path)?);
        cnf.source = Some(path.to_owned());
        Ok(cnf)
    }

    #[must_use]
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Replace the clause sequence with a permutation of itself.
    pub(crate) fn reorder_clauses(&mut self, permutation: &[usize]) {
        debug_assert_eq!(permutation.len(), self.clauses.len());
        let mut slots: Vec<Option<Clause>> = self.clauses.drain(..).map(Some).collect();
        self.clauses = permutation
            .iter()
            .filter_map(|&idx| slots[idx].take())
            .collect();
    }

    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.variable_count
    }

    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn description(&self, variable: u32) -> Option<&str> {
        self.descriptions.get(&variable).map(String::as_str)
    }

    pub(crate) fn set_descriptions(&mut self, descriptions: BTreeMap<u32, String>) {
        self.descriptions = descriptions;
    }

    /// Name of a variable for human consumption: its description or `x<id>`.
    #[must_use]
    pub fn label(&self, variable: u32) -> String {
        self.description(variable)
            .map_or_else(|| format!("x{variable}"), ToOwned::to_owned)
    }

    /// The order `1, 2, ..., n`.
    #[must_use]
    pub fn default_order(&self) -> VariableOrder {
        VariableOrder::identity(self.variable_count)
    }

    /// Evaluate the formula under `assignment`, indexed by `variable - 1`.
    ///
    /// # Panics
    ///
    /// Panics if `assignment` is shorter than `variable_count`.
    #[must_use]
    pub fn eval(&self, assignment: &[bool]) -> bool {
        assert!(assignment.len() >= self.variable_count);
        self.clauses.iter().all(|clause| clause.eval(assignment))
    }

    /// Render the formula with variable descriptions in place of ids.
    #[must_use]
    pub fn verbose(&self) -> String {
        self.clauses
            .iter()
            .map(|clause| {
                let literals: Vec<_> = clause
                    .literals()
                    .iter()
                    .map(|lit| {
                        let negation = if lit.is_negated() { "¬" } else { "" };
                        format!("{negation}{}", self.label(lit.variable()))
                    })
                    .collect();
                format!("({})", literals.join(" ∨ "))
            })
            .collect::<Vec<_>>()
            .join(" ∧ ")
    }
}

impl Display for Cnf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clauses: Vec<_> = self.clauses.iter().map(ToString::to_string).collect();
        write!(f, "{}", clauses.join(" ∧ "))
    }
}

/// Hex MD5 of the file contents, read in 8 KiB chunks.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|err| Error::io(path, err))?;
    let mut hasher = Md5::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file.read(&mut buffer).map_err(|err| Error::io(path, err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}
