//! Model counting and uniform sampling over canonical dumps.
use bitvec::prelude::*;
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::dump::{CanonicalDump, Edge, Samples, FALSE_ID, TRUE_ID};

/// Counts models of the sub-functions of one dump, memoised per node.
///
/// Every count ranges over all variables of the order, so a node's count is
/// the mean of its children's counts and a complement edge maps `c` to `2^n - c`.
pub struct ModelCounter<'a> {
    dump: &'a CanonicalDump,
    positions: Vec<usize>,
    max: BigUint,
    cache: FxHashMap<usize, BigUint>,
}

impl<'a> ModelCounter<'a> {
    #[must_use]
    pub fn new(dump: &'a CanonicalDump) -> ModelCounter<'a> {
        ModelCounter {
            dump,
            positions: dump.order.positions(),
            max: BigUint::one() << dump.variable_count(),
            cache: FxHashMap::default(),
        }
    }

    /// Models of the function `edge` points to.
    pub fn edge_count(&mut self, edge: Edge) -> BigUint {
        let count = self.node_count(edge.id);
        if edge.complemented {
            &self.max - count
        } else {
            count
        }
    }

    fn node_count(&mut self, id: usize) -> BigUint {
        match id {
            FALSE_ID => return BigUint::zero(),
            TRUE_ID => return self.max.clone(),
            _ => {}
        }

        if let Some(count) = self.cache.get(&id) {
            return count.clone();
        }

        // Dumps are validated on construction, so every id resolves.
        let Some(&node) = self.dump.node(id) else {
            return BigUint::zero();
        };

        let count = (self.edge_count(node.low) + self.edge_count(node.high)) >> 1_u32;
        self.cache.insert(id, count.clone());
        count
    }

    /// Level of the top variable of `edge`; terminals sit below every variable.
    fn level(&self, edge: Edge) -> usize {
        self.dump
            .node(edge.id)
            .map_or(self.dump.variable_count(), |node| {
                self.positions[node.variable as usize + 1]
            })
    }

    /// The satisfying assignment of lexicographic rank `rank`, where variables
    /// are compared in diagram order and `false < true`.
    ///
    /// The assignment is indexed by zero-based formula variable.
    pub fn unrank(&mut self, rank: &BigUint) -> Option<BitVec> {
        let n = self.dump.variable_count();
        let mut edge = self.dump.root;
        let mut rank = rank.clone();
        if rank >= self.edge_count(edge) {
            return None;
        }

        let mut assignment = bitvec![0; n];
        for (level, &variable) in self.dump.order.as_slice().iter().enumerate() {
            let divisor = BigUint::one() << (level + 1);
            let (low, high) = if self.level(edge) == level {
                let Some(&node) = self.dump.node(edge.id) else {
                    return None;
                };
                let flip = |child: Edge| Edge::new(child.complemented ^ edge.complemented, child.id);
                (flip(node.low), flip(node.high))
            } else {
                (edge, edge)
            };

            let low_models = self.edge_count(low) / &divisor;
            if rank < low_models {
                edge = low;
            } else {
                rank -= low_models;
                assignment.set(variable as usize - 1, true);
                edge = high;
            }
        }

        Some(assignment)
    }
}

/// Number of satisfying assignments over every variable of the order.
#[must_use]
pub fn count_models(dump: &CanonicalDump) -> BigUint {
    ModelCounter::new(dump).edge_count(dump.root)
}

/// Satisfying assignment of rank `rank`, or `None` past the last model.
#[must_use]
pub fn nth_model(dump: &CanonicalDump, rank: &BigUint) -> Option<BitVec> {
    ModelCounter::new(dump).unrank(rank)
}

/// Draw `k` satisfying assignments uniformly at random, with replacement.
pub fn sample(dump: &CanonicalDump, k: usize, rng: &mut impl Rng) -> Samples {
    let mut counter = ModelCounter::new(dump);
    let total = counter.edge_count(dump.root);
    let labels = (1..=dump.variable_count()).map(|v| format!("x{v}")).collect();

    if total.is_zero() {
        return Samples::new(Vec::new(), labels);
    }

    let models = (0..k)
        .filter_map(|_| counter.unrank(&rng.gen_biguint_below(&total)))
        .collect();
    Samples::new(models, labels)
}
