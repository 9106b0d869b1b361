//! Static variable ordering.
//!
//! An [`Orderer`] turns a [`Cnf`] into a [`VariableOrder`] before compilation.
//! Compiled diagram size depends heavily on that order; the heuristics here
//! keep variables that share clauses close to each other.
pub mod dbo;
pub mod force;

use std::{fmt::Display, str::FromStr};

use clap::ValueEnum;
use tracing::debug;

use crate::{cnf::Clause, cnf::Cnf, options::Options, Error, Result};

/// A permutation of `1..=n`; the first variable is closest to the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableOrder(Vec<u32>);

impl VariableOrder {
    /// Validate that `order` is a bijection onto `{1, ..., order.len()}`.
    pub fn new(order: Vec<u32>) -> Result<VariableOrder> {
        let n = order.len();
        let mut seen = vec![false; n + 1];

        for &variable in &order {
            let idx = variable as usize;
            if idx == 0 || idx > n {
                return Err(Error::InvalidOrder(format!(
                    "variable {variable} is outside 1..={n}"
                )));
            }
            if seen[idx] {
                return Err(Error::InvalidOrder(format!(
                    "variable {variable} occurs more than once"
                )));
            }
            seen[idx] = true;
        }

        Ok(VariableOrder(order))
    }

    #[must_use]
    pub fn identity(variable_count: usize) -> VariableOrder {
        VariableOrder((1..=variable_count).map(to_variable).collect())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of every variable, indexed by its 1-based id (slot 0 is unused).
    #[must_use]
    pub fn positions(&self) -> Vec<usize> {
        let mut positions = vec![0; self.0.len() + 1];
        for (position, &variable) in self.0.iter().enumerate() {
            positions[variable as usize] = position;
        }
        positions
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl Display for VariableOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<_> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", ids.join(","))
    }
}

impl FromStr for VariableOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(VariableOrder(Vec::new()));
        }

        let order = s
            .split(',')
            .map(|id| {
                id.trim()
                    .parse::<u32>()
                    .map_err(|err| Error::InvalidOrder(format!("'{id}' is not a variable: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;
        VariableOrder::new(order)
    }
}

pub(crate) fn to_variable(idx: usize) -> u32 {
    u32::try_from(idx).unwrap_or(u32::MAX)
}

/// Distance between the furthest-apart variables of `clause` under `positions`.
#[must_use]
pub fn clause_span(clause: &Clause, positions: &[usize]) -> usize {
    let mut min_pos = usize::MAX;
    let mut max_pos = 0;
    for variable in clause.variables() {
        let position = positions[variable as usize];
        min_pos = min_pos.min(position);
        max_pos = max_pos.max(position);
    }

    max_pos.saturating_sub(min_pos)
}

/// Sum of all clause spans; the quantity FORCE minimizes.
#[must_use]
pub fn total_span(clauses: &[Clause], positions: &[usize]) -> usize {
    clauses
        .iter()
        .map(|clause| clause_span(clause, positions))
        .sum()
}

/// Sort clauses ascending by span per literal so tightly scoped clauses are
/// folded first. The sort is stable.
pub fn sort_clauses_by_span(cnf: &mut Cnf, order: &VariableOrder) {
    let positions = order.positions();
    let normalized: Vec<f64> = cnf
        .clauses()
        .iter()
        .map(|clause| {
            if clause.is_empty() {
                0.0
            } else {
                clause_span(clause, &positions) as f64 / clause.len() as f64
            }
        })
        .collect();

    let mut permutation: Vec<usize> = (0..normalized.len()).collect();
    permutation.sort_by(|&a, &b| normalized[a].total_cmp(&normalized[b]));
    cnf.reorder_clauses(&permutation);
}

/// Heuristic producing a static variable order.
pub trait Orderer {
    fn name(&self) -> &'static str;

    /// Key of the orders this orderer produces: its name plus any variant
    /// that changes the result.
    fn stage(&self) -> String {
        self.name().to_owned()
    }

    /// Compute an order, optionally refining `seed` instead of starting fresh.
    fn order(&self, cnf: &Cnf, seed: Option<&VariableOrder>) -> Result<VariableOrder>;

    /// Whether [`Orderer::reorder_clauses`] does anything.
    fn reorders_clauses(&self) -> bool {
        false
    }

    /// Permute the clauses of `cnf` to suit `order`.
    fn reorder_clauses(&self, _cnf: &mut Cnf, _order: &VariableOrder) -> Result<()> {
        Ok(())
    }
}

/// Registered ordering algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OrderingAlgorithm {
    /// Keep the default order `1, 2, ..., n`.
    Off,
    Force,
    ForceTriage,
    Dbo,
}

impl OrderingAlgorithm {
    #[must_use]
    pub fn stub(self) -> &'static str {
        match self {
            OrderingAlgorithm::Off => "off",
            OrderingAlgorithm::Force => "force",
            OrderingAlgorithm::ForceTriage => "force-triage",
            OrderingAlgorithm::Dbo => "dbo",
        }
    }

    /// Resolve a configuration string.
    pub fn from_stub(stub: &str) -> Result<OrderingAlgorithm> {
        OrderingAlgorithm::value_variants()
            .iter()
            .copied()
            .find(|algorithm| algorithm.stub().eq_ignore_ascii_case(stub.trim()))
            .ok_or_else(|| Error::UnsupportedOrderingAlgorithm(stub.to_owned()))
    }
}

impl Display for OrderingAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stub())
    }
}

/// The default order, unchanged.
pub struct Identity;

impl Orderer for Identity {
    fn name(&self) -> &'static str {
        "off"
    }

    fn order(&self, cnf: &Cnf, _seed: Option<&VariableOrder>) -> Result<VariableOrder> {
        Ok(cnf.default_order())
    }
}

/// Look up the orderer registered for `algorithm`.
#[must_use]
pub fn orderer(algorithm: OrderingAlgorithm, options: &Options) -> Box<dyn Orderer> {
    debug!(%algorithm, "selecting variable orderer");
    match algorithm {
        OrderingAlgorithm::Off => Box::new(Identity),
        OrderingAlgorithm::Force => Box::new(force::Force::new(options)),
        OrderingAlgorithm::ForceTriage => Box::new(force::ForceTriage::new(options)),
        OrderingAlgorithm::Dbo => Box::new(dbo::Dbo::new(options)),
    }
}

#[cfg(test)]
pub(crate) mod test {
    use pretty_assertions::assert_eq;
    use quickcheck::{Arbitrary, Gen};

    use super::{clause_span, sort_clauses_by_span, total_span, OrderingAlgorithm, VariableOrder};
    use crate::cnf::{Clause, Cnf, Literal};

    /// Random small CNF for property tests.
    #[derive(Debug, Clone)]
    pub(crate) struct RandomCnf(pub(crate) Cnf);

    impl Arbitrary for RandomCnf {
        fn arbitrary(g: &mut Gen) -> RandomCnf {
            let variables = (u32::arbitrary(g) % 12) + 1;
            let clause_count = (usize::arbitrary(g) % 16) + 1;
            let mut clauses = Vec::new();
            for _ in 0..clause_count {
                let clause_size = (usize::arbitrary(g) % 4) + 1;
                let literals: Vec<Literal> = (0..clause_size)
                    .map(|_| {
                        let variable = (u32::arbitrary(g) % variables) + 1;
                        if bool::arbitrary(g) {
                            Literal::positive(variable)
                        } else {
                            Literal::negative(variable)
                        }
                    })
                    .collect();
                clauses.push(Clause::new(literals));
            }
            RandomCnf(Cnf::new(variables as usize, clauses))
        }
    }

    pub(crate) fn is_bijective(order: &VariableOrder, n: usize) -> bool {
        let mut ids: Vec<u32> = order.iter().collect();
        ids.sort_unstable();
        ids == (1..=n).map(super::to_variable).collect::<Vec<_>>()
    }

    #[test]
    fn order_must_be_a_permutation() {
        assert!(VariableOrder::new(vec![2, 3, 1]).is_ok());
        assert!(VariableOrder::new(vec![1, 1, 2]).is_err());
        assert!(VariableOrder::new(vec![0, 1]).is_err());
        assert!(VariableOrder::new(vec![1, 4, 2]).is_err());
    }

    #[test]
    fn order_text_form() {
        let order: VariableOrder = "3, 1,2".parse().unwrap();
        assert_eq!(order.as_slice(), &[3, 1, 2]);
        assert_eq!(order.to_string(), "3,1,2");
        assert_eq!(order.positions(), vec![0, 1, 2, 0]);
        assert!("1,x".parse::<VariableOrder>().is_err());
    }

    #[test]
    fn span_is_max_minus_min_position() {
        let cnf = Cnf::new(3, vec![Clause::from(vec![1, -2]), Clause::from(vec![2, 3])]);
        let order = cnf.default_order();
        let positions = order.positions();

        assert_eq!(order.as_slice(), &[1, 2, 3]);
        assert_eq!(clause_span(&cnf.clauses()[0], &positions), 1);
        assert_eq!(clause_span(&cnf.clauses()[1], &positions), 1);
        assert_eq!(total_span(cnf.clauses(), &positions), 2);

        let reversed = VariableOrder::new(vec![3, 1, 2]).unwrap();
        let positions = reversed.positions();
        assert_eq!(clause_span(&Clause::from(vec![3, -2]), &positions), 2);
        assert_eq!(clause_span(&Clause::from(vec![1]), &positions), 0);
        assert_eq!(clause_span(&Clause::default(), &positions), 0);
    }

    #[test]
    fn clauses_sorted_by_normalized_span() {
        let mut cnf = Cnf::new(
            4,
            vec![
                Clause::from(vec![1, 4]),
                Clause::from(vec![2, 3]),
                Clause::from(vec![1, 2, 3, 4]),
            ],
        );
        sort_clauses_by_span(&mut cnf, &VariableOrder::identity(4));

        // Normalized spans are 3/2, 1/2 and 3/4.
        assert_eq!(
            cnf.clauses(),
            &[
                Clause::from(vec![2, 3]),
                Clause::from(vec![1, 2, 3, 4]),
                Clause::from(vec![1, 4]),
            ]
        );
    }

    #[test]
    fn algorithm_stubs() {
        assert_eq!(
            OrderingAlgorithm::from_stub("force-triage").unwrap(),
            OrderingAlgorithm::ForceTriage
        );
        assert_eq!(OrderingAlgorithm::from_stub("DBO").unwrap(), OrderingAlgorithm::Dbo);
        assert!(matches!(
            OrderingAlgorithm::from_stub("sifting"),
            Err(crate::Error::UnsupportedOrderingAlgorithm(stub)) if stub == "sifting"
        ));
    }
}
