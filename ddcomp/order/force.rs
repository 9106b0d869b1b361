//! FORCE variable ordering.
//!
//! Aloul, Fadi A., Igor L. Markov, and Karem A. Sakallah. "FORCE: a fast
//! and easy-to-implement variable-ordering heuristic." Proceedings of the
//! 13th ACM Great Lakes symposium on VLSI. 2003.
use std::time::{Duration, Instant};

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use crate::{
    cnf::Cnf,
    options::Options,
    order::{sort_clauses_by_span, to_variable, total_span, Orderer, VariableOrder},
    Error, Result,
};

/// Outcome of one FORCE relaxation.
#[derive(Debug, Clone)]
pub struct ForceRun {
    pub order: VariableOrder,
    pub span: usize,
    /// Total span after every accepted iteration, starting with the initial order.
    pub history: Vec<usize>,
}

/// Relax `start` until the total span stops improving or `budget` runs out.
#[must_use]
pub fn force(cnf: &Cnf, budget: Duration, start: VariableOrder) -> ForceRun {
    let clauses = cnf.clauses();
    let started = Instant::now();

    let mut order = start.0;
    let mut positions = VariableOrder(order.clone()).positions();
    let mut span = total_span(clauses, &positions);
    let mut history = vec![span];

    while started.elapsed() < budget {
        // Running sum of clause centers of gravity and number of clauses, per variable.
        let mut pull: Vec<(f64, usize)> = vec![(0.0, 0); order.len() + 1];
        for clause in clauses.iter().filter(|clause| !clause.is_empty()) {
            let sum: usize = clause.variables().map(|v| positions[v as usize]).sum();
            let cog = sum as f64 / clause.len() as f64;
            for variable in clause.variables() {
                let (total, count) = &mut pull[variable as usize];
                *total += cog;
                *count += 1;
            }
        }

        // Variables in no clause stay where they are.
        let target = |variable: u32| match pull[variable as usize] {
            (_, 0) => positions[variable as usize] as f64,
            (total, count) => total / count as f64,
        };

        let mut next = order.clone();
        next.sort_by(|&a, &b| {
            target(a)
                .total_cmp(&target(b))
                .then(positions[a as usize].cmp(&positions[b as usize]))
        });

        let next_positions = VariableOrder(next.clone()).positions();
        let next_span = total_span(clauses, &next_positions);
        if next_span >= span {
            break;
        }

        order = next;
        positions = next_positions;
        span = next_span;
        history.push(span);
    }

    ForceRun {
        order: VariableOrder(order),
        span,
        history,
    }
}

/// Uniformly random permutation of `1..=n`.
pub fn shuffled(variable_count: usize, rng: &mut impl Rng) -> VariableOrder {
    let mut order: Vec<u32> = (1..=variable_count).map(to_variable).collect();
    order.shuffle(rng);
    VariableOrder(order)
}

fn check_seed(cnf: &Cnf, seed: &VariableOrder) -> Result<()> {
    if seed.len() == cnf.variable_count() {
        Ok(())
    } else {
        Err(Error::InvalidOrder(format!(
            "seed order has {} variables but the formula has {}",
            seed.len(),
            cnf.variable_count()
        )))
    }
}

/// Single FORCE run from a random (or supplied) order.
pub struct Force {
    budget: Duration,
    seed: Option<u64>,
}

impl Force {
    #[must_use]
    pub fn new(options: &Options) -> Force {
        Force {
            budget: options.force_budget,
            seed: options.seed,
        }
    }
}

impl Orderer for Force {
    fn name(&self) -> &'static str {
        "force"
    }

    #[instrument(skip_all, fields(variables = cnf.variable_count(), clauses = cnf.clauses().len()))]
    fn order(&self, cnf: &Cnf, seed: Option<&VariableOrder>) -> Result<VariableOrder> {
        let start = match seed {
            Some(seed) => {
                check_seed(cnf, seed)?;
                seed.clone()
            }
            None => {
                let mut rng = match self.seed {
                    Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                    None => ChaCha8Rng::from_entropy(),
                };
                shuffled(cnf.variable_count(), &mut rng)
            }
        };

        let run = force(cnf, self.budget, start);
        info!(
            span = run.span,
            iterations = run.history.len() - 1,
            "FORCE finished"
        );
        Ok(run.order)
    }

    fn reorders_clauses(&self) -> bool {
        true
    }

    fn reorder_clauses(&self, cnf: &mut Cnf, order: &VariableOrder) -> Result<()> {
        sort_clauses_by_span(cnf, order);
        Ok(())
    }
}

/// FORCE over a population of random seeds, repeatedly discarding seeds whose
/// span is above the population average and refining the rest.
pub struct ForceTriage {
    seeds: usize,
    seed_budget: Duration,
    refine_budget: Duration,
    seed: Option<u64>,
}

impl ForceTriage {
    #[must_use]
    pub fn new(options: &Options) -> ForceTriage {
        ForceTriage {
            seeds: options.triage_seeds.max(1),
            seed_budget: options.triage_seed_budget,
            refine_budget: options.triage_refine_budget,
            seed: options.seed,
        }
    }

    /// Evaluate every seed; seeds are independent so they run on the rayon pool.
    fn seed_population(&self, cnf: &Cnf, first: Option<&VariableOrder>) -> Vec<ForceRun> {
        let base = self.seed.unwrap_or_else(rand::random);
        (0..self.seeds)
            .into_par_iter()
            .map(|idx| {
                let start = match (idx, first) {
                    (0, Some(first)) => first.clone(),
                    _ => {
                        let mut rng = ChaCha8Rng::seed_from_u64(base.wrapping_add(idx as u64));
                        shuffled(cnf.variable_count(), &mut rng)
                    }
                };
                let run = force(cnf, self.seed_budget, start);
                debug!(seed = idx, span = run.span, "seeded");
                run
            })
            .collect()
    }
}

impl Orderer for ForceTriage {
    fn name(&self) -> &'static str {
        "force-triage"
    }

    #[instrument(skip_all, fields(seeds = self.seeds, variables = cnf.variable_count()))]
    fn order(&self, cnf: &Cnf, seed: Option<&VariableOrder>) -> Result<VariableOrder> {
        if let Some(seed) = seed {
            check_seed(cnf, seed)?;
        }

        let mut population = self.seed_population(cnf, seed);
        let mut round = 0;

        loop {
            let mean =
                population.iter().map(|run| run.span as f64).sum::<f64>() / population.len() as f64;
            let before = population.len();
            population.retain(|run| run.span as f64 <= mean);

            debug!(round, mean, kept = population.len(), of = before, "triage");
            if population.len() == before {
                break;
            }

            round += 1;
            population = population
                .into_par_iter()
                .map(|run| force(cnf, self.refine_budget, run.order))
                .collect();
        }

        let best = population
            .into_iter()
            .reduce(|best, run| if run.span < best.span { run } else { best })
            .map_or_else(|| cnf.default_order(), |run| {
                info!(span = run.span, rounds = round, "FORCE triage finished");
                run.order
            });

        Ok(best)
    }

    fn reorders_clauses(&self) -> bool {
        true
    }

    fn reorder_clauses(&self, cnf: &mut Cnf, order: &VariableOrder) -> Result<()> {
        sort_clauses_by_span(cnf, order);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use quickcheck::quickcheck;

    use super::{force, ForceTriage};
    use crate::{
        cnf::{Clause, Cnf},
        options::Options,
        order::{
            test::{is_bijective, RandomCnf},
            total_span, Orderer, VariableOrder,
        },
    };

    const BUDGET: Duration = Duration::from_millis(200);

    #[test]
    fn pulls_clause_partners_together() {
        let cnf = Cnf::new(4, vec![Clause::from(vec![1, 3]), Clause::from(vec![2, -4])]);
        let run = force(&cnf, BUDGET, VariableOrder::identity(4));

        assert_eq!(run.history, vec![4, 2]);
        assert_eq!(run.order.as_slice(), &[1, 3, 2, 4]);
        assert_eq!(run.span, 2);
    }

    #[test]
    fn fixed_point_terminates_immediately() {
        let chain = Cnf::new(
            5,
            vec![
                Clause::from(vec![1, 2]),
                Clause::from(vec![2, 3]),
                Clause::from(vec![3, 4]),
                Clause::from(vec![4, 5]),
            ],
        );
        let run = force(&chain, BUDGET, VariableOrder::identity(5));
        assert_eq!(run.history, vec![4]);
        assert_eq!(run.order, VariableOrder::identity(5));
    }

    #[test]
    fn zero_budget_returns_start() {
        let cnf = Cnf::new(4, vec![Clause::from(vec![1, 3]), Clause::from(vec![2, 4])]);
        let start = VariableOrder::new(vec![4, 2, 3, 1]).unwrap();
        let run = force(&cnf, Duration::ZERO, start.clone());
        assert_eq!(run.order, start);
    }

    #[test]
    fn triage_is_reproducible() {
        let options = Options::builder()
            .seed(7)
            .triage_seeds(8)
            .triage_seed_budget(BUDGET)
            .triage_refine_budget(BUDGET)
            .build();
        let cnf = Cnf::new(
            6,
            vec![
                Clause::from(vec![1, 6]),
                Clause::from(vec![2, -5]),
                Clause::from(vec![3, 4, -6]),
                Clause::from(vec![1, -4]),
            ],
        );

        let triage = ForceTriage::new(&options);
        let first = triage.order(&cnf, None).unwrap();
        let second = triage.order(&cnf, None).unwrap();

        assert!(is_bijective(&first, 6));
        assert_eq!(first, second);
    }

    #[test]
    fn seed_order_must_match_formula() {
        let options = Options::builder().build();
        let cnf = Cnf::new(3, vec![Clause::from(vec![1, 2, 3])]);
        let seed = VariableOrder::identity(2);
        assert!(super::Force::new(&options).order(&cnf, Some(&seed)).is_err());
    }

    quickcheck! {
        fn span_never_increases(cnf: RandomCnf, seed: u64) -> bool {
            use rand::SeedableRng;
            let cnf = cnf.0;
            let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
            let start = super::shuffled(cnf.variable_count(), &mut rng);
            let run = force(&cnf, BUDGET, start);

            run.history.windows(2).all(|pair| pair[1] <= pair[0])
                && run.span == total_span(cnf.clauses(), &run.order.positions())
        }

        fn force_orders_are_permutations(cnf: RandomCnf, seed: u64) -> bool {
            let cnf = cnf.0;
            let options = Options::builder().seed(seed).force_budget(BUDGET).build();
            let order = super::Force::new(&options).order(&cnf, None).unwrap();
            is_bijective(&order, cnf.variable_count())
        }
    }
}
