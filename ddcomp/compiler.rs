//! Clause-by-clause compilation of a CNF into one diagram.
use std::{collections::BTreeMap, time::Instant};

use tracing::{debug, info, instrument, warn};

use crate::{
    cnf::{Clause, Cnf},
    engine::{BinaryOp, Diagram, Manager},
    order::VariableOrder,
    Error, Result,
};

pub const KEY_RUNTIME: &str = "runtime-compilation";
pub const KEY_SKIPPED: &str = "skipped-clauses";
pub const KEY_CLAUSES: &str = "clause-count";

/// Result of folding a CNF into a diagram.
#[derive(Debug)]
pub struct Compilation<'m> {
    pub diagram: Diagram<'m>,
    pub meta: BTreeMap<String, String>,
    /// Clauses abandoned because one of their operations timed out. The
    /// diagram does not constrain them.
    pub skipped_clauses: usize,
}

/// Compile `cnf` under `order`, or under the engine's initial order if none is given.
///
/// The accumulator starts as the constant `true`. Every clause is built as an
/// OR over its literals and then conjoined into the accumulator. A clause
/// whose construction hits [`Error::OperationTimeout`] is skipped and logged;
/// the accumulator from before it is kept. Any other error aborts.
#[instrument(skip_all, fields(engine = manager.stub(), clauses = cnf.clauses().len()))]
pub fn compile<'m>(
    manager: &'m Manager,
    cnf: &Cnf,
    order: Option<&VariableOrder>,
) -> Result<Compilation<'m>> {
    manager.declare_variables(cnf.variable_count())?;

    if let Some(order) = order {
        if order.len() != cnf.variable_count() {
            return Err(Error::InvalidOrder(format!(
                "order covers {} variables, formula has {}",
                order.len(),
                cnf.variable_count()
            )));
        }
        if !order.is_empty() {
            manager.set_order(order)?;
        }
    }

    let started = Instant::now();
    let mut accumulator = manager.one()?;
    let mut skipped_clauses = 0;

    for (idx, clause) in cnf.clauses().iter().enumerate() {
        let conjoined = clause_diagram(manager, clause)
            .and_then(|clause| manager.apply_retaining(BinaryOp::And, &accumulator, &clause));

        match conjoined {
            Ok(next) => accumulator = next,
            Err(err) if err.is_recoverable() => {
                warn!(clause = idx, %clause, %err, "skipping clause");
                skipped_clauses += 1;
            }
            Err(err) => return Err(err),
        }

        if (idx + 1) % 1000 == 0 {
            debug!(done = idx + 1, "compiled clauses");
        }
    }

    let elapsed = started.elapsed();
    info!(?elapsed, skipped_clauses, "compiled formula");

    let mut meta = BTreeMap::new();
    meta.insert(KEY_RUNTIME.to_owned(), format!("{:.6}", elapsed.as_secs_f64()));
    meta.insert(KEY_SKIPPED.to_owned(), skipped_clauses.to_string());
    meta.insert(KEY_CLAUSES.to_owned(), cnf.clauses().len().to_string());

    Ok(Compilation {
        diagram: accumulator,
        meta,
        skipped_clauses,
    })
}

/// OR of the literals of `clause`, starting from `false`.
fn clause_diagram<'m>(manager: &'m Manager, clause: &Clause) -> Result<Diagram<'m>> {
    clause
        .literals()
        .iter()
        .try_fold(manager.zero()?, |disjunction, &literal| {
            manager.or(disjunction, manager.literal(literal)?)
        })
}

#[cfg(test)]
mod test {
    use num_bigint::BigUint;
    use pretty_assertions::assert_eq;
    use quickcheck::quickcheck;

    use super::{compile, KEY_CLAUSES, KEY_SKIPPED};
    use crate::{
        cnf::{Clause, Cnf},
        dump::count_models,
        engine::{reference::ReferenceEngine, Manager},
        order::{test::RandomCnf, VariableOrder},
    };

    fn example() -> Cnf {
        Cnf::new(3, vec![Clause::from(vec![1, -2]), Clause::from(vec![2, 3])])
    }

    fn manager() -> Manager {
        Manager::new(Box::new(ReferenceEngine::new()), None)
    }

    fn models(cnf: &Cnf, order: Option<&VariableOrder>) -> BigUint {
        let manager = manager();
        let compilation = compile(&manager, cnf, order).unwrap();
        count_models(&manager.canonical_dump(&compilation.diagram).unwrap())
    }

    fn brute_force(cnf: &Cnf) -> BigUint {
        let n = cnf.variable_count();
        let satisfying = (0_u64..1 << n)
            .filter(|bits| {
                let assignment: Vec<bool> = (0..n).map(|i| (bits >> i) & 1 == 1).collect();
                cnf.eval(&assignment)
            })
            .count();
        BigUint::from(satisfying)
    }

    #[test]
    fn example_has_four_models() {
        let cnf = example();
        let manager = manager();
        let compilation = compile(&manager, &cnf, None).unwrap();

        assert_eq!(compilation.skipped_clauses, 0);
        assert_eq!(compilation.meta[KEY_CLAUSES], "2");
        assert_eq!(compilation.meta[KEY_SKIPPED], "0");
        assert_eq!(
            count_models(&manager.canonical_dump(&compilation.diagram).unwrap()),
            BigUint::from(4_u32)
        );
    }

    #[test]
    fn clause_order_does_not_change_the_function() {
        let mut swapped = example();
        swapped.reorder_clauses(&[1, 0]);
        assert_eq!(models(&example(), None), models(&swapped, None));
    }

    #[test]
    fn explicit_order_reaches_the_engine() {
        let cnf = example();
        let order = VariableOrder::new(vec![3, 1, 2]).unwrap();
        let manager = manager();
        let compilation = compile(&manager, &cnf, Some(&order)).unwrap();
        let dump = manager.canonical_dump(&compilation.diagram).unwrap();

        assert_eq!(dump.order, order);
        assert_eq!(count_models(&dump), BigUint::from(4_u32));
    }

    #[test]
    fn order_of_wrong_length_is_rejected() {
        let order = VariableOrder::identity(2);
        assert!(compile(&manager(), &example(), Some(&order)).is_err());
    }

    #[test]
    fn empty_clause_is_unsatisfiable() {
        let cnf = Cnf::new(2, vec![Clause::from(vec![1, 2]), Clause::new(Vec::new())]);
        assert_eq!(models(&cnf, None), BigUint::from(0_u32));
    }

    #[test]
    fn timed_out_clause_is_skipped() {
        let engine = ReferenceEngine::new();
        // Two ORs and one AND per two-literal clause: the sixth apply is the
        // AND of the second clause.
        engine.fail_apply(6);
        let live = engine.live_references();
        let manager = Manager::new(Box::new(engine), None);

        {
            let compilation = compile(&manager, &example(), None).unwrap();
            assert_eq!(compilation.skipped_clauses, 1);
            assert_eq!(compilation.meta[KEY_SKIPPED], "1");

            // Only x1 ∨ ¬x2 remains: 3 of 4 assignments, doubled by the free x3.
            let dump = manager.canonical_dump(&compilation.diagram).unwrap();
            assert_eq!(count_models(&dump), BigUint::from(6_u32));
        }
        assert_eq!(live.get(), 0);
    }

    quickcheck! {
        fn count_matches_brute_force(cnf: RandomCnf) -> bool {
            models(&cnf.0, None) == brute_force(&cnf.0)
        }
    }
}
