//! In-process ROBDD engine standing in for the native libraries in tests.
//!
//! It speaks the BuDDy save format, so diagrams built here go through the
//! same translation path as native ones.
use std::{
    cell::{Cell, RefCell},
    fmt::Write as _,
    rc::Rc,
    thread,
    time::Duration,
};

use rustc_hash::FxHashMap;

use crate::{
    dump::native::NativeFormat,
    engine::{BinaryOp, Capabilities, Engine, NativeDump, NegationCost, NodeRef},
    Error, Result,
};

const FALSE: usize = 0;
const TRUE: usize = 1;

static DVO: [(&str, i32); 1] = [("lib-default", 1)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Node {
    variable: u32,
    low: usize,
    high: usize,
}

#[derive(Default)]
struct Table {
    /// Index `i` holds node `i + 2`.
    nodes: Vec<Node>,
    unique: FxHashMap<Node, usize>,
    /// `order[level]` is the variable at `level`.
    order: Vec<u32>,
    /// Inverse of `order`.
    levels: Vec<usize>,
}

impl Table {
    fn node(&self, id: usize) -> Node {
        self.nodes[id - 2]
    }

    fn level(&self, id: usize) -> usize {
        if id <= TRUE {
            usize::MAX
        } else {
            self.levels[self.node(id).variable as usize]
        }
    }

    fn mk(&mut self, variable: u32, low: usize, high: usize) -> usize {
        if low == high {
            return low;
        }
        let node = Node {
            variable,
            low,
            high,
        };
        if let Some(&id) = self.unique.get(&node) {
            return id;
        }
        let id = self.nodes.len() + 2;
        self.nodes.push(node);
        self.unique.insert(node, id);
        id
    }

    fn cofactors(&self, id: usize, level: usize) -> (usize, usize) {
        if self.level(id) == level {
            let node = self.node(id);
            (node.low, node.high)
        } else {
            (id, id)
        }
    }

    fn apply(
        &mut self,
        op: BinaryOp,
        lhs: usize,
        rhs: usize,
        memo: &mut FxHashMap<(usize, usize), usize>,
    ) -> usize {
        if lhs <= TRUE && rhs <= TRUE {
            let (a, b) = (lhs == TRUE, rhs == TRUE);
            let value = match op {
                BinaryOp::And => a && b,
                BinaryOp::Or => a || b,
                BinaryOp::Xor => a != b,
            };
            return usize::from(value);
        }
        if let Some(&id) = memo.get(&(lhs, rhs)) {
            return id;
        }

        let level = self.level(lhs).min(self.level(rhs));
        let variable = self.order[level];
        let (lhs_low, lhs_high) = self.cofactors(lhs, level);
        let (rhs_low, rhs_high) = self.cofactors(rhs, level);
        let low = self.apply(op, lhs_low, rhs_low, memo);
        let high = self.apply(op, lhs_high, rhs_high, memo);
        let id = self.mk(variable, low, high);
        memo.insert((lhs, rhs), id);
        id
    }

    fn not(&mut self, id: usize, memo: &mut FxHashMap<usize, usize>) -> usize {
        if id <= TRUE {
            return id ^ 1;
        }
        if let Some(&negated) = memo.get(&id) {
            return negated;
        }
        let node = self.node(id);
        let low = self.not(node.low, memo);
        let high = self.not(node.high, memo);
        let negated = self.mk(node.variable, low, high);
        memo.insert(id, negated);
        negated
    }

    fn post_order(&self, id: usize, seen: &mut Vec<bool>, out: &mut Vec<usize>) {
        if id <= TRUE || seen[id - 2] {
            return;
        }
        seen[id - 2] = true;
        let node = self.node(id);
        self.post_order(node.low, seen, out);
        self.post_order(node.high, seen, out);
        out.push(id);
    }
}

pub(crate) struct ReferenceEngine {
    table: RefCell<Table>,
    live: Rc<Cell<usize>>,
    delay: Cell<Duration>,
    applies: Cell<usize>,
    fail_at: Cell<Option<usize>>,
    reordering: Cell<bool>,
}

impl ReferenceEngine {
    pub(crate) fn new() -> ReferenceEngine {
        ReferenceEngine {
            table: RefCell::new(Table::default()),
            live: Rc::new(Cell::new(0)),
            delay: Cell::new(Duration::ZERO),
            applies: Cell::new(0),
            fail_at: Cell::new(None),
            reordering: Cell::new(false),
        }
    }

    /// Shared counter of references handed out and not yet released.
    pub(crate) fn live_references(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.live)
    }

    /// Make every binary operation sleep for `delay` first.
    pub(crate) fn delay_applies(&self, delay: Duration) {
        self.delay.set(delay);
    }

    /// Make the `n`th binary operation (counting from 1) time out.
    pub(crate) fn fail_apply(&self, n: usize) {
        self.fail_at.set(Some(n));
    }

    fn handed_out(&self, id: usize) -> NodeRef {
        self.live.set(self.live.get() + 1);
        NodeRef(id)
    }

    fn variable_count(&self) -> usize {
        self.table.borrow().order.len()
    }

    fn check_variable(&self, variable: u32) -> Result<()> {
        if (variable as usize) < self.variable_count() {
            Ok(())
        } else {
            Err(Error::Engine {
                engine: "reference",
                message: format!("variable {variable} was never declared"),
            })
        }
    }
}

impl Engine for ReferenceEngine {
    fn name(&self) -> &'static str {
        "reference ROBDD"
    }

    fn stub(&self) -> &'static str {
        "reference"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            zero_based_indices: true,
            requires_variable_advertisement: true,
            negation: NegationCost::Rebuild,
            dynamic_reorder_algorithms: &DVO,
        }
    }

    fn zero(&self) -> Result<NodeRef> {
        Ok(self.handed_out(FALSE))
    }

    fn one(&self) -> Result<NodeRef> {
        Ok(self.handed_out(TRUE))
    }

    fn ithvar(&self, variable: u32) -> Result<NodeRef> {
        self.check_variable(variable)?;
        let id = self.table.borrow_mut().mk(variable, FALSE, TRUE);
        Ok(self.handed_out(id))
    }

    fn not(&self, node: NodeRef) -> Result<NodeRef> {
        let id = self
            .table
            .borrow_mut()
            .not(node.0, &mut FxHashMap::default());
        Ok(self.handed_out(id))
    }

    fn apply(
        &self,
        op: BinaryOp,
        lhs: NodeRef,
        rhs: NodeRef,
        limit: Option<Duration>,
    ) -> Result<NodeRef> {
        let call = self.applies.get() + 1;
        self.applies.set(call);
        if self.fail_at.get() == Some(call) {
            return Err(Error::OperationTimeout {
                elapsed: limit.unwrap_or_default(),
                bound: limit.unwrap_or_default(),
            });
        }

        let delay = self.delay.get();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let id = self
            .table
            .borrow_mut()
            .apply(op, lhs.0, rhs.0, &mut FxHashMap::default());
        Ok(self.handed_out(id))
    }

    fn release(&self, _node: NodeRef) {
        self.live.set(self.live.get().saturating_sub(1));
    }

    fn set_variable_count(&self, count: usize) -> Result<()> {
        let mut table = self.table.borrow_mut();
        let declared = table.order.len();
        if count > declared {
            let added = u32::try_from(declared).unwrap_or(u32::MAX)..;
            table.order.extend(added.take(count - declared));
            table.levels.extend(declared..count);
        }
        Ok(())
    }

    fn set_order(&self, order: &[u32]) -> Result<()> {
        let mut table = self.table.borrow_mut();
        if !table.nodes.is_empty() {
            return Err(Error::Engine {
                engine: "reference",
                message: "the order must be set before any node is built".to_owned(),
            });
        }
        if order.len() != table.order.len() {
            return Err(Error::InvalidOrder(format!(
                "order has {} variables but {} are declared",
                order.len(),
                table.order.len()
            )));
        }

        for (level, &variable) in order.iter().enumerate() {
            table.levels[variable as usize] = level;
        }
        table.order = order.to_vec();
        Ok(())
    }

    fn enable_dynamic_reordering(&self, _algorithm: i32) -> Result<()> {
        self.reordering.set(true);
        Ok(())
    }

    fn disable_dynamic_reordering(&self) -> Result<()> {
        self.reordering.set(false);
        Ok(())
    }

    fn dump(&self, root: NodeRef) -> Result<NativeDump> {
        let table = self.table.borrow();
        let mut text = String::new();

        if root.0 <= TRUE {
            let _ = writeln!(text, "0 0 {}", root.0);
        } else {
            let mut nodes = Vec::new();
            table.post_order(root.0, &mut vec![false; table.nodes.len()], &mut nodes);

            let _ = writeln!(text, "{} {}", nodes.len(), table.order.len());
            let levels: Vec<String> = table.levels.iter().map(ToString::to_string).collect();
            let _ = writeln!(text, "{}", levels.join(" "));
            for id in nodes {
                let node = table.node(id);
                let _ = writeln!(text, "{id} {} {} {}", node.variable, node.low, node.high);
            }
        }

        Ok(NativeDump {
            format: NativeFormat::Buddy,
            text,
            order: table.order.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::ReferenceEngine;
    use crate::engine::{BinaryOp, Engine};

    #[test]
    fn dumps_in_buddy_layout() {
        let engine = ReferenceEngine::new();
        engine.set_variable_count(2).unwrap();
        engine.set_order(&[1, 0]).unwrap();

        let a = engine.ithvar(0).unwrap();
        let b = engine.ithvar(1).unwrap();
        let both = engine.apply(BinaryOp::And, a, b, None).unwrap();
        let dump = engine.dump(both).unwrap();

        assert_eq!(dump.order, vec![1, 0]);
        assert_eq!(dump.text, "2 2\n1 0\n2 0 0 1\n4 1 0 2\n");
    }

    #[test]
    fn negation_is_an_involution() {
        let engine = ReferenceEngine::new();
        engine.set_variable_count(1).unwrap();
        let a = engine.ithvar(0).unwrap();
        let not_a = engine.not(a).unwrap();
        assert_eq!(engine.not(not_a).unwrap(), a);
        assert_eq!(engine.live_references().get(), 3);
    }

    #[test]
    fn undeclared_variables_are_rejected() {
        let engine = ReferenceEngine::new();
        assert!(engine.ithvar(0).is_err());
    }
}
