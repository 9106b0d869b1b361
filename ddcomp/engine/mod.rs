//! Capability interface over native decision-diagram engines.
//!
//! An [`Engine`] is a thin binding to one native library. The [`Manager`]
//! wraps it with everything the compiler relies on: variable id translation,
//! dynamic reordering stubs, the per-operation watchdog, and scoped
//! [`Diagram`] handles that release their native reference when dropped.
pub mod buddy;
pub mod cudd;
mod native;
#[cfg(test)]
pub(crate) mod reference;

use std::{
    fmt::Display,
    time::{Duration, Instant},
};

use tracing::{debug, instrument, warn};

use crate::{
    cnf::Literal,
    dump::{native::NativeFormat, CanonicalDump, DumpNode},
    options::{EngineKind, Options},
    order::VariableOrder,
    Error, Result,
};

/// Opaque reference into an engine's node space. Owning one means owning one
/// native reference count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(pub usize);

/// Cost of negating a diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegationCost {
    /// O(1): flip a complement bit.
    ComplementEdge,
    /// Negation rebuilds the diagram.
    Rebuild,
}

/// What an engine needs from, and offers to, its caller.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Engine variable `0` is formula variable `1`.
    pub zero_based_indices: bool,
    /// The variable count must be declared before any variable is used.
    pub requires_variable_advertisement: bool,
    pub negation: NegationCost,
    /// Dynamic reordering stubs and the engine's id for each.
    pub dynamic_reorder_algorithms: &'static [(&'static str, i32)],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Xor,
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryOp::And => write!(f, "AND"),
            BinaryOp::Or => write!(f, "OR"),
            BinaryOp::Xor => write!(f, "XOR"),
        }
    }
}

/// Native dump of one diagram.
#[derive(Debug, Clone)]
pub struct NativeDump {
    pub format: NativeFormat,
    pub text: String,
    /// Engine variables from the top level down.
    pub order: Vec<u32>,
}

/// Binding to a native engine.
///
/// Every returned [`NodeRef`] carries one reference that the caller gives back
/// with [`Engine::release`]. Operands are never consumed at this level.
/// Variables are in the engine's own numbering.
pub trait Engine {
    /// Human readable name and version.
    fn name(&self) -> &'static str;

    fn stub(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn zero(&self) -> Result<NodeRef>;

    fn one(&self) -> Result<NodeRef>;

    fn ithvar(&self, variable: u32) -> Result<NodeRef>;

    fn nithvar(&self, variable: u32) -> Result<NodeRef> {
        let positive = self.ithvar(variable)?;
        let negative = self.not(positive);
        self.release(positive);
        negative
    }

    fn not(&self, node: NodeRef) -> Result<NodeRef>;

    /// Apply `op`. `limit` is a hint for engines with a cooperative time limit;
    /// the [`Manager`] enforces the bound either way.
    fn apply(
        &self,
        op: BinaryOp,
        lhs: NodeRef,
        rhs: NodeRef,
        limit: Option<Duration>,
    ) -> Result<NodeRef>;

    fn release(&self, node: NodeRef);

    fn set_variable_count(&self, count: usize) -> Result<()>;

    /// `order[level]` is the engine variable placed at `level`.
    fn set_order(&self, order: &[u32]) -> Result<()>;

    fn enable_dynamic_reordering(&self, algorithm: i32) -> Result<()>;

    fn disable_dynamic_reordering(&self) -> Result<()>;

    fn dump(&self, root: NodeRef) -> Result<NativeDump>;
}

/// An engine plus the policies the compiler needs around it.
pub struct Manager {
    engine: Box<dyn Engine>,
    operation_timeout: Option<Duration>,
}

impl Manager {
    /// Bind the native engine registered for `kind`.
    #[instrument(skip_all, fields(engine = %kind))]
    pub fn open(kind: EngineKind, options: &Options) -> Result<Manager> {
        let library_dir = options.library_dir.as_deref();
        let engine: Box<dyn Engine> = match kind {
            EngineKind::Buddy => Box::new(buddy::Buddy::open(library_dir)?),
            EngineKind::Cudd => Box::new(cudd::Cudd::open(library_dir)?),
        };
        debug!(name = engine.name(), "opened engine");
        Ok(Manager::new(engine, options.operation_timeout))
    }

    #[must_use]
    pub fn new(engine: Box<dyn Engine>, operation_timeout: Option<Duration>) -> Manager {
        Manager {
            engine,
            operation_timeout,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.engine.name()
    }

    #[must_use]
    pub fn stub(&self) -> &'static str {
        self.engine.stub()
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.engine.capabilities()
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    fn engine_variable(&self, variable: u32) -> u32 {
        if self.capabilities().zero_based_indices {
            variable - 1
        } else {
            variable
        }
    }

    fn formula_variable(&self, variable: u32) -> u32 {
        if self.capabilities().zero_based_indices {
            variable + 1
        } else {
            variable
        }
    }

    /// Advertise `count` variables if the engine needs it up front.
    pub fn declare_variables(&self, count: usize) -> Result<()> {
        if self.capabilities().requires_variable_advertisement && count > 0 {
            self.engine.set_variable_count(count)?;
        }
        Ok(())
    }

    pub fn set_order(&self, order: &VariableOrder) -> Result<()> {
        let order: Vec<u32> = order.iter().map(|v| self.engine_variable(v)).collect();
        self.engine.set_order(&order)
    }

    /// Select dynamic reordering by stub; `off` disables it.
    pub fn set_dynamic_reordering(&self, stub: &str) -> Result<()> {
        if stub.eq_ignore_ascii_case("off") {
            return self.engine.disable_dynamic_reordering();
        }

        let Some(&(_, id)) = self
            .capabilities()
            .dynamic_reorder_algorithms
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(stub))
        else {
            return Err(Error::UnsupportedDynamicReorder {
                engine: self.name().to_owned(),
                algorithm: stub.to_owned(),
            });
        };

        debug!(stub, id, "enabling dynamic reordering");
        self.engine.enable_dynamic_reordering(id)
    }

    fn wrap(&self, node: NodeRef) -> Diagram<'_> {
        Diagram {
            manager: self,
            node,
        }
    }

    pub fn zero(&self) -> Result<Diagram<'_>> {
        Ok(self.wrap(self.engine.zero()?))
    }

    pub fn one(&self) -> Result<Diagram<'_>> {
        Ok(self.wrap(self.engine.one()?))
    }

    /// Diagram of a single literal over formula variable ids.
    pub fn literal(&self, literal: Literal) -> Result<Diagram<'_>> {
        let variable = self.engine_variable(literal.variable());
        if !literal.is_negated() {
            return Ok(self.wrap(self.engine.ithvar(variable)?));
        }

        match self.capabilities().negation {
            NegationCost::ComplementEdge => {
                let positive = self.wrap(self.engine.ithvar(variable)?);
                self.not(&positive)
            }
            NegationCost::Rebuild => Ok(self.wrap(self.engine.nithvar(variable)?)),
        }
    }

    pub fn not(&self, diagram: &Diagram<'_>) -> Result<Diagram<'_>> {
        Ok(self.wrap(self.engine.not(diagram.node)?))
    }

    /// Apply `op` without giving up the operands.
    ///
    /// An operation that outlives the watchdog bound has its result released and
    /// fails with [`Error::OperationTimeout`]. The native call is never
    /// interrupted unless the engine has a cooperative limit of its own.
    pub fn apply_retaining(
        &self,
        op: BinaryOp,
        lhs: &Diagram<'_>,
        rhs: &Diagram<'_>,
    ) -> Result<Diagram<'_>> {
        debug_assert!(std::ptr::eq(lhs.manager, self) && std::ptr::eq(rhs.manager, self));

        let started = Instant::now();
        let result = self.wrap(
            self.engine
                .apply(op, lhs.node, rhs.node, self.operation_timeout)?,
        );

        if let Some(bound) = self.operation_timeout {
            let elapsed = started.elapsed();
            if elapsed > bound {
                warn!(%op, ?elapsed, ?bound, "diagram operation exceeded the watchdog bound");
                return Err(Error::OperationTimeout { elapsed, bound });
            }
        }

        Ok(result)
    }

    /// Apply `op`, consuming both operands.
    pub fn apply<'m>(
        &'m self,
        op: BinaryOp,
        lhs: Diagram<'m>,
        rhs: Diagram<'m>,
    ) -> Result<Diagram<'m>> {
        self.apply_retaining(op, &lhs, &rhs)
    }

    pub fn and<'m>(&'m self, lhs: Diagram<'m>, rhs: Diagram<'m>) -> Result<Diagram<'m>> {
        self.apply(BinaryOp::And, lhs, rhs)
    }

    pub fn or<'m>(&'m self, lhs: Diagram<'m>, rhs: Diagram<'m>) -> Result<Diagram<'m>> {
        self.apply(BinaryOp::Or, lhs, rhs)
    }

    pub fn xor<'m>(&'m self, lhs: Diagram<'m>, rhs: Diagram<'m>) -> Result<Diagram<'m>> {
        self.apply(BinaryOp::Xor, lhs, rhs)
    }

    /// Native dump of `diagram`, translated to the canonical format.
    #[instrument(skip_all, fields(engine = self.stub()))]
    pub fn canonical_dump(&self, diagram: &Diagram<'_>) -> Result<CanonicalDump> {
        let native = self.engine.dump(diagram.node)?;
        let translated = native.format.translate(&native.text)?;

        let nodes = translated
            .nodes
            .into_iter()
            .map(|node| DumpNode {
                variable: self.formula_variable(node.variable).saturating_sub(1),
                ..node
            })
            .collect();
        let order = VariableOrder::new(
            native
                .order
                .iter()
                .map(|&v| self.formula_variable(v))
                .collect(),
        )?;

        CanonicalDump::new(self.name(), self.stub(), translated.root, order, nodes)
    }
}

/// Scoped owner of one native reference; released on drop.
///
/// Handles never outlive the [`Manager`] that created them.
pub struct Diagram<'m> {
    manager: &'m Manager,
    node: NodeRef,
}

impl Diagram<'_> {
    #[must_use]
    pub fn node(&self) -> NodeRef {
        self.node
    }
}

impl std::fmt::Debug for Diagram<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagram")
            .field("engine", &self.manager.stub())
            .field("node", &self.node)
            .finish()
    }
}

impl Drop for Diagram<'_> {
    fn drop(&mut self) {
        self.manager.engine.release(self.node);
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{reference::ReferenceEngine, BinaryOp, Manager};
    use crate::{cnf::Literal, dump::count_models, Error};

    fn manager(variables: usize) -> Manager {
        let manager = Manager::new(Box::new(ReferenceEngine::new()), None);
        manager.declare_variables(variables).unwrap();
        manager
    }

    #[test]
    fn consumed_operands_are_released() {
        let engine = ReferenceEngine::new();
        let live = engine.live_references();
        let manager = Manager::new(Box::new(engine), None);
        manager.declare_variables(2).unwrap();

        {
            let a = manager.literal(Literal::new(1)).unwrap();
            let b = manager.literal(Literal::new(-2)).unwrap();
            let _both = manager.and(a, b).unwrap();
            assert_eq!(live.get(), 1);
        }
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn retaining_keeps_operands() {
        let manager = manager(2);
        let a = manager.literal(Literal::new(1)).unwrap();
        let b = manager.literal(Literal::new(2)).unwrap();

        let either = manager.apply_retaining(BinaryOp::Or, &a, &b).unwrap();
        let both = manager.apply_retaining(BinaryOp::And, &a, &b).unwrap();
        let differ = manager.xor(a, b).unwrap();

        let count = |d| count_models(&manager.canonical_dump(d).unwrap());
        assert_eq!(count(&either), 3_u32.into());
        assert_eq!(count(&both), 1_u32.into());
        assert_eq!(count(&differ), 2_u32.into());
    }

    #[test]
    fn literals_use_formula_ids() {
        let manager = manager(3);
        let negative = manager.literal(Literal::new(-3)).unwrap();
        let dump = manager.canonical_dump(&negative).unwrap();

        assert_eq!(dump.nodes.len(), 1);
        assert_eq!(dump.nodes[0].variable, 2);
        assert_eq!(count_models(&dump), 4_u32.into());
        assert_eq!(dump.engine_stub, "reference");
    }

    #[test]
    fn dynamic_reordering_stubs() {
        let manager = manager(1);
        assert!(manager.set_dynamic_reordering("off").is_ok());
        assert!(manager.set_dynamic_reordering("lib-default").is_ok());
        assert!(matches!(
            manager.set_dynamic_reordering("sift-conv"),
            Err(Error::UnsupportedDynamicReorder { .. })
        ));
    }

    #[test]
    fn watchdog_rejects_slow_operations() {
        let engine = ReferenceEngine::new();
        engine.delay_applies(Duration::from_millis(30));
        let live = engine.live_references();
        let manager = Manager::new(Box::new(engine), Some(Duration::from_millis(5)));
        manager.declare_variables(2).unwrap();

        let a = manager.literal(Literal::new(1)).unwrap();
        let b = manager.literal(Literal::new(2)).unwrap();
        let result = manager.apply_retaining(BinaryOp::And, &a, &b);

        assert!(matches!(result, Err(Error::OperationTimeout { .. })));
        assert_eq!(live.get(), 2);
    }
}
