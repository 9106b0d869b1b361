//! Binding to CUDD 3.0.0 (`libcudd.so`).
//!
//! Negation is a complement bit on the node pointer. Binary operations run
//! under CUDD's own time limit, so a slow operation is abandoned inside the
//! library instead of running to completion.
use std::{
    ffi::c_void,
    os::raw::{c_int, c_uint, c_ulong},
    path::Path,
    ptr::NonNull,
    time::{Duration, Instant},
};

use libloading::Library;
use tracing::{debug, instrument};

use crate::{
    dump::native::NativeFormat,
    engine::{
        native::{open_library, symbol, CaptureFile},
        BinaryOp, Capabilities, Engine, NativeDump, NegationCost, NodeRef,
    },
    Error, Result,
};

const LIBRARY: &str = "libcudd.so";
const HINT: &str = "build CUDD 3.0.0 with --enable-shared and install it, or point --lib-dir at a directory containing libcudd.so";
const NAME: &str = "CUDD 3.0.0";
const STUB: &str = "cudd";

const UNIQUE_SLOTS: c_uint = 256;
const CACHE_SLOTS: c_uint = 262_144;
const TIMEOUT_EXPIRED: c_int = 4;
const DEBUG_VERBOSITY: c_int = 3;

static DVO: [(&str, i32); 3] = [("lib-default", 4), ("sift", 4), ("sift-conv", 5)];

type Manager = c_void;
type Node = c_void;

/// Every CUDD entry point used, resolved once.
struct Api {
    init: unsafe extern "C" fn(c_uint, c_uint, c_uint, c_uint, usize) -> *mut Manager,
    quit: unsafe extern "C" fn(*mut Manager),
    new_var: unsafe extern "C" fn(*mut Manager) -> *mut Node,
    read_size: unsafe extern "C" fn(*mut Manager) -> c_int,
    read_perm: unsafe extern "C" fn(*mut Manager, c_int) -> c_int,
    logic_zero: unsafe extern "C" fn(*mut Manager) -> *mut Node,
    one: unsafe extern "C" fn(*mut Manager) -> *mut Node,
    ith_var: unsafe extern "C" fn(*mut Manager, c_int) -> *mut Node,
    and: unsafe extern "C" fn(*mut Manager, *mut Node, *mut Node) -> *mut Node,
    or: unsafe extern "C" fn(*mut Manager, *mut Node, *mut Node) -> *mut Node,
    xor: unsafe extern "C" fn(*mut Manager, *mut Node, *mut Node) -> *mut Node,
    reference: unsafe extern "C" fn(*mut Node),
    deref: unsafe extern "C" fn(*mut Manager, *mut Node),
    shuffle_heap: unsafe extern "C" fn(*mut Manager, *mut c_int) -> c_int,
    autodyn_enable: unsafe extern "C" fn(*mut Manager, c_int),
    autodyn_disable: unsafe extern "C" fn(*mut Manager),
    print_debug: unsafe extern "C" fn(*mut Manager, *mut Node, c_int, c_int) -> c_int,
    set_stdout: unsafe extern "C" fn(*mut Manager, *mut libc::FILE),
    read_stdout: unsafe extern "C" fn(*mut Manager) -> *mut libc::FILE,
    set_time_limit: unsafe extern "C" fn(*mut Manager, c_ulong) -> c_ulong,
    unset_time_limit: unsafe extern "C" fn(*mut Manager),
    reset_start_time: unsafe extern "C" fn(*mut Manager),
    read_error_code: unsafe extern "C" fn(*mut Manager) -> c_int,
    clear_error_code: unsafe extern "C" fn(*mut Manager),
}

impl Api {
    fn resolve(library: &Library) -> Result<Api> {
        // SAFETY: the signatures below are those of cudd.h in CUDD 3.0.0.
        unsafe {
            macro_rules! get {
                ($name:literal) => {
                    symbol(library, LIBRARY, $name, HINT)?
                };
            }
            Ok(Api {
                init: get!("Cudd_Init"),
                quit: get!("Cudd_Quit"),
                new_var: get!("Cudd_bddNewVar"),
                read_size: get!("Cudd_ReadSize"),
                read_perm: get!("Cudd_ReadPerm"),
                logic_zero: get!("Cudd_ReadLogicZero"),
                one: get!("Cudd_ReadOne"),
                ith_var: get!("Cudd_bddIthVar"),
                and: get!("Cudd_bddAnd"),
                or: get!("Cudd_bddOr"),
                xor: get!("Cudd_bddXor"),
                reference: get!("Cudd_Ref"),
                deref: get!("Cudd_RecursiveDeref"),
                shuffle_heap: get!("Cudd_ShuffleHeap"),
                autodyn_enable: get!("Cudd_AutodynEnable"),
                autodyn_disable: get!("Cudd_AutodynDisable"),
                print_debug: get!("Cudd_PrintDebug"),
                set_stdout: get!("Cudd_SetStdout"),
                read_stdout: get!("Cudd_ReadStdout"),
                set_time_limit: get!("Cudd_SetTimeLimit"),
                unset_time_limit: get!("Cudd_UnsetTimeLimit"),
                reset_start_time: get!("Cudd_ResetStartTime"),
                read_error_code: get!("Cudd_ReadErrorCode"),
                clear_error_code: get!("Cudd_ClearErrorCode"),
            })
        }
    }
}

pub struct Cudd {
    api: Api,
    manager: NonNull<Manager>,
    // Keeps every pointer in `api` valid; dropped after `Drop::drop` ran `Cudd_Quit`.
    _library: Library,
}

impl Cudd {
    /// Load CUDD and create a manager.
    #[instrument(skip_all)]
    pub fn open(library_dir: Option<&Path>) -> Result<Cudd> {
        let library = open_library(LIBRARY, library_dir, HINT)?;
        let api = Api::resolve(&library)?;

        // SAFETY: Cudd_Init has no preconditions.
        let manager = unsafe { (api.init)(0, 0, UNIQUE_SLOTS, CACHE_SLOTS, 0) };
        let manager = NonNull::new(manager).ok_or_else(|| Error::Engine {
            engine: NAME,
            message: "Cudd_Init failed".to_owned(),
        })?;

        debug!("initialised CUDD");
        Ok(Cudd {
            api,
            manager,
            _library: library,
        })
    }

    fn mgr(&self) -> *mut Manager {
        self.manager.as_ptr()
    }

    fn failure(&self, what: &str) -> Error {
        // SAFETY: the manager is live.
        let code = unsafe { (self.api.read_error_code)(self.mgr()) };
        Error::Engine {
            engine: NAME,
            message: format!("{what} failed with error code {code}"),
        }
    }

    /// Take a reference on a freshly returned node.
    fn referenced(&self, node: *mut Node, what: &str) -> Result<NodeRef> {
        if node.is_null() {
            return Err(self.failure(what));
        }
        // SAFETY: `node` was just returned by CUDD for this manager.
        unsafe {
            (self.api.reference)(node);
        }
        Ok(NodeRef(node as usize))
    }

    fn raw(node: NodeRef) -> *mut Node {
        node.0 as *mut Node
    }

    fn with_time_limit(&self, limit: Option<Duration>, call: impl FnOnce() -> *mut Node) -> *mut Node {
        let Some(limit) = limit else {
            return call();
        };

        let millis = c_ulong::try_from(limit.as_millis()).unwrap_or(c_ulong::MAX);
        // SAFETY: the manager is live.
        unsafe {
            (self.api.reset_start_time)(self.mgr());
            (self.api.set_time_limit)(self.mgr(), millis);
        }
        let result = call();
        // SAFETY: the manager is live.
        unsafe {
            (self.api.unset_time_limit)(self.mgr());
        }
        result
    }
}

impl Engine for Cudd {
    fn name(&self) -> &'static str {
        NAME
    }

    fn stub(&self) -> &'static str {
        STUB
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            zero_based_indices: true,
            requires_variable_advertisement: true,
            negation: NegationCost::ComplementEdge,
            dynamic_reorder_algorithms: &DVO,
        }
    }

    fn zero(&self) -> Result<NodeRef> {
        // SAFETY: the manager is live.
        self.referenced(unsafe { (self.api.logic_zero)(self.mgr()) }, "Cudd_ReadLogicZero")
    }

    fn one(&self) -> Result<NodeRef> {
        // SAFETY: the manager is live.
        self.referenced(unsafe { (self.api.one)(self.mgr()) }, "Cudd_ReadOne")
    }

    fn ithvar(&self, variable: u32) -> Result<NodeRef> {
        let index = c_int::try_from(variable).unwrap_or(c_int::MAX);
        // SAFETY: the manager is live; unknown indices create fresh variables.
        self.referenced(unsafe { (self.api.ith_var)(self.mgr(), index) }, "Cudd_bddIthVar")
    }

    fn not(&self, node: NodeRef) -> Result<NodeRef> {
        // Cudd_Not flips the lowest pointer bit.
        self.referenced(Cudd::raw(NodeRef(node.0 ^ 1)), "Cudd_Not")
    }

    fn apply(
        &self,
        op: BinaryOp,
        lhs: NodeRef,
        rhs: NodeRef,
        limit: Option<Duration>,
    ) -> Result<NodeRef> {
        let (function, what) = match op {
            BinaryOp::And => (self.api.and, "Cudd_bddAnd"),
            BinaryOp::Or => (self.api.or, "Cudd_bddOr"),
            BinaryOp::Xor => (self.api.xor, "Cudd_bddXor"),
        };

        let started = Instant::now();
        // SAFETY: both operands are referenced by the caller.
        let result = self.with_time_limit(limit, || unsafe {
            function(self.mgr(), Cudd::raw(lhs), Cudd::raw(rhs))
        });

        if result.is_null() {
            // SAFETY: the manager is live.
            let code = unsafe { (self.api.read_error_code)(self.mgr()) };
            if code == TIMEOUT_EXPIRED {
                // SAFETY: the manager is live.
                unsafe { (self.api.clear_error_code)(self.mgr()) };
                return Err(Error::OperationTimeout {
                    elapsed: started.elapsed(),
                    bound: limit.unwrap_or_default(),
                });
            }
        }

        self.referenced(result, what)
    }

    fn release(&self, node: NodeRef) {
        // SAFETY: the caller hands back a reference taken by `referenced`.
        unsafe {
            (self.api.deref)(self.mgr(), Cudd::raw(node));
        }
    }

    fn set_variable_count(&self, count: usize) -> Result<()> {
        loop {
            // SAFETY: the manager is live.
            let size = unsafe { (self.api.read_size)(self.mgr()) };
            if usize::try_from(size).unwrap_or(0) >= count {
                return Ok(());
            }
            // SAFETY: the manager is live; projection functions are referenced by CUDD itself.
            if unsafe { (self.api.new_var)(self.mgr()) }.is_null() {
                return Err(self.failure("Cudd_bddNewVar"));
            }
        }
    }

    fn set_order(&self, order: &[u32]) -> Result<()> {
        // SAFETY: the manager is live.
        let size = unsafe { (self.api.read_size)(self.mgr()) };
        if usize::try_from(size).ok() != Some(order.len()) {
            return Err(Error::InvalidOrder(format!(
                "order has {} variables but CUDD declares {size}",
                order.len()
            )));
        }

        let mut permutation: Vec<c_int> = order
            .iter()
            .map(|&v| c_int::try_from(v).unwrap_or(c_int::MAX))
            .collect();
        // SAFETY: `permutation` covers every variable of the manager.
        if unsafe { (self.api.shuffle_heap)(self.mgr(), permutation.as_mut_ptr()) } == 1 {
            Ok(())
        } else {
            Err(self.failure("Cudd_ShuffleHeap"))
        }
    }

    fn enable_dynamic_reordering(&self, algorithm: i32) -> Result<()> {
        // SAFETY: the manager is live and `algorithm` is a Cudd_ReorderingType.
        unsafe { (self.api.autodyn_enable)(self.mgr(), algorithm) };
        Ok(())
    }

    fn disable_dynamic_reordering(&self) -> Result<()> {
        // SAFETY: the manager is live.
        unsafe { (self.api.autodyn_disable)(self.mgr()) };
        Ok(())
    }

    fn dump(&self, root: NodeRef) -> Result<NativeDump> {
        let capture = CaptureFile::new(NAME)?;

        // SAFETY: the manager is live; its stdout is restored before `capture` closes.
        let (printed, size) = unsafe {
            let previous = (self.api.read_stdout)(self.mgr());
            (self.api.set_stdout)(self.mgr(), capture.as_ptr());
            let size = (self.api.read_size)(self.mgr());
            let printed =
                (self.api.print_debug)(self.mgr(), Cudd::raw(root), size, DEBUG_VERBOSITY);
            (self.api.set_stdout)(self.mgr(), previous);
            (printed, size)
        };
        if printed != 1 {
            return Err(self.failure("Cudd_PrintDebug"));
        }

        // SAFETY: the manager is live and every index is below its size.
        let mut by_level: Vec<(c_int, u32)> = (0..size)
            .map(|var| (unsafe { (self.api.read_perm)(self.mgr(), var) }, var.unsigned_abs()))
            .collect();
        by_level.sort_unstable();

        Ok(NativeDump {
            format: NativeFormat::Cudd,
            text: capture.contents(NAME)?,
            order: by_level.into_iter().map(|(_, var)| var).collect(),
        })
    }
}

impl Drop for Cudd {
    fn drop(&mut self) {
        // SAFETY: every diagram borrowed the manager and is gone by now.
        unsafe {
            (self.api.quit)(self.mgr());
        }
    }
}
