//! Binding to BuDDy 2.4 (`libbuddy.so`).
//!
//! BuDDy keeps its whole state in C globals, so at most one [`Buddy`] may be
//! open per process. It has no cooperative time limit: a slow operation runs
//! to completion and only then is rejected by the manager's watchdog.
use std::{
    ffi::CStr,
    os::raw::{c_char, c_int},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
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

const LIBRARY: &str = "libbuddy.so";
const HINT: &str = "install BuDDy (e.g. `apt install libbdd-dev`) or point --lib-dir at a directory containing libbuddy.so";
const NAME: &str = "BuDDy 2.4";
const STUB: &str = "buddy";

const REORDER_NONE: c_int = 0;

static DVO: [(&str, i32); 8] = [
    ("lib-default", 4),
    ("win2", 1),
    ("win2-conv", 2),
    ("sift", 3),
    ("sift-conv", 4),
    ("win3", 5),
    ("win3-conv", 6),
    ("random", 7),
];

static OPEN: AtomicBool = AtomicBool::new(false);

type Bdd = c_int;
type ErrorHandler = Option<unsafe extern "C" fn(c_int)>;
type GbcHandler = Option<unsafe extern "C" fn(c_int, *mut std::ffi::c_void)>;

unsafe extern "C" fn ignore_error(_code: c_int) {}

/// Every BuDDy entry point used, resolved once.
struct Api {
    init: unsafe extern "C" fn(c_int, c_int) -> c_int,
    done: unsafe extern "C" fn(),
    setminfreenodes: unsafe extern "C" fn(c_int) -> c_int,
    setmaxincrease: unsafe extern "C" fn(c_int) -> c_int,
    gbc_hook: unsafe extern "C" fn(GbcHandler) -> GbcHandler,
    error_hook: unsafe extern "C" fn(ErrorHandler) -> ErrorHandler,
    errstring: unsafe extern "C" fn(c_int) -> *const c_char,
    setvarnum: unsafe extern "C" fn(c_int) -> c_int,
    varnum: unsafe extern "C" fn() -> c_int,
    var2level: unsafe extern "C" fn(c_int) -> c_int,
    setvarorder: unsafe extern "C" fn(*mut c_int),
    varblockall: unsafe extern "C" fn(),
    autoreorder: unsafe extern "C" fn(c_int) -> c_int,
    ithvar: unsafe extern "C" fn(c_int) -> Bdd,
    nithvar: unsafe extern "C" fn(c_int) -> Bdd,
    bdd_true: unsafe extern "C" fn() -> Bdd,
    bdd_false: unsafe extern "C" fn() -> Bdd,
    not: unsafe extern "C" fn(Bdd) -> Bdd,
    and: unsafe extern "C" fn(Bdd, Bdd) -> Bdd,
    or: unsafe extern "C" fn(Bdd, Bdd) -> Bdd,
    xor: unsafe extern "C" fn(Bdd, Bdd) -> Bdd,
    addref: unsafe extern "C" fn(Bdd) -> Bdd,
    delref: unsafe extern "C" fn(Bdd) -> Bdd,
    save: unsafe extern "C" fn(*mut libc::FILE, Bdd) -> c_int,
}

impl Api {
    fn resolve(library: &Library) -> Result<Api> {
        // SAFETY: the signatures below are those of bdd.h in BuDDy 2.4.
        unsafe {
            macro_rules! get {
                ($name:literal) => {
                    symbol(library, LIBRARY, $name, HINT)?
                };
            }
            Ok(Api {
                init: get!("bdd_init"),
                done: get!("bdd_done"),
                setminfreenodes: get!("bdd_setminfreenodes"),
                setmaxincrease: get!("bdd_setmaxincrease"),
                gbc_hook: get!("bdd_gbc_hook"),
                error_hook: get!("bdd_error_hook"),
                errstring: get!("bdd_errstring"),
                setvarnum: get!("bdd_setvarnum"),
                varnum: get!("bdd_varnum"),
                var2level: get!("bdd_var2level"),
                setvarorder: get!("bdd_setvarorder"),
                varblockall: get!("bdd_varblockall"),
                autoreorder: get!("bdd_autoreorder"),
                ithvar: get!("bdd_ithvar"),
                nithvar: get!("bdd_nithvar"),
                bdd_true: get!("bdd_true"),
                bdd_false: get!("bdd_false"),
                not: get!("bdd_not"),
                and: get!("bdd_and"),
                or: get!("bdd_or"),
                xor: get!("bdd_xor"),
                addref: get!("bdd_addref"),
                delref: get!("bdd_delref"),
                save: get!("bdd_save"),
            })
        }
    }
}

pub struct Buddy {
    api: Api,
    // Keeps every pointer in `api` valid; dropped after `Drop::drop` ran `bdd_done`.
    _library: Library,
}

impl Buddy {
    /// Load and initialise BuDDy.
    #[instrument(skip_all)]
    pub fn open(library_dir: Option<&Path>) -> Result<Buddy> {
        let library = open_library(LIBRARY, library_dir, HINT)?;
        let api = Api::resolve(&library)?;

        if OPEN
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Engine {
                engine: NAME,
                message: "only one BuDDy manager can be open per process".to_owned(),
            });
        }

        let buddy = Buddy {
            api,
            _library: library,
        };

        // SAFETY: BuDDy is not initialised yet and nothing else touches it while `OPEN` is held.
        unsafe {
            (buddy.api.error_hook)(Some(ignore_error));
            buddy.check((buddy.api.init)(100_000, 100_000))?;
            (buddy.api.setminfreenodes)(33);
            (buddy.api.setmaxincrease)(100_000);
            (buddy.api.gbc_hook)(None);
        }

        debug!("initialised BuDDy");
        Ok(buddy)
    }

    /// BuDDy reports failures as negative return values.
    fn check(&self, code: c_int) -> Result<c_int> {
        if code >= 0 {
            return Ok(code);
        }

        // SAFETY: bdd_errstring returns a static string for every error code.
        let message = unsafe {
            let message = (self.api.errstring)(code);
            if message.is_null() {
                format!("error {code}")
            } else {
                CStr::from_ptr(message).to_string_lossy().into_owned()
            }
        };
        Err(Error::Engine {
            engine: NAME,
            message,
        })
    }

    /// Take a reference on a freshly returned node.
    fn referenced(&self, node: Bdd) -> Result<NodeRef> {
        let node = self.check(node)?;
        // SAFETY: `node` is a valid node id returned by BuDDy.
        unsafe {
            (self.api.addref)(node);
        }
        Ok(NodeRef(node.unsigned_abs() as usize))
    }

    fn raw(node: NodeRef) -> Bdd {
        Bdd::try_from(node.0).unwrap_or(Bdd::MAX)
    }

    fn variable(variable: u32) -> c_int {
        c_int::try_from(variable).unwrap_or(c_int::MAX)
    }
}

impl Engine for Buddy {
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
            negation: NegationCost::Rebuild,
            dynamic_reorder_algorithms: &DVO,
        }
    }

    fn zero(&self) -> Result<NodeRef> {
        // SAFETY: BuDDy is initialised.
        self.referenced(unsafe { (self.api.bdd_false)() })
    }

    fn one(&self) -> Result<NodeRef> {
        // SAFETY: BuDDy is initialised.
        self.referenced(unsafe { (self.api.bdd_true)() })
    }

    fn ithvar(&self, variable: u32) -> Result<NodeRef> {
        // SAFETY: out-of-range variables are reported through the error hook.
        self.referenced(unsafe { (self.api.ithvar)(Buddy::variable(variable)) })
    }

    fn nithvar(&self, variable: u32) -> Result<NodeRef> {
        // SAFETY: out-of-range variables are reported through the error hook.
        self.referenced(unsafe { (self.api.nithvar)(Buddy::variable(variable)) })
    }

    fn not(&self, node: NodeRef) -> Result<NodeRef> {
        // SAFETY: `node` is referenced by the caller.
        self.referenced(unsafe { (self.api.not)(Buddy::raw(node)) })
    }

    fn apply(
        &self,
        op: BinaryOp,
        lhs: NodeRef,
        rhs: NodeRef,
        _limit: Option<Duration>,
    ) -> Result<NodeRef> {
        let function = match op {
            BinaryOp::And => self.api.and,
            BinaryOp::Or => self.api.or,
            BinaryOp::Xor => self.api.xor,
        };
        // SAFETY: both operands are referenced by the caller.
        self.referenced(unsafe { function(Buddy::raw(lhs), Buddy::raw(rhs)) })
    }

    fn release(&self, node: NodeRef) {
        // SAFETY: the caller hands back a reference taken by `referenced`.
        unsafe {
            (self.api.delref)(Buddy::raw(node));
        }
    }

    fn set_variable_count(&self, count: usize) -> Result<()> {
        let count = c_int::try_from(count).map_err(|_| Error::Engine {
            engine: NAME,
            message: format!("{count} variables exceed BuDDy's limit"),
        })?;
        // SAFETY: BuDDy is initialised.
        self.check(unsafe { (self.api.setvarnum)(count) })?;
        Ok(())
    }

    fn set_order(&self, order: &[u32]) -> Result<()> {
        // SAFETY: BuDDy is initialised.
        let declared = unsafe { (self.api.varnum)() };
        if usize::try_from(declared).ok() != Some(order.len()) {
            return Err(Error::InvalidOrder(format!(
                "order has {} variables but BuDDy declares {declared}",
                order.len()
            )));
        }

        let mut order: Vec<c_int> = order.iter().map(|&v| Buddy::variable(v)).collect();
        // SAFETY: `order` is a permutation of every declared variable.
        unsafe {
            (self.api.setvarorder)(order.as_mut_ptr());
        }
        Ok(())
    }

    fn enable_dynamic_reordering(&self, algorithm: i32) -> Result<()> {
        // SAFETY: BuDDy is initialised; reordering needs every variable in a block.
        unsafe {
            (self.api.varblockall)();
            self.check((self.api.autoreorder)(algorithm))?;
        }
        Ok(())
    }

    fn disable_dynamic_reordering(&self) -> Result<()> {
        // SAFETY: BuDDy is initialised.
        self.check(unsafe { (self.api.autoreorder)(REORDER_NONE) })?;
        Ok(())
    }

    fn dump(&self, root: NodeRef) -> Result<NativeDump> {
        let capture = CaptureFile::new(NAME)?;
        // SAFETY: `root` is referenced and `capture` is an open stream.
        self.check(unsafe { (self.api.save)(capture.as_ptr(), Buddy::raw(root)) })?;

        // SAFETY: BuDDy is initialised.
        let order = unsafe {
            let varnum = (self.api.varnum)();
            let mut by_level: Vec<(c_int, u32)> = (0..varnum)
                .map(|var| ((self.api.var2level)(var), var.unsigned_abs()))
                .collect();
            by_level.sort_unstable();
            by_level.into_iter().map(|(_, var)| var).collect()
        };

        Ok(NativeDump {
            format: NativeFormat::Buddy,
            text: capture.contents(NAME)?,
            order,
        })
    }
}

impl Drop for Buddy {
    fn drop(&mut self) {
        // SAFETY: every diagram borrowed the manager and is gone by now.
        unsafe {
            (self.api.done)();
        }
        OPEN.store(false, Ordering::Release);
    }
}
