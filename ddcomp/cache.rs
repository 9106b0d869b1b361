//! Content-addressed cache of variable orders and compiled diagrams.
//!
//! Every entry remembers the MD5 of the input it was computed from. An entry
//! is only trusted after the input has been hashed again and found unchanged;
//! anything else invalidates it and the caller recomputes.
use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::Write,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use derive_more::derive::Display;
use tracing::{debug, instrument, warn};

use crate::{cnf::hash_file, dump::CanonicalDump, order::VariableOrder, Error, Result};

pub const KEY_INPUT_NAME: &str = "input-name";
pub const KEY_INPUT_HASH: &str = "input-hash";
const KEY_ORDER: &str = "order";

const ORDER_EXTENSION: &str = "order";
const DIAGRAM_EXTENSION: &str = "dd";

/// Why a cache entry was not used.
#[derive(Debug, Display)]
enum Invalid {
    #[display("no entry")]
    Missing,
    #[display("missing key '{_0}'")]
    MissingKey(&'static str),
    #[display("unparseable entry: {_0}")]
    Unparseable(String),
    #[display("order has {found} variables, formula has {expected}")]
    WrongLength { expected: usize, found: usize },
    #[display("stored hash {stored} does not match input hash {actual}")]
    HashMismatch { stored: String, actual: String },
    #[display("input cannot be hashed: {_0}")]
    InputUnreadable(String),
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    /// Use `dir` as the cache, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<ArtifactCache> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| Error::io(&dir, err))?;
        Ok(ArtifactCache { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<basename>-<stage>.order`, where `stage` names the orderer and its variant.
    #[must_use]
    pub fn order_path(&self, input: &Path, stage: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{stage}.{ORDER_EXTENSION}", basename(input)))
    }

    /// `<basename>-<engine>[-<dvo>].dd`; the reordering mode is omitted when it is `off`.
    #[must_use]
    pub fn diagram_path(&self, input: &Path, engine_stub: &str, dynamic_reorder: &str) -> PathBuf {
        let mut name = format!("{}-{engine_stub}", basename(input));
        if !dynamic_reorder.eq_ignore_ascii_case("off") {
            name.push('-');
            name.push_str(dynamic_reorder);
        }
        self.dir.join(format!("{name}.{DIAGRAM_EXTENSION}"))
    }

    /// A cached order for `input`, if one exists and the input is unchanged.
    #[instrument(skip_all, fields(input = %input.display(), stage = stage))]
    pub fn lookup_order(
        &self,
        input: &Path,
        stage: &str,
        variable_count: usize,
    ) -> Option<VariableOrder> {
        let path = self.order_path(input, stage);
        match read_order(&path, input, variable_count) {
            Ok(order) => {
                debug!(path = %path.display(), "using cached order");
                Some(order)
            }
            Err(Invalid::Missing) => None,
            Err(reason) => {
                warn!(path = %path.display(), %reason, "ignoring cached order");
                None
            }
        }
    }

    /// The order cached for an earlier version of `input`, as long as the
    /// variable count still matches. The input hash is not checked.
    #[must_use]
    pub fn stale_order(
        &self,
        input: &Path,
        stage: &str,
        variable_count: usize,
    ) -> Option<VariableOrder> {
        let text = read_entry(&self.order_path(input, stage)).ok()?;
        parse_order(&parse_entry(&text), variable_count).ok()
    }

    pub fn store_order(&self, input: &Path, stage: &str, order: &VariableOrder) -> Result<PathBuf> {
        let path = self.order_path(input, stage);
        let text = format!(
            "{KEY_INPUT_NAME}:{}\n{KEY_INPUT_HASH}:{}\n{KEY_ORDER}:{order}\n",
            input.display(),
            hash_file(input)?
        );
        write_atomically(&path, text.as_bytes())?;
        debug!(path = %path.display(), "cached order");
        Ok(path)
    }

    /// Path of a cached diagram for `input`, if one exists and the input is unchanged.
    #[instrument(skip_all, fields(input = %input.display(), engine = engine_stub))]
    pub fn lookup_diagram(
        &self,
        input: &Path,
        engine_stub: &str,
        dynamic_reorder: &str,
    ) -> Option<PathBuf> {
        let path = self.diagram_path(input, engine_stub, dynamic_reorder);
        match check_diagram(&path, input) {
            Ok(()) => {
                debug!(path = %path.display(), "using cached diagram");
                Some(path)
            }
            Err(Invalid::Missing) => None,
            Err(reason) => {
                warn!(path = %path.display(), %reason, "ignoring cached diagram");
                None
            }
        }
    }

    /// Write `dump` as the diagram for `input`, tagged with the input's hash.
    pub fn store_diagram(
        &self,
        input: &Path,
        engine_stub: &str,
        dynamic_reorder: &str,
        dump: &CanonicalDump,
    ) -> Result<PathBuf> {
        let path = self.diagram_path(input, engine_stub, dynamic_reorder);

        let mut dump = dump.clone();
        dump.meta
            .insert(KEY_INPUT_NAME.to_owned(), input.display().to_string());
        dump.meta
            .insert(KEY_INPUT_HASH.to_owned(), hash_file(input)?);

        write_atomically(&path, dump.to_text().as_bytes())?;
        debug!(path = %path.display(), "cached diagram");
        Ok(path)
    }

    #[must_use]
    pub fn has_valid_order(&self, input: &Path, stage: &str, variable_count: usize) -> bool {
        self.lookup_order(input, stage, variable_count).is_some()
    }

    #[must_use]
    pub fn has_valid_diagram(&self, input: &Path, engine_stub: &str, dynamic_reorder: &str) -> bool {
        self.lookup_diagram(input, engine_stub, dynamic_reorder)
            .is_some()
    }

    /// Serialize work on `input` against other runs sharing this cache.
    pub fn lock(&self, input: &Path) -> Result<CacheLock> {
        CacheLock::acquire(self.dir.join(format!("{}.lock", basename(input))))
    }
}

fn basename(input: &Path) -> String {
    input
        .file_name()
        .map_or_else(|| input.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn parse_entry(text: &str) -> BTreeMap<&str, &str> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

fn verify_hash(stored: Option<&str>, input: &Path) -> std::result::Result<(), Invalid> {
    let stored = stored.ok_or(Invalid::MissingKey(KEY_INPUT_HASH))?;
    let actual = hash_file(input).map_err(|err| Invalid::InputUnreadable(err.to_string()))?;
    if stored == actual {
        Ok(())
    } else {
        Err(Invalid::HashMismatch {
            stored: stored.to_owned(),
            actual,
        })
    }
}

fn read_entry(path: &Path) -> std::result::Result<String, Invalid> {
    if !path.exists() {
        return Err(Invalid::Missing);
    }
    fs::read_to_string(path).map_err(|err| Invalid::Unparseable(err.to_string()))
}

fn read_order(
    path: &Path,
    input: &Path,
    variable_count: usize,
) -> std::result::Result<VariableOrder, Invalid> {
    let text = read_entry(path)?;
    let entry = parse_entry(&text);
    let order = parse_order(&entry, variable_count)?;
    verify_hash(entry.get(KEY_INPUT_HASH).copied(), input)?;
    Ok(order)
}

fn parse_order(
    entry: &BTreeMap<&str, &str>,
    variable_count: usize,
) -> std::result::Result<VariableOrder, Invalid> {
    let order: VariableOrder = entry
        .get(KEY_ORDER)
        .ok_or(Invalid::MissingKey(KEY_ORDER))?
        .parse()
        .map_err(|err: Error| Invalid::Unparseable(err.to_string()))?;
    if order.len() != variable_count {
        return Err(Invalid::WrongLength {
            expected: variable_count,
            found: order.len(),
        });
    }
    Ok(order)
}

fn check_diagram(path: &Path, input: &Path) -> std::result::Result<(), Invalid> {
    let text = read_entry(path)?;
    let dump = CanonicalDump::parse(&text).map_err(|err| Invalid::Unparseable(err.to_string()))?;
    verify_hash(dump.meta.get(KEY_INPUT_HASH).map(String::as_str), input)
}

pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let temporary = path.with_extension("tmp");
    let mut file = File::create(&temporary).map_err(|err| Error::io(&temporary, err))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|err| Error::io(&temporary, err))?;
    fs::rename(&temporary, path).map_err(|err| Error::io(path, err))
}

/// Exclusive `flock` on `<basename>.lock`.
///
/// The lock belongs to the open file, so the kernel releases it when the
/// lock is dropped or the process dies. The file itself stays behind.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
    _file: File,
}

impl CacheLock {
    fn acquire(path: PathBuf) -> Result<CacheLock> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| Error::io(&path, err))?;

        // SAFETY: the descriptor stays open as long as `file`.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
            return Err(Error::io(path, std::io::Error::last_os_error()));
        }

        let _ = file
            .set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()));
        debug!(path = %path.display(), "acquired cache lock");
        Ok(CacheLock { path, _file: file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod test {
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    use pretty_assertions::assert_eq;

    use super::{ArtifactCache, KEY_INPUT_HASH};
    use crate::{
        dump::{CanonicalDump, DumpNode, Edge},
        order::VariableOrder,
        Error,
    };

    const CNF: &str = "p cnf 3 2\n1 -2 0\n2 3 0\n";

    /// Fresh directory holding `formula.cnf` and a cache directory.
    fn scratch(name: &str) -> (PathBuf, PathBuf, ArtifactCache) {
        let root = std::env::temp_dir().join(format!("ddcomp-cache-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        let input = root.join("formula.cnf");
        fs::write(&input, CNF).unwrap();
        let cache = ArtifactCache::open(root.join("_cache")).unwrap();
        (root, input, cache)
    }

    fn dump() -> CanonicalDump {
        CanonicalDump::new(
            "reference ROBDD",
            "reference",
            Edge::new(false, 2),
            VariableOrder::identity(3),
            vec![DumpNode {
                id: 2,
                variable: 0,
                low: Edge::new(false, 0),
                high: Edge::new(false, 1),
            }],
        )
        .unwrap()
    }

    #[test]
    fn paths() {
        let (root, input, cache) = scratch("paths");
        let dir = root.join("_cache");
        assert_eq!(
            cache.order_path(&input, "force-triage"),
            dir.join("formula.cnf-force-triage.order")
        );
        assert_eq!(
            cache.diagram_path(&input, "cudd", "sift"),
            dir.join("formula.cnf-cudd-sift.dd")
        );
        assert_eq!(
            cache.diagram_path(&input, "buddy", "off"),
            dir.join("formula.cnf-buddy.dd")
        );
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn order_round_trip() {
        let (root, input, cache) = scratch("order");
        let order = VariableOrder::new(vec![2, 3, 1]).unwrap();

        assert!(!cache.has_valid_order(&input, "force", 3));
        cache
            .store_order(&input, "force", &order)
            .unwrap();
        assert_eq!(
            cache.lookup_order(&input, "force", 3),
            Some(order)
        );
        assert!(!cache.has_valid_order(&input, "force", 4));
        assert!(!cache.has_valid_order(&input, "dbo", 3));
        assert!(!cache.has_valid_order(&input, "dbo-star", 3));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn stale_order_outlives_an_edit() {
        let (root, input, cache) = scratch("stale");
        let order = VariableOrder::new(vec![3, 1, 2]).unwrap();
        cache.store_order(&input, "force", &order).unwrap();

        fs::write(&input, "p cnf 3 1\n1 2 3 0\n").unwrap();
        assert_eq!(cache.lookup_order(&input, "force", 3), None);
        assert_eq!(cache.stale_order(&input, "force", 3), Some(order));
        assert_eq!(cache.stale_order(&input, "force", 4), None);
        assert_eq!(cache.stale_order(&input, "dbo", 3), None);
        fs::remove_dir_all(root).unwrap();
    }

    fn tamper_hash(path: &Path) {
        let text = fs::read_to_string(path).unwrap();
        let tampered: String = text
            .lines()
            .map(|line| {
                if line.starts_with(KEY_INPUT_HASH) {
                    format!("{KEY_INPUT_HASH}:00000000000000000000000000000000\n")
                } else {
                    format!("{line}\n")
                }
            })
            .collect();
        fs::write(path, tampered).unwrap();
    }

    #[test]
    fn tampered_order_hash_invalidates() {
        let (root, input, cache) = scratch("order-hash");
        let path = cache
            .store_order(&input, "dbo", &VariableOrder::identity(3))
            .unwrap();
        tamper_hash(&path);
        assert!(!cache.has_valid_order(&input, "dbo", 3));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn changed_input_invalidates() {
        let (root, input, cache) = scratch("input");
        cache
            .store_order(&input, "force", &VariableOrder::identity(3))
            .unwrap();
        cache.store_diagram(&input, "reference", "off", &dump()).unwrap();
        assert!(cache.has_valid_diagram(&input, "reference", "off"));

        fs::write(&input, "p cnf 3 1\n1 2 3 0\n").unwrap();
        assert!(!cache.has_valid_order(&input, "force", 3));
        assert!(!cache.has_valid_diagram(&input, "reference", "off"));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn diagram_entries() {
        let (root, input, cache) = scratch("diagram");
        let path = cache.store_diagram(&input, "reference", "lib-default", &dump()).unwrap();
        assert_eq!(
            cache.lookup_diagram(&input, "reference", "lib-default"),
            Some(path.clone())
        );

        let stored = CanonicalDump::from_path(&path).unwrap();
        assert_eq!(stored.nodes, dump().nodes);
        assert_eq!(stored.meta["input-name"], input.display().to_string());

        tamper_hash(&path);
        assert!(!cache.has_valid_diagram(&input, "reference", "lib-default"));

        fs::write(&path, "not a dump").unwrap();
        assert!(!cache.has_valid_diagram(&input, "reference", "lib-default"));
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn lock_is_exclusive() {
        let (root, input, cache) = scratch("lock");
        {
            let lock = cache.lock(&input).unwrap();
            assert!(lock.path().exists());
            assert!(matches!(cache.lock(&input), Err(Error::Io { .. })));
        }
        assert!(cache.lock(&input).is_ok());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn leftover_lock_file_does_not_block() {
        let (root, input, cache) = scratch("leftover-lock");
        let path = root.join("_cache").join("formula.cnf.lock");
        fs::write(&path, "4194303\n").unwrap();

        let lock = cache.lock(&input).unwrap();
        assert_eq!(lock.path(), path.as_path());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}\n", std::process::id())
        );
        drop(lock);
        fs::remove_dir_all(root).unwrap();
    }
}
