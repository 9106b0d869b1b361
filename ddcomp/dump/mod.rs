//! Engine-neutral text format for compiled diagrams.
//!
//! ```text
//! engine-name:CUDD 3.0.0
//! engine-stub:cudd
//! node-count:3
//! order:1,2,3
//! root:0:4
//! tool-version:ddcomp 0.1.0
//! ----
//! 2 2 1:1 0:1
//! 3 1 0:1 0:2
//! 4 0 1:3 0:2
//! ```
//!
//! Metadata lines are sorted by key. Node lines are sorted by id and read
//! `id variable low high`, where `variable` is the zero-based formula variable
//! and an edge is `<complemented>:<id>`. Ids `0` and `1` are the false and true
//! terminals and never have a node line.
mod count;
pub mod native;
mod samples;

pub use crate::dump::count::{count_models, nth_model, sample, ModelCounter};
pub use crate::dump::samples::Samples;

use std::{
    collections::BTreeMap,
    fmt::Display,
    io::Write,
    path::Path,
    str::FromStr,
};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{order::VariableOrder, Error, Result, TOOL_VERSION};

pub const SEPARATOR: &str = "----";

pub const KEY_TOOL_VERSION: &str = "tool-version";
pub const KEY_ENGINE_NAME: &str = "engine-name";
pub const KEY_ENGINE_STUB: &str = "engine-stub";
pub const KEY_NODE_COUNT: &str = "node-count";
pub const KEY_ROOT: &str = "root";
pub const KEY_ORDER: &str = "order";

const RESERVED: [&str; 6] = [
    KEY_TOOL_VERSION,
    KEY_ENGINE_NAME,
    KEY_ENGINE_STUB,
    KEY_NODE_COUNT,
    KEY_ROOT,
    KEY_ORDER,
];

pub const FALSE_ID: usize = 0;
pub const TRUE_ID: usize = 1;

/// Possibly complemented reference to a node or terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub complemented: bool,
    pub id: usize,
}

impl Edge {
    #[must_use]
    pub fn new(complemented: bool, id: usize) -> Edge {
        Edge { complemented, id }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.id == FALSE_ID || self.id == TRUE_ID
    }
}

impl Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", u8::from(self.complemented), self.id)
    }
}

impl FromStr for Edge {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::MalformedDump(format!("'{s}' is not an edge"));
        let (complemented, id) = s.split_once(':').ok_or_else(malformed)?;
        let complemented = match complemented {
            "0" => false,
            "1" => true,
            _ => return Err(malformed()),
        };
        let id = id.parse::<usize>().map_err(|_| malformed())?;
        Ok(Edge { complemented, id })
    }
}

/// Decision node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DumpNode {
    pub id: usize,
    /// Zero-based formula variable.
    pub variable: u32,
    pub low: Edge,
    pub high: Edge,
}

impl Display for DumpNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {} {}", self.id, self.variable, self.low, self.high)
    }
}

impl FromStr for DumpNode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<_> = s.split_whitespace().collect();
        let [id, variable, low, high] = fields.as_slice() else {
            return Err(Error::MalformedDump(format!(
                "node line '{s}' must have 4 fields"
            )));
        };

        Ok(DumpNode {
            id: id
                .parse()
                .map_err(|_| Error::MalformedDump(format!("'{id}' is not a node id")))?,
            variable: variable
                .parse()
                .map_err(|_| Error::MalformedDump(format!("'{variable}' is not a variable")))?,
            low: low.parse()?,
            high: high.parse()?,
        })
    }
}

/// A compiled diagram, independent of the engine that built it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalDump {
    pub tool_version: String,
    pub engine_name: String,
    pub engine_stub: String,
    pub root: Edge,
    pub order: VariableOrder,
    /// Sorted by id.
    pub nodes: Vec<DumpNode>,
    /// Metadata beyond the reserved keys.
    pub meta: BTreeMap<String, String>,
}

impl CanonicalDump {
    /// Assemble a dump, sorting `nodes` by id and checking that every edge resolves.
    pub fn new(
        engine_name: impl Into<String>,
        engine_stub: impl Into<String>,
        root: Edge,
        order: VariableOrder,
        mut nodes: Vec<DumpNode>,
    ) -> Result<CanonicalDump> {
        nodes.sort_by_key(|node| node.id);
        let dump = CanonicalDump {
            tool_version: TOOL_VERSION.to_owned(),
            engine_name: engine_name.into(),
            engine_stub: engine_stub.into(),
            root,
            order,
            nodes,
            meta: BTreeMap::new(),
        };
        dump.validate()?;
        Ok(dump)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn node(&self, id: usize) -> Option<&DumpNode> {
        self.nodes
            .binary_search_by_key(&id, |node| node.id)
            .ok()
            .map(|idx| &self.nodes[idx])
    }

    fn validate(&self) -> Result<()> {
        let mut ids = FxHashSet::default();
        for node in &self.nodes {
            if node.id == FALSE_ID || node.id == TRUE_ID {
                return Err(Error::MalformedDump(format!(
                    "node line uses terminal id {}",
                    node.id
                )));
            }
            if !ids.insert(node.id) {
                return Err(Error::MalformedDump(format!("node {} defined twice", node.id)));
            }
            if node.variable as usize >= self.order.len() {
                return Err(Error::MalformedDump(format!(
                    "node {} tests variable {} but the order has {} variables",
                    node.id,
                    node.variable,
                    self.order.len()
                )));
            }
        }

        let dangling = |edge: Edge| !edge.is_terminal() && !ids.contains(&edge.id);
        if dangling(self.root) {
            return Err(Error::MalformedDump(format!(
                "root {} is not a node",
                self.root
            )));
        }
        if let Some(node) = self
            .nodes
            .iter()
            .find(|node| dangling(node.low) || dangling(node.high))
        {
            return Err(Error::MalformedDump(format!(
                "node {node} refers to a missing node"
            )));
        }

        // Children test variables strictly below their parent, which also
        // rules out cycles.
        let positions = self.order.positions();
        let levels: FxHashMap<usize, usize> = self
            .nodes
            .iter()
            .map(|node| (node.id, positions[node.variable as usize + 1]))
            .collect();
        for node in &self.nodes {
            let level = levels[&node.id];
            for child in [node.low, node.high] {
                if levels.get(&child.id).is_some_and(|&below| below <= level) {
                    return Err(Error::MalformedDump(format!(
                        "node {} is not below its parent {}",
                        child.id, node.id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Metadata including the reserved keys, as written.
    #[must_use]
    pub fn header(&self) -> BTreeMap<String, String> {
        let mut header = self.meta.clone();
        header.insert(KEY_TOOL_VERSION.to_owned(), self.tool_version.clone());
        header.insert(KEY_ENGINE_NAME.to_owned(), self.engine_name.clone());
        header.insert(KEY_ENGINE_STUB.to_owned(), self.engine_stub.clone());
        header.insert(KEY_NODE_COUNT.to_owned(), self.nodes.len().to_string());
        header.insert(KEY_ROOT.to_owned(), self.root.to_string());
        header.insert(KEY_ORDER.to_owned(), self.order.to_string());
        header
    }

    pub fn write(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        for (key, value) in self.header() {
            writeln!(writer, "{key}:{value}")?;
        }
        writeln!(writer, "{SEPARATOR}")?;
        for node in &self.nodes {
            writeln!(writer, "{node}")?;
        }
        Ok(())
    }

    #[must_use]
    pub fn to_text(&self) -> String {
        let mut buffer = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn parse(text: &str) -> Result<CanonicalDump> {
        let mut lines = text.lines();
        let mut header = BTreeMap::new();

        loop {
            let Some(line) = lines.next() else {
                return Err(Error::MalformedDump(format!(
                    "missing '{SEPARATOR}' separator"
                )));
            };
            let line = line.trim_end();
            if line == SEPARATOR {
                break;
            }
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                Error::MalformedDump(format!("metadata line '{line}' has no ':'"))
            })?;
            header.insert(key.to_owned(), value.to_owned());
        }

        let mut take = |key: &str| {
            header
                .remove(key)
                .ok_or_else(|| Error::MalformedDump(format!("missing metadata key '{key}'")))
        };

        let tool_version = take(KEY_TOOL_VERSION)?;
        let engine_name = take(KEY_ENGINE_NAME)?;
        let engine_stub = take(KEY_ENGINE_STUB)?;
        let node_count = take(KEY_NODE_COUNT)?;
        let root: Edge = take(KEY_ROOT)?.parse()?;
        let order: VariableOrder = take(KEY_ORDER)?
            .parse()
            .map_err(|err| Error::MalformedDump(format!("bad order: {err}")))?;

        let mut nodes = lines
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::parse::<DumpNode>)
            .collect::<Result<Vec<_>>>()?;
        nodes.sort_by_key(|node| node.id);

        if node_count.parse::<usize>().ok() != Some(nodes.len()) {
            return Err(Error::MalformedDump(format!(
                "node-count is '{node_count}' but {} node lines follow",
                nodes.len()
            )));
        }

        let dump = CanonicalDump {
            tool_version,
            engine_name,
            engine_stub,
            root,
            order,
            nodes,
            meta: header,
        };
        dump.validate()?;
        Ok(dump)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<CanonicalDump> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        CanonicalDump::parse(&text)
    }
}

/// Reserved metadata keys cannot be overridden through [`CanonicalDump::meta`].
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}
