//! Translation of engine-native dump text into canonical nodes.
//!
//! Native node ids are renumbered in post-order from the root, starting at 2,
//! so children always have smaller ids than their parents. Variables stay in
//! the engine's numbering; the adapter maps them to formula variables.
use std::fmt::Display;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    dump::{DumpNode, Edge, FALSE_ID, TRUE_ID},
    Error, Result,
};

/// Text layouts produced by the native dump routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFormat {
    /// `bdd_save`: `<nodes> <varnum>`, the level of every variable, then
    /// `id var low high` lines in post-order. Constants are `0 0 <value>`.
    Buddy,
    /// `Cudd_PrintDebug` at verbosity 3: `: N nodes M leaves X minterms`, then
    /// `ID = [!]0x..  index = i  T = ..  E = [!]..` lines, root first.
    Cudd,
}

/// Canonically numbered diagram over engine variable indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDiagram {
    pub root: Edge,
    pub nodes: Vec<DumpNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Target {
    Terminal(bool),
    Node(u64),
}

#[derive(Debug, Clone, Copy)]
struct NativeEdge {
    complemented: bool,
    target: Target,
}

#[derive(Debug, Clone, Copy)]
struct NativeNode {
    variable: u32,
    low: NativeEdge,
    high: NativeEdge,
}

struct Parsed {
    root: NativeEdge,
    nodes: FxHashMap<u64, NativeNode>,
}

fn malformed(format: NativeFormat, message: impl Display) -> Error {
    Error::MalformedDump(format!("{format:?} dump: {message}"))
}

impl NativeFormat {
    pub fn translate(self, text: &str) -> Result<NativeDiagram> {
        let parsed = match self {
            NativeFormat::Buddy => parse_buddy(text)?,
            NativeFormat::Cudd => parse_cudd(text)?,
        };
        canonicalize(self, &parsed)
    }
}

fn parse_number<T: std::str::FromStr>(format: NativeFormat, token: &str, what: &str) -> Result<T> {
    token
        .parse::<T>()
        .map_err(|_| malformed(format, format_args!("'{token}' is not a valid {what}")))
}

fn parse_buddy(text: &str) -> Result<Parsed> {
    const FORMAT: NativeFormat = NativeFormat::Buddy;
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());

    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| malformed(FORMAT, "empty dump"))?
        .split_whitespace()
        .collect();

    let terminal = |id: u64| match id {
        0 => Target::Terminal(false),
        1 => Target::Terminal(true),
        id => Target::Node(id),
    };
    let edge = |id: u64| NativeEdge {
        complemented: false,
        target: terminal(id),
    };

    match header.as_slice() {
        ["0", "0", value] => {
            let value: u64 = parse_number(FORMAT, value, "constant")?;
            if value > 1 {
                return Err(malformed(FORMAT, format_args!("constant {value}")));
            }
            Ok(Parsed {
                root: edge(value),
                nodes: FxHashMap::default(),
            })
        }
        [count, varnum] => {
            let count: usize = parse_number(FORMAT, count, "node count")?;
            let varnum: usize = parse_number(FORMAT, varnum, "variable count")?;

            if varnum > 0 {
                let levels = lines
                    .next()
                    .ok_or_else(|| malformed(FORMAT, "missing variable levels"))?;
                if levels.split_whitespace().count() != varnum {
                    return Err(malformed(
                        FORMAT,
                        format_args!("expected {varnum} variable levels in '{levels}'"),
                    ));
                }
            }

            let mut nodes = FxHashMap::default();
            let mut root = None;
            for line in lines {
                let fields: Vec<&str> = line.split_whitespace().collect();
                let [id, variable, low, high] = fields.as_slice() else {
                    return Err(malformed(FORMAT, format_args!("node line '{line}'")));
                };
                let id: u64 = parse_number(FORMAT, id, "node id")?;
                nodes.insert(
                    id,
                    NativeNode {
                        variable: parse_number(FORMAT, variable, "variable")?,
                        low: edge(parse_number(FORMAT, low, "node id")?),
                        high: edge(parse_number(FORMAT, high, "node id")?),
                    },
                );
                root = Some(id);
            }

            if nodes.len() != count {
                return Err(malformed(
                    FORMAT,
                    format_args!("header announces {count} nodes but {} follow", nodes.len()),
                ));
            }

            let root = root.ok_or_else(|| malformed(FORMAT, "no node lines"))?;
            Ok(Parsed {
                root: edge(root),
                nodes,
            })
        }
        _ => Err(malformed(FORMAT, format_args!("header '{}'", header.join(" ")))),
    }
}

/// Value of a CUDD edge field: `[!]0x<hex>` for nodes, a number for constants.
fn cudd_edge(value: &str) -> Result<NativeEdge> {
    const FORMAT: NativeFormat = NativeFormat::Cudd;
    let (complemented, value) = match value.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, value),
    };

    let target = if let Some(hex) = value.strip_prefix("0x") {
        Target::Node(
            u64::from_str_radix(hex, 16)
                .map_err(|_| malformed(FORMAT, format_args!("'{value}' is not a node id")))?,
        )
    } else {
        let constant: f64 = parse_number(FORMAT, value, "constant")?;
        Target::Terminal(constant != 0.0)
    };

    Ok(NativeEdge {
        complemented,
        target,
    })
}

fn parse_cudd(text: &str) -> Result<Parsed> {
    const FORMAT: NativeFormat = NativeFormat::Cudd;
    let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());

    let header = lines
        .next()
        .ok_or_else(|| malformed(FORMAT, "empty dump"))?;
    let Some(summary) = header.strip_prefix(':') else {
        return Err(malformed(FORMAT, format_args!("header '{header}'")));
    };
    // Logic zero gets this line only, with neither counts nor node lines.
    if summary.trim() == "is the zero DD" {
        return Ok(Parsed {
            root: NativeEdge {
                complemented: false,
                target: Target::Terminal(false),
            },
            nodes: FxHashMap::default(),
        });
    }
    let _: usize = parse_number(
        FORMAT,
        summary.split_whitespace().next().unwrap_or_default(),
        "node count",
    )?;

    let mut nodes = FxHashMap::default();
    let mut root = None;

    for line in lines {
        // Fields are `key = value` triples separated by whitespace; an
        // uncomplemented value is preceded by a blank instead of '!'.
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut fields = FxHashMap::default();
        let mut idx = 0;
        while idx < tokens.len() {
            match (tokens.get(idx), tokens.get(idx + 1), tokens.get(idx + 2)) {
                (Some(key), Some(&"="), Some(value)) => {
                    fields.insert(*key, *value);
                    idx += 3;
                }
                _ => return Err(malformed(FORMAT, format_args!("line '{line}'"))),
            }
        }

        let id = fields
            .get("ID")
            .ok_or_else(|| malformed(FORMAT, format_args!("line '{line}' has no ID")))?;
        let id = cudd_edge(id)?;

        if let Some(value) = fields.get("value") {
            // A constant only gets its own line when it is the root.
            let constant = cudd_edge(value)?;
            if root.is_none() {
                root = Some(NativeEdge {
                    complemented: id.complemented,
                    target: constant.target,
                });
            }
            continue;
        }

        let Target::Node(native_id) = id.target else {
            return Err(malformed(FORMAT, format_args!("line '{line}' has a constant ID")));
        };
        if root.is_none() {
            root = Some(id);
        }

        let get = |key: &str| {
            fields
                .get(key)
                .copied()
                .ok_or_else(|| malformed(FORMAT, format_args!("line '{line}' has no {key}")))
        };
        nodes.insert(
            native_id,
            NativeNode {
                variable: parse_number(FORMAT, get("index")?, "index")?,
                low: cudd_edge(get("E")?)?,
                high: cudd_edge(get("T")?)?,
            },
        );
    }

    let root = root.ok_or_else(|| malformed(FORMAT, "no ID lines"))?;
    Ok(Parsed { root, nodes })
}

fn canonicalize(format: NativeFormat, parsed: &Parsed) -> Result<NativeDiagram> {
    let mut ids: FxHashMap<u64, usize> = FxHashMap::default();
    let mut pending: FxHashSet<u64> = FxHashSet::default();
    let mut nodes = Vec::with_capacity(parsed.nodes.len());

    let resolve = |ids: &FxHashMap<u64, usize>, edge: NativeEdge| -> Result<Edge> {
        let id = match edge.target {
            Target::Terminal(false) => FALSE_ID,
            Target::Terminal(true) => TRUE_ID,
            Target::Node(native) => *ids
                .get(&native)
                .ok_or_else(|| malformed(format, format_args!("node 0x{native:x} is missing")))?,
        };
        Ok(Edge::new(edge.complemented, id))
    };

    if let Target::Node(root) = parsed.root.target {
        let mut stack = vec![(root, false)];
        while let Some((native, expanded)) = stack.pop() {
            if ids.contains_key(&native) {
                continue;
            }
            let node = parsed
                .nodes
                .get(&native)
                .ok_or_else(|| malformed(format, format_args!("node 0x{native:x} is missing")))?;

            if expanded {
                pending.remove(&native);
                let low = resolve(&ids, node.low)?;
                let high = resolve(&ids, node.high)?;
                let id = nodes.len() + 2;
                ids.insert(native, id);
                nodes.push(DumpNode {
                    id,
                    variable: node.variable,
                    low,
                    high,
                });
                continue;
            }

            if !pending.insert(native) {
                return Err(malformed(format, format_args!("cycle through node 0x{native:x}")));
            }
            stack.push((native, true));
            for child in [node.high, node.low] {
                if let Target::Node(child) = child.target {
                    if !ids.contains_key(&child) {
                        stack.push((child, false));
                    }
                }
            }
        }
    }

    Ok(NativeDiagram {
        root: resolve(&ids, parsed.root)?,
        nodes,
    })
}
