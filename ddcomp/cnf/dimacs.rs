//! Token-level reader of DIMACS CNF problem files.
//!
//! Comments (`c ...`) may appear anywhere; `c <id> <description>` names a
//! variable. Clauses are integers terminated by `0` and may span lines. The
//! SATLIB trailer `%` followed by `0` ends the input.
use std::{collections::BTreeMap, io::BufRead, str::SplitWhitespace};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

use crate::cnf::{Clause, Cnf, Literal};

/// The `p cnf <variables> <clauses>` problem line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub variables: usize,
    pub clauses: usize,
}

/// A meaningful line of the input.
enum Line {
    Problem(String),
    Clause(String),
    Trailer,
}

/// Pulls the preamble and then clauses out of a DIMACS stream.
pub struct DimacsReader<'a> {
    reader: &'a mut dyn BufRead,
    line: usize,
    descriptions: BTreeMap<u32, String>,
    preamble: Option<Preamble>,
    /// Integers of the current line not consumed yet.
    tokens: Vec<i32>,
    exhausted: bool,
}

impl<'a> DimacsReader<'a> {
    #[must_use]
    pub fn new(reader: &'a mut dyn BufRead) -> Self {
        DimacsReader {
            reader,
            line: 0,
            descriptions: BTreeMap::new(),
            preamble: None,
            tokens: Vec::new(),
            exhausted: false,
        }
    }

    /// Skip leading comments and read the problem line.
    ///
    /// # Errors
    ///
    /// Fails if the input ends first, if anything but a comment precedes the
    /// problem line, or if the problem line is not `p cnf <int> <int>`.
    pub fn preamble(&mut self) -> Result<Preamble> {
        if let Some(preamble) = self.preamble {
            return Ok(preamble);
        }

        let preamble = match self.next_line()? {
            Some(Line::Problem(text)) => parse_problem(&text)
                .with_context(|| format!("invalid problem line {}", self.line))?,
            Some(Line::Clause(_) | Line::Trailer) => {
                bail!("line {}: expected the problem line 'p cnf VARIABLES CLAUSES'", self.line)
            }
            None => bail!("input has no problem line"),
        };

        self.preamble = Some(preamble);
        Ok(preamble)
    }

    /// The next clause, or `None` at the end of the input.
    pub fn next_clause(&mut self) -> Result<Option<Clause>> {
        if self.preamble.is_none() {
            bail!("clauses requested before the problem line");
        }

        let mut literals = Vec::new();
        loop {
            if let Some(pos) = self.tokens.iter().position(|&token| token == 0) {
                literals.extend(self.tokens.drain(..pos).map(Literal::new));
                self.tokens.remove(0);
                return Ok(Some(Clause::new(literals)));
            }
            literals.extend(self.tokens.drain(..).map(Literal::new));

            if !self.refill()? {
                if literals.is_empty() {
                    return Ok(None);
                }
                warn!(line = self.line, "last clause is not terminated by '0'");
                return Ok(Some(Clause::new(literals)));
            }
        }
    }

    /// Load the integers of the next clause line; `false` once the input is over.
    fn refill(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }

        match self.next_line()? {
            Some(Line::Clause(text)) => {
                self.tokens = text
                    .split_whitespace()
                    .map(|token| match token.parse::<i32>() {
                        Ok(i32::MIN) => {
                            bail!("line {}: literal '{token}' is out of range", self.line)
                        }
                        parsed => parsed
                            .with_context(|| format!("line {}: '{token}' is not a literal", self.line)),
                    })
                    .collect::<Result<_>>()?;
                Ok(true)
            }
            Some(Line::Problem(_)) => bail!("line {}: second problem line", self.line),
            Some(Line::Trailer) => {
                self.exhausted = true;
                match self.next_line()? {
                    Some(Line::Clause(text)) if text.trim() == "0" => Ok(false),
                    None => Ok(false),
                    _ => bail!("line {}: expected '0' after '%'", self.line),
                }
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    /// Next line that is not blank or a comment. Comments are recorded on the way.
    fn next_line(&mut self) -> Result<Option<Line>> {
        let mut buffer = String::new();
        loop {
            buffer.clear();
            let read = self
                .reader
                .read_line(&mut buffer)
                .with_context(|| format!("could not read line {}", self.line + 1))?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;

            let text = buffer.trim();
            if text.is_empty() {
                continue;
            }
            if let Some(comment) = text.strip_prefix('c') {
                self.describe(comment.split_whitespace());
                continue;
            }
            if text == "%" {
                return Ok(Some(Line::Trailer));
            }
            if text.starts_with('p') {
                return Ok(Some(Line::Problem(text.to_owned())));
            }
            return Ok(Some(Line::Clause(text.to_owned())));
        }
    }

    fn describe(&mut self, mut fields: SplitWhitespace<'_>) {
        let (Some(id), Some(description)) = (fields.next(), fields.next()) else {
            return;
        };
        match id.parse::<u32>() {
            Ok(id) if id > 0 => {
                self.descriptions.insert(id, description.to_owned());
            }
            _ => {}
        }
    }

    /// Variable descriptions from `c <id> <desc>` comments seen so far.
    #[must_use]
    pub fn descriptions(&self) -> &BTreeMap<u32, String> {
        &self.descriptions
    }
}

fn parse_problem(text: &str) -> Result<Preamble> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let ["p", format, variables, clauses] = fields.as_slice() else {
        bail!("expected 'p cnf VARIABLES CLAUSES', found '{text}'");
    };
    if *format != "cnf" {
        bail!("format must be 'cnf', found '{format}'");
    }

    Ok(Preamble {
        variables: variables
            .parse()
            .with_context(|| format!("variable count '{variables}'"))?,
        clauses: clauses
            .parse()
            .with_context(|| format!("clause count '{clauses}'"))?,
    })
}

/// Read a whole DIMACS CNF.
///
/// A clause count that disagrees with the problem line is reported but not fatal.
pub fn read(reader: &mut dyn BufRead) -> crate::Result<Cnf> {
    let mut dimacs = DimacsReader::new(reader);
    let preamble = dimacs.preamble()?;

    let mut clauses = Vec::with_capacity(preamble.clauses);
    while let Some(clause) = dimacs.next_clause()? {
        clauses.push(clause);
    }

    if clauses.len() != preamble.clauses {
        warn!(
            declared = preamble.clauses,
            parsed = clauses.len(),
            "clause count differs from the problem line"
        );
    }
    debug!(variables = preamble.variables, clauses = clauses.len(), "read DIMACS");

    let mut cnf = Cnf::new(preamble.variables, clauses);
    cnf.set_descriptions(dimacs.descriptions().clone());
    Ok(cnf)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{read, DimacsReader, Preamble};
    use crate::cnf::{Clause, Cnf};

    fn parse(contents: &str) -> Cnf {
        read(&mut contents.as_bytes()).unwrap()
    }

    fn clauses(literals: &[&[i32]]) -> Vec<Clause> {
        literals.iter().map(|c| Clause::from(c.to_vec())).collect()
    }

    #[test]
    fn clauses_across_lines() {
        let contents = "c a formula\nc\np  cnf 4   3\n1 3 -4 0 4\n0 2\n-3 0\n";
        let mut input = contents.as_bytes();
        let mut dimacs = DimacsReader::new(&mut input);

        let preamble = dimacs.preamble().unwrap();
        assert_eq!(
            preamble,
            Preamble {
                variables: 4,
                clauses: 3
            }
        );
        assert_eq!(dimacs.preamble().unwrap(), preamble);

        let mut parsed = Vec::new();
        while let Some(clause) = dimacs.next_clause().unwrap() {
            parsed.push(clause);
        }
        assert_eq!(parsed, clauses(&[&[1, 3, -4], &[4], &[2, -3]]));
    }

    #[test]
    fn satlib_trailer() {
        let cnf = parse("p cnf 4 2\n1 3 -4 0\n4 0\n%\n0\n\n");
        assert_eq!(cnf.clauses(), clauses(&[&[1, 3, -4], &[4]]));
    }

    #[test]
    fn variable_descriptions() {
        let cnf = parse("c 1 Car\nc 2 Engine\nc nothing here\np cnf 2 1\nc 3 Late\n-1 2 0\n");

        assert_eq!(cnf.description(1), Some("Car"));
        assert_eq!(cnf.description(2), Some("Engine"));
        assert_eq!(cnf.description(3), Some("Late"));
        assert_eq!(cnf.verbose(), "(¬Car ∨ Engine)");
    }

    #[test]
    fn three_variable_example() {
        let cnf = parse("p cnf 3 2\n1 -2 0\n2 3 0\n");
        assert_eq!(cnf.variable_count(), 3);
        assert_eq!(cnf.clauses(), clauses(&[&[1, -2], &[2, 3]]));
    }

    #[test]
    fn clause_count_mismatch_is_not_fatal() {
        assert_eq!(parse("p cnf 3 5\n1 -2 0\n2 3 0\n").clauses().len(), 2);
    }

    #[test]
    fn tautology_never_reaches_the_cnf() {
        let cnf = parse("p cnf 3 3\n1 -2 0\n2 -2 3 0\n2 3 0\n");
        assert_eq!(cnf.clauses(), clauses(&[&[1, -2], &[2, 3]]));
        assert_eq!(cnf.meta["dropped-tautologies"], "1");
    }

    #[test]
    fn unterminated_last_clause() {
        let cnf = parse("p cnf 2 2\n1 0\n-1 2");
        assert_eq!(cnf.clauses(), clauses(&[&[1], &[-1, 2]]));
    }

    #[test]
    fn invalid_input() {
        for contents in [
            "",
            "1 2 0\n",
            "p dnf 2 1\n1 2 0\n",
            "p cnf 2\n1 2 0\n",
            "p cnf 2 1\n1 x 0\n",
            "p cnf 2 1\n1 2 0\np cnf 2 1\n",
            "p cnf 2 1\n1 2 0\n%\n5\n",
            "p cnf 1 1\n-2147483648 0\n",
            "p cnf 1 1\n2147483648 0\n",
        ] {
            assert!(
                read(&mut contents.as_bytes()).is_err(),
                "{contents:?} should be rejected"
            );
        }
    }
}
