use std::fmt::Display;

/// Phase in which a variable occurs in a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Positive,
    Negative,
}

impl From<bool> for Polarity {
    /// `true` is the positive phase.
    fn from(value: bool) -> Self {
        if value {
            Polarity::Positive
        } else {
            Polarity::Negative
        }
    }
}

/// Literal in the DIMACS convention: the magnitude is the 1-based variable id,
/// the sign is the polarity.
#[derive(PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Debug, Hash)]
pub struct Literal(i32);

impl Literal {
    /// # Panics
    ///
    /// Panics if `literal` is zero, which DIMACS reserves as the clause
    /// terminator, or `i32::MIN`, which has no negation.
    #[must_use]
    pub fn new(literal: i32) -> Literal {
        assert!(literal != 0, "0 is not a literal");
        assert!(literal != i32::MIN, "{literal} has no negation");
        Literal(literal)
    }

    #[must_use]
    pub fn positive(variable: u32) -> Literal {
        Literal::from_parts(variable, Polarity::Positive)
    }

    #[must_use]
    pub fn negative(variable: u32) -> Literal {
        Literal::from_parts(variable, Polarity::Negative)
    }

    #[must_use]
    pub fn from_parts(variable: u32, polarity: Polarity) -> Literal {
        let magnitude = i32::try_from(variable).unwrap_or(i32::MAX);
        match polarity {
            Polarity::Positive => Literal(magnitude),
            Polarity::Negative => Literal(-magnitude),
        }
    }

    /// 1-based id of the variable.
    #[must_use]
    pub fn variable(self) -> u32 {
        self.0.unsigned_abs()
    }

    #[must_use]
    pub fn polarity(self) -> Polarity {
        Polarity::from(self.0 > 0)
    }

    #[must_use]
    pub fn is_negated(self) -> bool {
        self.0 < 0
    }
}

impl std::ops::Not for Literal {
    type Output = Self;

    fn not(self) -> Self::Output {
        // `new` and `from_parts` never build `i32::MIN`.
        Literal(self.0.checked_neg().unwrap_or(i32::MAX))
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_negated() {
            write!(f, "¬")?;
        }
        write!(f, "x{}", self.variable())
    }
}
