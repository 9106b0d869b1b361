//! Sampled models of a compiled formula.
use bitvec::prelude::*;
use std::fmt::Display;
use tabled::{builder::Builder, grid::config::HorizontalLine, settings::Theme};

use crate::cnf::{Literal, Polarity};

/// Satisfying assignments drawn from a diagram.
#[derive(Debug, PartialEq)]
pub struct Samples {
    models: Vec<BitVec>,
    labels: Vec<String>,
}

impl Samples {
    pub(crate) fn new(mut models: Vec<BitVec>, labels: Vec<String>) -> Self {
        models.sort();
        Samples { models, labels }
    }

    /// Replace the `x<id>` column headers, e.g. with DIMACS variable descriptions.
    #[must_use]
    pub fn with_labels(mut self, label: impl Fn(u32) -> String) -> Self {
        self.labels = (1..=self.labels.len())
            .map(|variable| label(u32::try_from(variable).unwrap_or(u32::MAX)))
            .collect();
        self
    }

    /// Assignments indexed by zero-based variable, sorted.
    #[must_use]
    pub fn models(&self) -> &[BitVec] {
        &self.models
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// A model as DIMACS literals.
    #[must_use]
    pub fn literals(model: &BitSlice) -> Vec<Literal> {
        model
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                let variable = u32::try_from(idx + 1).unwrap_or(u32::MAX);
                Literal::from_parts(variable, Polarity::from(*value))
            })
            .collect()
    }
}

impl Display for Samples {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(self.labels.iter().cloned());

        for model in &self.models {
            builder.push_record(
                model
                    .iter()
                    .map(|assignment| if *assignment { "1" } else { "0" }),
            );
        }

        let mut style = Theme::default();
        style.insert_horizontal_line(1, HorizontalLine::full('-', '-', ' ', ' '));
        let output = builder.build().with(style).to_string();
        write!(f, "{output}")
    }
}
