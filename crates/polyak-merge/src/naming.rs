//! Checkpoint file naming.
//!
//! Training runs snapshot their weights as `{prefix}_iter_{iteration}.{ext}`.
//! Given a prefix and an iteration range this module produces the ordered
//! list of checkpoint paths to average.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{AverageError, Result};

/// Default checkpoint file extension.
pub const DEFAULT_EXTENSION: &str = "safetensors";

/// Range of training iterations, `begin` inclusive and `end` exclusive.
///
/// Parses from `"(begin, end, step)"`, `"(begin, end)"` or `"(end)"`, with or
/// without the parentheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IterRange {
    begin: i64,
    end: i64,
    step: i64,
}

impl IterRange {
    /// Create a range. `step` must be non-zero.
    pub fn new(begin: i64, end: i64, step: i64) -> Result<Self> {
        if step == 0 {
            return Err(AverageError::InvalidConfig(
                "iteration range step must not be zero".to_string(),
            ));
        }
        Ok(Self { begin, end, step })
    }

    /// First iteration.
    pub fn begin(&self) -> i64 {
        self.begin
    }

    /// Iteration bound, never produced.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Distance between iterations.
    pub fn step(&self) -> i64 {
        self.step
    }

    /// Iterations in order.
    pub fn iterations(&self) -> impl Iterator<Item = i64> {
        let Self { begin, end, step } = *self;
        std::iter::successors(Some(begin), move |&it| it.checked_add(step))
            .take_while(move |&it| if step > 0 { it < end } else { it > end })
    }

    /// Number of iterations in the range, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        let (begin, end, step) = (self.begin as i128, self.end as i128, self.step as i128);
        let (span, stride) = if step > 0 {
            (end - begin, step)
        } else {
            (begin - end, -step)
        };
        if span <= 0 {
            return 0;
        }
        usize::try_from((span + stride - 1) / stride).unwrap_or(usize::MAX)
    }

    /// Whether the range produces no iterations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromStr for IterRange {
    type Err = AverageError;

    fn from_str(s: &str) -> Result<Self> {
        let inner = s.trim();
        let inner = inner
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(inner);

        let mut raw: Vec<&str> = inner.split(',').map(str::trim).collect();
        // A single trailing comma is allowed, as in `(5000,)`.
        if raw.len() > 1 && raw.last().is_some_and(|part| part.is_empty()) {
            raw.pop();
        }
        if raw == [""] {
            raw.clear();
        }

        let parts = raw
            .into_iter()
            .map(|part| {
                part.parse::<i64>().map_err(|_| {
                    AverageError::InvalidConfig(format!(
                        "invalid iteration range '{s}': '{part}' is not an integer"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        match parts.as_slice() {
            [end] => Self::new(0, *end, 1),
            [begin, end] => Self::new(*begin, *end, 1),
            [begin, end, step] => Self::new(*begin, *end, *step),
            _ => Err(AverageError::InvalidConfig(format!(
                "invalid iteration range '{s}': expected (begin, end, step)"
            ))),
        }
    }
}

impl TryFrom<String> for IterRange {
    type Error = AverageError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<IterRange> for String {
    fn from(range: IterRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for IterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.begin, self.end, self.step)
    }
}

/// Checkpoint paths for every iteration in `range`, using the default extension.
pub fn checkpoint_paths(prefix: &str, range: &IterRange) -> Vec<PathBuf> {
    checkpoint_paths_with_extension(prefix, range, DEFAULT_EXTENSION)
}

/// Checkpoint paths for every iteration in `range`.
pub fn checkpoint_paths_with_extension(
    prefix: &str,
    range: &IterRange,
    extension: &str,
) -> Vec<PathBuf> {
    let extension = extension.trim_start_matches('.');
    range
        .iterations()
        .map(|it| PathBuf::from(format!("{prefix}_iter_{it}.{extension}")))
        .collect()
}
