//! Polyak averaging of parameter sets.
//!
//! The first checkpoint fixes the set of parameters that appear in the
//! result. Every later checkpoint contributes to the parameters it shares
//! with the first one; parameters it lacks keep their previous sum and
//! count, and parameters only it has are ignored. Each parameter is finally
//! divided by the number of checkpoints that contributed to it.
//!
//! ```
//! use polyak_merge::{average, ParameterSet, Tensor};
//!
//! let sets: Vec<ParameterSet> = [2.0_f32, 4.0, 6.0]
//!     .iter()
//!     .map(|&v| {
//!         let mut set = ParameterSet::new();
//!         set.insert_arrays("w", vec![Tensor::from_slice(&[v])]);
//!         set
//!     })
//!     .collect();
//!
//! let averaged = average(&sets).unwrap();
//! assert_eq!(averaged.get("w").unwrap()[0].data.as_slice(), &[4.0]);
//! ```

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{AverageError, AveragedParameterSet, ParamArray, ParameterSet, Result, Tensor};

/// Average a sequence of parameter sets.
///
/// The inputs are not modified; the accumulator starts from a copy of the
/// first set.
pub fn average<A: ParamArray>(parameter_sets: &[ParameterSet<A>]) -> Result<AveragedParameterSet<A>> {
    let (first, rest) = parameter_sets
        .split_first()
        .ok_or(AverageError::NotEnoughCheckpoints {
            expected: 1,
            actual: 0,
        })?;

    let mut running = RunningAverage::new(first.clone());
    for set in rest {
        running.add(set)?;
    }
    running.finish()
}

/// Incremental Polyak average, fed one checkpoint at a time.
#[derive(Debug, Clone)]
pub struct RunningAverage<A = Tensor> {
    sum: ParameterSet<A>,
    counts: HashMap<String, usize>,
    checkpoints: usize,
}

impl<A: ParamArray> RunningAverage<A> {
    /// Start from the reference checkpoint.
    pub fn new(first: ParameterSet<A>) -> Self {
        let counts = first.names().map(|name| (name.to_string(), 1)).collect();
        Self {
            sum: first,
            counts,
            checkpoints: 1,
        }
    }

    /// Accumulate one more checkpoint.
    ///
    /// Every shared parameter is checked before anything is summed, so on
    /// error the accumulator is left exactly as it was.
    pub fn add(&mut self, set: &ParameterSet<A>) -> Result<()> {
        let shared: Vec<&str> = set.names().filter(|name| self.sum.contains(name)).collect();

        for &name in &shared {
            self.check_compatible(name, set)?;
        }

        for name in set.names().filter(|name| !self.sum.contains(name)) {
            debug!(parameter = name, "ignoring parameter absent from reference checkpoint");
        }

        for &name in &shared {
            let (Some(acc), Some(blobs)) = (self.sum.get_mut(name), set.get(name)) else {
                continue;
            };
            for (w, v) in acc.iter_mut().zip(blobs) {
                w.data.add_assign(&v.data);
            }
            *self.counts.entry(name.to_string()).or_insert(0) += 1;
        }

        self.checkpoints += 1;
        debug!(
            checkpoint = self.checkpoints,
            shared = shared.len(),
            "accumulated checkpoint"
        );
        Ok(())
    }

    fn check_compatible(&self, name: &str, set: &ParameterSet<A>) -> Result<()> {
        let (Some(acc), Some(blobs)) = (self.sum.get(name), set.get(name)) else {
            return Ok(());
        };

        if acc.len() != blobs.len() {
            return Err(AverageError::BlobCountMismatch {
                name: name.to_string(),
                expected: acc.len(),
                actual: blobs.len(),
            });
        }

        for (w, v) in acc.iter().zip(blobs) {
            if w.name != v.name {
                return Err(AverageError::BlobNameMismatch {
                    name: name.to_string(),
                    expected: w.name.clone(),
                    actual: v.name.clone(),
                });
            }
            if w.data.shape() != v.data.shape() {
                return Err(AverageError::ShapeMismatch {
                    name: name.to_string(),
                    expected: w.data.shape().to_vec(),
                    actual: v.data.shape().to_vec(),
                });
            }
        }

        Ok(())
    }

    /// Number of checkpoints seen so far, including the reference one.
    pub fn checkpoints(&self) -> usize {
        self.checkpoints
    }

    /// Number of checkpoints that contributed to a parameter.
    pub fn contributions(&self, name: &str) -> Option<usize> {
        self.counts.get(name).copied()
    }

    /// Divide every parameter by its contribution count.
    pub fn finish(self) -> Result<AveragedParameterSet<A>> {
        let Self {
            mut sum,
            counts,
            checkpoints,
        } = self;

        let names: Vec<String> = sum.names().map(str::to_string).collect();
        for name in names {
            let count = counts.get(&name).copied().unwrap_or(0);
            if count == 0 {
                continue;
            }
            if count < checkpoints {
                warn!(
                    parameter = %name,
                    count,
                    checkpoints,
                    "parameter missing from some checkpoints"
                );
            }
            if let Some(blobs) = sum.get_mut(&name) {
                for blob in blobs.iter_mut() {
                    blob.data.div_assign(count as f32);
                }
            }
        }

        Ok(sum)
    }
}
