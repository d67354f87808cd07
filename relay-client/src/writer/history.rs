//! Recent reference history of the writer's columns.
use anyhow::Result;
use relay_core::{CellRef, RelayError, TrajectoryColumn};
use std::ops::Range;
use std::sync::Weak;

/// Per column record of the references handed out by `append` during the
/// current episode.
///
/// Steps where the column was absent hold `None`, so every column indexes
/// steps identically regardless of when it first appeared. Entries are weak
/// handles; columns built over evicted entries fail validation at
/// `create_item`.
#[derive(Default)]
pub struct ColumnHistory {
    refs: Vec<Option<Weak<CellRef>>>,
}

impl ColumnHistory {
    pub(crate) fn with_padding(padding: usize) -> Self {
        Self {
            refs: vec![None; padding],
        }
    }

    pub(crate) fn push(&mut self, cell: Option<Weak<CellRef>>) {
        self.refs.push(cell);
    }

    pub(crate) fn clear(&mut self) {
        self.refs.clear();
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns `true` if no steps have been recorded.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// The handle recorded at `step`, if the column had a value there.
    pub fn get(&self, step: usize) -> Option<Weak<CellRef>> {
        self.refs.get(step).cloned().flatten()
    }

    /// Builds a trajectory column over the steps in `range`.
    pub fn column(&self, range: Range<usize>) -> Result<TrajectoryColumn> {
        let mut refs = Vec::with_capacity(range.len());
        for step in range {
            let cell = self.refs.get(step).cloned().flatten().ok_or_else(|| {
                RelayError::InvalidArgument(format!(
                    "step {} has no recorded value for this column.",
                    step
                ))
            })?;
            refs.push(cell);
        }
        Ok(TrajectoryColumn::new(refs, false))
    }

    /// Builds a squeezed single cell column for `step`.
    pub fn at(&self, step: usize) -> Result<TrajectoryColumn> {
        let cell = self.refs.get(step).cloned().flatten().ok_or_else(|| {
            RelayError::InvalidArgument(format!(
                "step {} has no recorded value for this column.",
                step
            ))
        })?;
        Ok(TrajectoryColumn::squeezed(cell))
    }
}
