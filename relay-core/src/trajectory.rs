//! Trajectory columns referenced by items.
use crate::cell_ref::CellRef;
use crate::error::RelayError;
use anyhow::Result;
use std::sync::{Arc, Weak};

/// An ordered run of cells from one column, forming part of an item's
/// trajectory.
///
/// A squeezed column declares itself scalar along the cell axis and must
/// contain exactly one cell. Cells within a column must agree on dtype and
/// shape; columns of the same trajectory are independent of each other.
#[derive(Clone)]
pub struct TrajectoryColumn {
    refs: Vec<Weak<CellRef>>,
    squeeze: bool,
}

impl TrajectoryColumn {
    /// Builds a column over `refs`.
    pub fn new(refs: Vec<Weak<CellRef>>, squeeze: bool) -> Self {
        Self { refs, squeeze }
    }

    /// Builds a squeezed column over a single cell.
    pub fn squeezed(cell: Weak<CellRef>) -> Self {
        Self {
            refs: vec![cell],
            squeeze: true,
        }
    }

    /// Number of referenced cells.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns `true` if the column references no cells.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Whether the column is squeezed to a single cell.
    pub fn squeeze(&self) -> bool {
        self.squeeze
    }

    /// Upgrades every reference, validating the column invariants.
    ///
    /// `column` is only used in error messages. The returned strong
    /// references keep the cells alive for the lifetime of the item.
    pub fn lock_refs(&self, column: usize) -> Result<Vec<Arc<CellRef>>> {
        if self.squeeze && self.refs.len() != 1 {
            return Err(RelayError::InvalidArgument(format!(
                "Error in column {}: column must contain exactly one row when squeeze is set but got {}.",
                column,
                self.refs.len()
            ))
            .into());
        }
        let mut cells = Vec::with_capacity(self.refs.len());
        for r in &self.refs {
            let cell = r.upgrade().ok_or_else(|| {
                RelayError::InvalidArgument(format!(
                    "Error in column {}: column contains an expired cell reference.",
                    column
                ))
            })?;
            cells.push(cell);
        }
        for (i, cell) in cells.iter().enumerate().skip(1) {
            if cell.dtype() != cells[0].dtype() {
                return Err(RelayError::InvalidArgument(format!(
                    "Error in column {}: column references tensors with different dtypes: {} (index 0) != {} (index {}).",
                    column,
                    cells[0].dtype(),
                    cell.dtype(),
                    i
                ))
                .into());
            }
            if cell.shape() != cells[0].shape() {
                return Err(RelayError::InvalidArgument(format!(
                    "Error in column {}: column references tensors with incompatible shapes: {:?} (index 0) not compatible with {:?} (index {}).",
                    column,
                    cells[0].shape(),
                    cell.shape(),
                    i
                ))
                .into());
            }
        }
        Ok(cells)
    }
}
