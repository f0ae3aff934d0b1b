//! In-memory sample matrices and mini-batch iteration.

use crate::error::{AeError, Result};
use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;
use rand::seq::SliceRandom;

/// Samples as rows, with optional reconstruction targets of the same shape.
/// Without targets every sample is its own target.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Array2<f32>,
    targets: Option<Array2<f32>>,
}

impl Dataset {
    pub fn new(inputs: Array2<f32>) -> Self {
        Self {
            inputs,
            targets: None,
        }
    }

    pub fn with_targets(inputs: Array2<f32>, targets: Array2<f32>) -> Result<Self> {
        if inputs.dim() != targets.dim() {
            return Err(AeError::shape_mismatch(format!(
                "inputs are {:?} but targets are {:?}",
                inputs.dim(),
                targets.dim()
            )));
        }
        Ok(Self {
            inputs,
            targets: Some(targets),
        })
    }

    /// Build from equally long rows, e.g. a parsed JSON array of spectra.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some(pos) = rows.iter().position(|r| r.len() != width) {
            return Err(AeError::shape_mismatch(format!(
                "sample {pos} has {} values, expected {width}",
                rows[pos].len()
            )));
        }
        let n = rows.len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Ok(Self::new(Array2::from_shape_vec((n, width), flat)?))
    }

    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }

    /// Values per sample.
    pub fn width(&self) -> usize {
        self.inputs.ncols()
    }

    pub fn inputs(&self) -> ArrayView2<'_, f32> {
        self.inputs.view()
    }

    pub fn targets(&self) -> ArrayView2<'_, f32> {
        self.targets.as_ref().unwrap_or(&self.inputs).view()
    }

    /// Batches in order.
    pub fn batches(&self, batch_size: usize) -> Result<BatchIterator<'_>> {
        BatchIterator::new(self, batch_size, (0..self.len()).collect())
    }

    /// Batches in an order drawn from `rng`.
    pub fn shuffled_batches<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Result<BatchIterator<'_>> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        BatchIterator::new(self, batch_size, order)
    }
}

/// One mini-batch, copied out of its dataset.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Array2<f32>,
    pub targets: Array2<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }
}

pub struct BatchIterator<'a> {
    data: &'a Dataset,
    order: Vec<usize>,
    batch_size: usize,
    pos: usize,
}

impl<'a> BatchIterator<'a> {
    fn new(data: &'a Dataset, batch_size: usize, order: Vec<usize>) -> Result<Self> {
        if batch_size == 0 {
            return Err(AeError::config("batch size must be at least 1"));
        }
        Ok(Self {
            data,
            order,
            batch_size,
            pos: 0,
        })
    }
}

impl Iterator for BatchIterator<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.batch_size).min(self.order.len());
        let rows = &self.order[self.pos..end];
        self.pos = end;
        Some(Batch {
            inputs: self.data.inputs().select(Axis(0), rows),
            targets: self.data.targets().select(Axis(0), rows),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.order.len() - self.pos).div_ceil(self.batch_size);
        (left, Some(left))
    }
}
