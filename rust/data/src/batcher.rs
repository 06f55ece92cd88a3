//! Batch assembly on top of `RecordDataset`.

use ndarray::{Array1, Array2};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{DataError, provider::RecordDataset};

/// One batch of inputs and labels, in sample-major layout.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Array2<f32>,
    pub labels: Array1<u32>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.nrows() == 0
    }
}

/// Anything that can hand out batches forever. Implementations cycle over
/// their backing data rather than running dry.
pub trait BatchSource: Send {
    fn next_batch(&mut self) -> Result<Batch, DataError>;
}

/// Cycling batcher over a `RecordDataset`. When shuffling is on, the visit
/// order is re-drawn each time the cursor wraps.
#[derive(Debug)]
pub struct RecordBatcher {
    dataset: RecordDataset,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
}

impl RecordBatcher {
    pub fn new(
        dataset: RecordDataset,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<Self, DataError> {
        Self::with_seed(dataset, batch_size, shuffle, rand::random())
    }

    /// Deterministic variant, used by tests.
    pub fn with_seed(
        dataset: RecordDataset,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self, DataError> {
        if dataset.is_empty() || batch_size == 0 {
            return Err(DataError::Empty(dataset.split()));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        if shuffle {
            order.shuffle(&mut rng);
        }
        Ok(Self {
            dataset,
            order,
            cursor: 0,
            batch_size,
            shuffle,
            rng,
        })
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn dataset(&self) -> &RecordDataset {
        &self.dataset
    }

    fn next_index(&mut self) -> usize {
        if self.cursor == self.order.len() {
            self.cursor = 0;
            if self.shuffle {
                self.order.shuffle(&mut self.rng);
            }
        }
        let index = self.order[self.cursor];
        self.cursor += 1;
        index
    }
}

impl BatchSource for RecordBatcher {
    fn next_batch(&mut self) -> Result<Batch, DataError> {
        let feature_len = self.dataset.feature_len();
        let mut inputs = Array2::zeros((self.batch_size, feature_len));
        let mut labels = Array1::zeros(self.batch_size);

        for row in 0..self.batch_size {
            let index = self.next_index();
            let (features, label) = self
                .dataset
                .get(index)
                .ok_or(DataError::Empty(self.dataset.split()))?;
            inputs
                .row_mut(row)
                .as_slice_mut()
                .ok_or(DataError::Empty(self.dataset.split()))?
                .copy_from_slice(features);
            labels[row] = label;
        }

        Ok(Batch { inputs, labels })
    }
}
