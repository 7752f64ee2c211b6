//! Seeded train/test partition.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SplitError {
    #[error("Train fraction {0} must lie strictly between 0 and 1.")]
    InvalidFraction(f64),
    #[error("{n} sales cannot be split into two non-empty partitions with train fraction {fraction}.")]
    EmptyPartition { n: usize, fraction: f64 },
}

/// Row indices of the two partitions, each sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Split {
    /// Clones the rows of `items` into the two partitions.
    pub fn apply<T: Clone>(&self, items: &[T]) -> (Vec<T>, Vec<T>) {
        let pick = |rows: &[usize]| -> Vec<T> { rows.iter().map(|&i| items[i].clone()).collect() };
        (pick(&self.train), pick(&self.test))
    }
}

/// Draws `floor(fraction * n)` training rows uniformly without replacement; the
/// rest form the test set. The same seed always gives the same partition.
pub fn train_test_split(n: usize, fraction: f64, seed: u64) -> Result<Split, SplitError> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(SplitError::InvalidFraction(fraction));
    }
    // The tolerance keeps 0.8 * 1000 at 800 despite rounding in the product.
    let n_train = (fraction * n as f64 + 1e-9).floor() as usize;
    if n_train == 0 || n_train >= n {
        return Err(SplitError::EmptyPartition { n, fraction });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = index::sample(&mut rng, n, n_train).into_vec();
    train.sort_unstable();

    let mut in_train = vec![false; n];
    for &i in &train {
        in_train[i] = true;
    }
    let test = (0..n).filter(|&i| !in_train[i]).collect();
    log::info!("Split {n} sales into {n_train} training and {} test rows (seed {seed})", n - n_train);
    Ok(Split { train, test })
}
