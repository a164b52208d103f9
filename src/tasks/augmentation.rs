//! Row-mixing augmentations for self-supervised views

use crate::config::AugTask;
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;

/// Build an augmented view of a batch: each row is mixed with a shuffled partner row
pub fn augment<R: Rng + ?Sized>(
    aug: AugTask,
    dense: &Array2<f64>,
    codes: &Array2<usize>,
    lambda: f64,
    rng: &mut R,
) -> (Array2<f64>, Array2<usize>) {
    let mut partners: Vec<usize> = (0..dense.nrows()).collect();
    partners.shuffle(rng);

    let mut dense_out = dense.clone();
    match aug {
        AugTask::Cutmix => {
            for ((i, j), value) in dense_out.indexed_iter_mut() {
                if rng.gen::<f64>() < lambda {
                    *value = dense[[partners[i], j]];
                }
            }
        }
        AugTask::Mixup => {
            for ((i, j), value) in dense_out.indexed_iter_mut() {
                *value = (1.0 - lambda) * *value + lambda * dense[[partners[i], j]];
            }
        }
    }

    // codes cannot be interpolated, so both strategies swap cells
    let mut codes_out = codes.clone();
    for ((i, j), code) in codes_out.indexed_iter_mut() {
        if rng.gen::<f64>() < lambda {
            *code = codes[[partners[i], j]];
        }
    }
    (dense_out, codes_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn inputs() -> (Array2<f64>, Array2<usize>) {
        (
            array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]],
            array![[1usize], [2], [3], [4]],
        )
    }

    #[test]
    fn test_zero_lambda_is_identity() {
        let (dense, codes) = inputs();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        for aug in [AugTask::Cutmix, AugTask::Mixup] {
            let (d, c) = augment(aug, &dense, &codes, 0.0, &mut rng);
            assert_eq!(d, dense);
            assert_eq!(c, codes);
        }
    }

    #[test]
    fn test_cutmix_only_uses_existing_column_values() {
        let (dense, codes) = inputs();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let (d, _) = augment(AugTask::Cutmix, &dense, &codes, 0.5, &mut rng);
        for j in 0..2 {
            let column: Vec<f64> = dense.column(j).to_vec();
            assert!(d.column(j).iter().all(|v| column.contains(v)));
        }
    }

    #[test]
    fn test_mixup_preserves_column_sums() {
        let (dense, codes) = inputs();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
        let (d, _) = augment(AugTask::Mixup, &dense, &codes, 0.3, &mut rng);
        // partners form a permutation, so mixing keeps each column sum
        for j in 0..2 {
            assert!((d.column(j).sum() - dense.column(j).sum()).abs() < 1e-9);
        }
    }
}
