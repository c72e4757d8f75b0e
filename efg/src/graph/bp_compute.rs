use ndarray::{Array1, ArrayView1, ArrayView2, Zip};

use super::belief_propagation::PropagationKind;

type Proba = f64;

/// Message sent through `table` by a node whose local belief is `prod`.
/// The sender is on the first axis of `table`.
pub(super) fn message(
    prod: ArrayView1<Proba>,
    table: ArrayView2<Proba>,
    kind: PropagationKind,
) -> Array1<Proba> {
    match kind {
        PropagationKind::SumProduct => prod.dot(&table),
        PropagationKind::MaxProduct => table
            .columns()
            .into_iter()
            .map(|col| {
                col.iter()
                    .zip(prod.iter())
                    .map(|(t, p)| t * p)
                    .fold(0.0, Proba::max)
            })
            .collect(),
    }
}

/// Normalize to a unit sum, None if the mass is zero or not finite.
pub(super) fn normalized(mut distr: Array1<Proba>) -> Option<Array1<Proba>> {
    let total = distr.sum();
    if total.is_finite() && total > 0.0 {
        distr /= total;
        Some(distr)
    } else {
        None
    }
}

pub(super) fn uniform(size: usize) -> Array1<Proba> {
    Array1::from_elem(size, 1.0 / size as Proba)
}

pub(super) fn one_hot(size: usize, value: usize) -> Array1<Proba> {
    let mut res = Array1::zeros(size);
    res[value] = 1.0;
    res
}

pub(super) fn l1_distance(a: ArrayView1<Proba>, b: ArrayView1<Proba>) -> Proba {
    Zip::from(a).and(b).fold(0.0, |acc, x, y| acc + (x - y).abs())
}

/// `(1 - damping) * new + damping * old`, in place in `new`.
pub(super) fn damp(new: &mut Array1<Proba>, old: ArrayView1<Proba>, damping: Proba) {
    Zip::from(new)
        .and(old)
        .for_each(|n, o| *n = (1.0 - damping) * *n + damping * o);
}

/// Index of the first maximum.
pub(super) fn argmax(distr: ArrayView1<Proba>) -> usize {
    distr
        .iter()
        .enumerate()
        .fold((0, Proba::NEG_INFINITY), |(best, max), (i, v)| {
            if *v > max {
                (i, *v)
            } else {
                (best, max)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn assert_close(got: &Array1<Proba>, expected: &[Proba]) {
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().zip(expected.iter()) {
            assert_relative_eq!(g, e, epsilon = 1e-12);
        }
    }

    #[test]
    fn sum_and_max_messages() {
        let prod = array![0.25, 0.75];
        let table = array![[1.0, 2.0, 0.0], [3.0, 0.0, 1.0]];
        let sum = message(prod.view(), table.view(), PropagationKind::SumProduct);
        assert_close(&sum, &[2.5, 0.5, 0.75]);
        let max = message(prod.view(), table.view(), PropagationKind::MaxProduct);
        assert_close(&max, &[2.25, 0.5, 0.75]);
    }

    #[test]
    fn normalization_and_helpers() {
        assert!(normalized(array![0.0, 0.0]).is_none());
        assert_close(&normalized(array![1.0, 3.0]).unwrap(), &[0.25, 0.75]);
        assert_eq!(argmax(array![0.2, 0.5, 0.5].view()), 1);
        assert_relative_eq!(l1_distance(uniform(2).view(), one_hot(2, 0).view()), 1.0);
        let mut new = array![1.0, 0.0];
        damp(&mut new, array![0.0, 1.0].view(), 0.25);
        assert_close(&new, &[0.75, 0.25]);
    }
}
