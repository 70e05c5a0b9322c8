//! Broadcast shape law and its gradient complement.

use proptest::prelude::*;
use tensa_core::{CpuF64, ErrorKind, Tensor};

type T = Tensor<CpuF64>;

/// Right-aligned elementwise max, treating missing dims as 1.
fn right_aligned_max(a: &[usize], b: &[usize]) -> Vec<usize> {
    let n = a.len().max(b.len());
    let at = |s: &[usize], i: usize| if i + s.len() >= n { s[i + s.len() - n] } else { 1 };
    (0..n).map(|i| at(a, i).max(at(b, i))).collect()
}

/// Two shapes derived from a common one by replacing dims with 1 and
/// dropping leading dims, hence always broadcast-compatible.
fn compatible_pair() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    prop::collection::vec(1usize..5, 0..4)
        .prop_flat_map(|full| {
            let n = full.len();
            (
                Just(full),
                prop::collection::vec(any::<bool>(), n),
                prop::collection::vec(any::<bool>(), n),
                0..=n,
                0..=n,
            )
        })
        .prop_map(|(full, ones_a, ones_b, drop_a, drop_b)| {
            let derive = |ones: &[bool], drop: usize| -> Vec<usize> {
                full.iter()
                    .zip(ones)
                    .map(|(&d, &one)| if one { 1 } else { d })
                    .skip(drop)
                    .collect()
            };
            (derive(&ones_a, drop_a), derive(&ones_b, drop_b))
        })
}

proptest! {
    #[test]
    fn broadcast_shape_is_right_aligned_max((a, b) in compatible_pair()) {
        let ta = T::ones(&a);
        let tb = T::full(&b, 2.0);
        let c = &ta + &tb;
        let expected = right_aligned_max(&a, &b);
        prop_assert_eq!(c.dims(), expected.as_slice());
        prop_assert!(c.to_vec().iter().all(|&v| v == 3.0));
    }

    #[test]
    fn incompatible_shapes_fail(
        lead in prop::collection::vec(1usize..4, 0..3),
        (x, y) in (2usize..6, 2usize..6).prop_filter("distinct", |(x, y)| x != y),
    ) {
        let mut a = lead.clone();
        a.push(x);
        let ta = T::ones(&a);
        let tb = T::ones(&[y]);
        for op in [T::add, T::sub, T::mul, T::div] {
            let err = op(&ta, &tb).unwrap_err();
            prop_assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
        }
    }

    #[test]
    fn broadcast_gradient_counts_fan_out((a, b) in compatible_pair()) {
        let ta = T::ones(&a).with_grad();
        let tb = T::ones(&b).with_grad();
        let c = &ta + &tb;
        c.sum().backward().unwrap();
        let per_a = (c.numel() / ta.numel().max(1)) as f64;
        let per_b = (c.numel() / tb.numel().max(1)) as f64;
        prop_assert!(ta.grad_vec().unwrap().iter().all(|&g| g == per_a));
        prop_assert!(tb.grad_vec().unwrap().iter().all(|&g| g == per_b));
    }
}

#[test]
fn test_gradient_broadcast_inverse() {
    let a = T::ones(&[3, 2]).with_grad();
    let b = T::from_vec(vec![5.0, -1.0], &[2]).unwrap().with_grad();
    let c = &a + &b;
    assert_eq!(c.dims(), &[3, 2]);
    c.backward().unwrap();
    assert_eq!(a.grad_vec().unwrap(), vec![1.0; 6]);
    assert_eq!(b.grad_vec().unwrap(), vec![3.0, 3.0]);
}

#[test]
fn test_broadcast_keeps_size_one_layout() {
    // [2,1] * [1,3] -> [2,3]
    let a = T::from_vec(vec![1.0, 2.0], &[2, 1]).unwrap().with_grad();
    let b = T::from_vec(vec![10.0, 20.0, 30.0], &[1, 3]).unwrap().with_grad();
    let c = &a * &b;
    assert_eq!(c.to_vec(), vec![10.0, 20.0, 30.0, 20.0, 40.0, 60.0]);
    c.sum().backward().unwrap();
    assert_eq!(a.grad_vec().unwrap(), vec![60.0, 60.0]);
    assert_eq!(b.grad_vec().unwrap(), vec![3.0, 3.0, 3.0]);
}

#[test]
fn test_scalar_broadcast_division() {
    let a = T::from_vec(vec![2.0, 4.0, 8.0], &[3]).unwrap().with_grad();
    let s = T::scalar(2.0).with_grad();
    let c = &a / &s;
    assert_eq!(c.to_vec(), vec![1.0, 2.0, 4.0]);
    c.sum().backward().unwrap();
    assert_eq!(a.grad_vec().unwrap(), vec![0.5; 3]);
    // d/ds sum(a / s) = -sum(a) / s^2
    assert_eq!(s.grad_vec().unwrap(), vec![-14.0 / 4.0]);
}
