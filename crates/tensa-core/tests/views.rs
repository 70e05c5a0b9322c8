use tensa_core::{slice, BufferKind, CpuF32, ErrorKind, NoGradGuard, Tensor};

type T = Tensor<CpuF32>;

fn grid() -> T {
    T::from_vec((1..=16).map(|v| v as f32).collect(), &[4, 4]).unwrap()
}

#[test]
fn test_reduction_round_trip() {
    let a = grid();
    assert_eq!(a.sum_axis(0).unwrap().to_vec(), vec![28.0, 32.0, 36.0, 40.0]);
    assert_eq!(a.sum_axis(1).unwrap().to_vec(), vec![10.0, 26.0, 42.0, 58.0]);

    let both = a.sum_axes(&[0, 1]).unwrap();
    assert!(both.shape().is_scalar());
    assert_eq!(both.item().unwrap(), 136.0);
    assert_eq!(a.sum().item().unwrap(), 136.0);
}

#[test]
fn test_row_view_writes_through() {
    let a = grid();
    let row = a.index(2).unwrap();
    assert_eq!(row.values().kind(), BufferKind::View);
    assert!(row.shares_values_with(&a));

    row.values().set(1, -1.0).unwrap();
    assert_eq!(a.at(&[2, 1]).unwrap(), -1.0);
}

#[test]
fn test_column_copy_is_detached_from_parent() {
    let a = grid();
    let col = a.select(&slice![.., 1]).unwrap();
    assert_eq!(col.to_vec(), vec![2.0, 6.0, 10.0, 14.0]);
    assert!(!col.shares_values_with(&a));

    col.values().set(0, -1.0).unwrap();
    assert_eq!(a.at(&[0, 1]).unwrap(), 2.0);
}

#[test]
fn test_block_selection_contiguity() {
    let a = T::from_vec((0..24).map(|v| v as f32).collect(), &[2, 3, 4]).unwrap();

    // one leading index then a row range: contiguous
    let rows = a.select(&slice![1, 0..2]).unwrap();
    assert!(rows.shares_values_with(&a));
    assert_eq!(rows.dims(), &[2, 4]);
    assert_eq!(rows.to_vec()[0], 12.0);

    // partial range ahead of a partial range: strided
    let block = a.select(&slice![.., 1..3, 0..2]).unwrap();
    assert!(!block.shares_values_with(&a));
    assert_eq!(block.dims(), &[2, 2, 2]);
    assert_eq!(block.to_vec(), vec![4.0, 5.0, 8.0, 9.0, 16.0, 17.0, 20.0, 21.0]);
}

#[test]
fn test_nested_views_share_one_buffer() {
    let a = grid();
    let flat = a.flatten();
    let window = flat.select(&slice![4..8]).unwrap();
    let back = window.view(&[2, 2]).unwrap();
    assert!(back.shares_values_with(&a));

    back.values().set(3, 0.0).unwrap();
    assert_eq!(a.at(&[1, 3]).unwrap(), 0.0);
}

#[test]
fn test_assign_through_view() {
    let a = grid();
    let row = a.index(0).unwrap();
    {
        let _guard = NoGradGuard::new();
        row.assign_(&slice![1..3], &T::scalar(0.0)).unwrap();
    }
    assert_eq!(a.select(&slice![0]).unwrap().to_vec(), vec![1.0, 0.0, 0.0, 4.0]);
}

#[test]
fn test_assign_into_recorded_result_is_rejected() {
    let x = T::ones(&[2]).with_grad();
    let y = x.mul_scalar(2.0);
    let err = y.fill_(0.0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
}

#[test]
fn test_out_of_range_subscripts() {
    let a = grid();
    assert_eq!(a.index(4).unwrap_err().kind(), ErrorKind::IndexOutOfBounds);
    assert_eq!(a.index(-5).unwrap_err().kind(), ErrorKind::IndexOutOfBounds);
    assert_eq!(a.index(-1).unwrap().to_vec(), vec![13.0, 14.0, 15.0, 16.0]);
    assert_eq!(a.sum_axis(2).unwrap_err().kind(), ErrorKind::IndexOutOfBounds);
}

#[test]
fn test_reshape_errors() {
    let a = grid();
    assert_eq!(a.view(&[-1, -1]).unwrap_err().kind(), ErrorKind::AmbiguousShape);
    assert_eq!(a.view(&[3, -1]).unwrap_err().kind(), ErrorKind::ShapeMismatch);
    assert_eq!(a.view(&[8, -1]).unwrap().dims(), &[8, 2]);
}

#[test]
fn test_dropping_source_keeps_view_alive() {
    let row = {
        let a = grid();
        a.index(3).unwrap()
    };
    assert!(row.parent().is_none());
    assert_eq!(row.to_vec(), vec![13.0, 14.0, 15.0, 16.0]);
}
