use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Uniform;
use strided_tensor::{EngineConfig, Manager, MmChunks, Order, Shape, StridedError, Tensor};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn shape(dims: &[usize]) -> Shape {
    Shape::of(dims).unwrap()
}

/// Small threshold so the threaded paths run on test-sized inputs.
fn parallel_manager(threads: usize) -> Manager {
    Manager::with_config(
        EngineConfig::default()
            .with_threads(threads)
            .with_parallel_threshold(512)
            .with_l2_cache_size(1 << 16),
    )
}

fn naive_mm(a: &Tensor<f64>, b: &Tensor<f64>) -> Vec<f64> {
    let (m, n, p) = (a.dim(0), a.dim(1), b.dim(1));
    let av = a.to_vec(Order::C);
    let bv = b.to_vec(Order::C);
    let mut out = vec![0.0; m * p];
    for i in 0..m {
        for k in 0..n {
            let x = av[i * n + k];
            for j in 0..p {
                out[i * p + j] += x * bv[k * p + j];
            }
        }
    }
    out
}

#[test]
fn test_round_trip_all_ranks() {
    init_tracing();
    let m = Manager::default();
    for dims in [vec![7], vec![3, 5], vec![2, 3, 4], vec![2, 1, 3, 2, 2]] {
        for order in [Order::C, Order::F] {
            let a = m.seq::<f64>(shape(&dims), order).unwrap();
            let values = a.to_vec(order);
            let b = m.from_vec(shape(&dims), values, order).unwrap();
            assert!(a.deep_equals(&b, 0.0), "dims {dims:?} order {order:?}");
        }
    }
}

#[test]
fn test_view_transparency() {
    let m = Manager::default();
    let mut base = m.seq::<f64>(shape(&[4, 5]), Order::C).unwrap();

    let mut window = base.narrow(0, true, 1, 3).unwrap().narrow(1, true, 2, 4).unwrap();
    window.fill_(-1.0).unwrap();
    assert_eq!(base.get(&[1, 2]).unwrap(), -1.0);
    assert_eq!(base.get(&[2, 3]).unwrap(), -1.0);
    assert_eq!(base.get(&[0, 2]).unwrap(), 2.0);

    let mut t = base.transpose();
    t.set(&[4, 0], 100.0).unwrap();
    assert_eq!(base.get(&[0, 4]).unwrap(), 100.0);

    let p = base.unsqueeze(0).unwrap().permute(&[2, 0, 1]).unwrap();
    base.set(&[3, 1], 42.0).unwrap();
    assert_eq!(p.get(&[1, 0, 3]).unwrap(), 42.0);
}

#[test]
fn test_reshape_contract() {
    let m = Manager::default();
    let a = m.seq::<f64>(shape(&[4, 6]), Order::C).unwrap();

    let v = a.reshape(&shape(&[2, 2, 6]), Order::C).unwrap();
    assert!(v.shares_storage(&a));
    assert_eq!(v.to_vec(Order::C), a.to_vec(Order::C));

    let cols = a.narrow(1, true, 0, 3).unwrap();
    let r = cols.reshape(&shape(&[12]), Order::C).unwrap();
    assert!(!r.shares_storage(&a));
    assert_eq!(r.to_vec(Order::C), cols.to_vec(Order::C));

    let f = a.reshape(&shape(&[6, 4]), Order::F).unwrap();
    assert_eq!(f.to_vec(Order::F), a.to_vec(Order::F));
}

#[test]
fn test_transpose_involution() {
    let m = Manager::default();
    let a = m
        .random::<f64, _>(shape(&[3, 4, 5]), &mut StdRng::seed_from_u64(11), Order::C)
        .unwrap();
    let tt = a.transpose().transpose();
    assert_eq!(tt.dims(), a.dims());
    assert!(tt.deep_equals(&a, 0.0));
    assert_eq!(a.transpose().dims(), &[5, 4, 3]);
}

#[test]
fn test_broadcast_add() {
    let m = Manager::default();
    let col = m.from_vec(shape(&[3, 1]), vec![1.0, 2.0, 3.0], Order::C).unwrap();
    let row = m.from_vec(shape(&[1, 4]), vec![10.0, 20.0, 30.0, 40.0], Order::C).unwrap();
    let sum = col.add(&row).unwrap();
    assert_eq!(sum.dims(), &[3, 4]);
    for i in 0..3 {
        let v = (i + 1) as f64;
        assert_eq!(
            sum.sel(0, i).unwrap().to_vec(Order::C),
            vec![10.0 + v, 20.0 + v, 30.0 + v, 40.0 + v]
        );
    }
    let bad = m.zeros::<f64>(shape(&[2, 4]), Order::C).unwrap();
    assert!(matches!(col.add(&bad), Err(StridedError::BroadcastIncompatible(_, _))));
}

#[test]
fn test_reduction_values() {
    let m = Manager::default();
    let a = m
        .from_vec(shape(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Order::C)
        .unwrap();
    assert_eq!(a.sum().unwrap(), 21.0);
    assert_eq!(a.mean().unwrap(), 3.5);
    assert_eq!(a.max().unwrap(), 6.0);
    assert_eq!(a.argmax(Order::C), 5);
}

#[test]
fn test_nan_aware_reduction() {
    let m = Manager::default();
    let a = m.from_vec(shape(&[3]), vec![1.0, f64::NAN, 3.0], Order::C).unwrap();
    assert_eq!(a.nan_sum().unwrap(), 4.0);
    assert_eq!(a.nan_count().unwrap(), 1);
    assert!(a.sum().unwrap().is_nan());
}

#[test]
fn test_mm_matches_naive_across_tiles() {
    init_tracing();
    let m = parallel_manager(4);
    let chunks = MmChunks::of(m.config(), std::mem::size_of::<f64>());
    let n = chunks.inner_chunk * 3 + 5;
    let mut rng = StdRng::seed_from_u64(2024);
    let a = m.random::<f64, _>(shape(&[n, n + 7]), &mut rng, Order::C).unwrap();
    let b = m.random::<f64, _>(shape(&[n + 7, n - 3]), &mut rng, Order::F).unwrap();
    for order in [Order::C, Order::F] {
        let c = a.mm(&b, order).unwrap();
        for (x, y) in c.to_vec(Order::C).iter().zip(naive_mm(&a, &b)) {
            assert_relative_eq!(*x, y, max_relative = 1e-9, epsilon = 1e-12);
        }
    }
    let c = a.transpose().t().unwrap().mm(&b, Order::C).unwrap();
    assert_relative_eq!(c.sum().unwrap(), naive_mm(&a, &b).iter().sum::<f64>(), max_relative = 1e-9);
}

#[test]
fn test_sum_tolerant_across_thread_counts() {
    let dist = Uniform::new(-1.0, 1.0);
    let base = Manager::with_config(EngineConfig::default().with_threads(1));
    let a = base
        .random_with::<f64, _, _>(shape(&[301, 257]), &dist, &mut StdRng::seed_from_u64(5), Order::C)
        .unwrap();
    let reference = a.sum().unwrap();
    for threads in [2, 3, 8] {
        let m = parallel_manager(threads);
        let b = m.from_vec(shape(&[301, 257]), a.to_vec(Order::C), Order::C).unwrap();
        assert_relative_eq!(b.sum().unwrap(), reference, epsilon = 1e-9);
        assert_relative_eq!(b.transpose().sum().unwrap(), reference, epsilon = 1e-9);
        assert_relative_eq!(b.var().unwrap(), a.var().unwrap(), epsilon = 1e-12);
    }
}

#[test]
fn test_copy_idempotence() {
    let m = parallel_manager(4);
    let a = m.seq::<f64>(shape(&[67, 45]), Order::C).unwrap();
    for order in [Order::C, Order::F] {
        let once = a.copy(order).unwrap();
        let twice = once.copy(order).unwrap();
        assert!(once.deep_equals(&a, 0.0));
        assert!(twice.deep_equals(&once, 0.0));
        assert_eq!(once.layout().strides(), twice.layout().strides());
        assert_eq!(twice.to_vec(order), once.to_vec(order));
    }
}

#[test]
fn test_large_cross_order_copy_partitioned() {
    init_tracing();
    let m = parallel_manager(4);
    let a = m.seq::<f64>(shape(&[129, 3, 77]), Order::C).unwrap();
    let f = a.copy(Order::F).unwrap();
    assert!(f.layout().is_f_ordered());
    assert_eq!(f.to_vec(Order::C), a.to_vec(Order::C));
    let view = a.narrow(0, true, 10, 100).unwrap().permute(&[2, 0, 1]).unwrap();
    let c = view.copy(Order::C).unwrap();
    assert_eq!(c.to_vec(Order::C), view.to_vec(Order::C));
}

#[test]
fn test_parallel_inplace_ops_and_axis_reduce() {
    let m = parallel_manager(4);
    let mut a = m.seq::<f64>(shape(&[200, 60]), Order::F).unwrap();
    let ones = m.full(shape(&[60]), 1.0, Order::C).unwrap();
    a.add_(&ones).unwrap().mul_scalar_(2.0).unwrap();
    assert_eq!(a.get(&[3, 2]).unwrap(), 2.0 * (3.0 + 2.0 * 200.0 + 1.0));
    let rows = a.sum1d(1, Order::C).unwrap();
    let expected: f64 = (0..60).map(|j| 2.0 * (7.0 + j as f64 * 200.0 + 1.0)).sum();
    assert_relative_eq!(rows.get(&[7]).unwrap(), expected);
    let means = a.mean1d(0, Order::C).unwrap();
    assert_relative_eq!(means.get(&[0]).unwrap(), 2.0 * (99.5 + 1.0));
}

#[test]
fn test_integer_tensors() {
    let m = Manager::default();
    let mut a = m.seq::<i32>(shape(&[3, 3]), Order::C).unwrap();
    assert_eq!(a.sum().unwrap(), 36);
    assert_eq!(a.trace().unwrap(), 12);
    assert!(matches!(a.sqrt_(), Err(StridedError::UnsupportedForDType { .. })));
    let b = a.mm(&m.eye::<i32>(3, Order::C).unwrap(), Order::C).unwrap();
    assert!(b.deep_equals(&a, 0.0));
    let bytes = m.full::<u8>(shape(&[4]), 200, Order::C).unwrap();
    assert_eq!(bytes.cast::<i32>().unwrap().sum().unwrap(), 800);
}

#[test]
fn test_precondition_errors() {
    let m = Manager::default();
    let a = m.zeros::<f64>(shape(&[2, 2]), Order::C).unwrap();
    assert!(a.get(&[2, 0]).is_err());
    assert!(a.permute(&[0, 0]).is_err());
    assert!(matches!(a.narrow(2, true, 0, 1), Err(StridedError::InvalidAxis { .. })));
    assert!(matches!(Shape::of(&[2, 0]), Err(StridedError::InvalidShape(_))));
}
