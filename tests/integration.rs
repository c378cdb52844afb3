//
// imbatch - integration tests exercising the dispatcher end to end
//

use std::path::PathBuf;

use imbatch::{BatchOutput, Config, CropLocation, Dispatcher, Packing, ResizeMode};

fn names(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

// S3: a missing file in the middle of a batch leaves the others intact.
#[test]
fn missing_file_does_not_poison_sibling_items() {
    use imbatch::reader::{FakeReader, Shape};

    let reader = FakeReader::new()
        .with_shape("a.jpg", Shape { h: 64, w: 64, c: 3 })
        .with_shape("c.jpg", Shape { h: 64, w: 64, c: 3 })
        .with_failure("missing.jpg");

    let mut dispatcher = Dispatcher::new(
        std::sync::Arc::new(reader),
        std::sync::Arc::new(imbatch::alloc::DefaultAllocator),
        std::sync::Arc::new(imbatch::device::NullDeviceStreamFactory),
    );

    let mut cfg = Config::new();
    cfg.set_num_threads(2).unwrap();
    let files = names(&["a.jpg", "missing.jpg", "c.jpg"]);

    let output = dispatcher.call(cfg, &files).unwrap().unwrap();
    match output {
        BatchOutput::Individual(results) => {
            assert_eq!(results.len(), 3);
            assert!(results[0].error.is_none());
            assert!(results[0].tensor.is_some());
            assert!(results[1].error.is_some());
            let msg = results[1].error.as_ref().unwrap().to_string();
            assert!(msg.contains("missing.jpg"));
            assert!(results[2].error.is_none());
            assert!(results[2].tensor.is_some());
        }
        _ => panic!("expected individual output"),
    }
}

// S4: a second call with the same filenames does not touch the reader
// again - it just syncs against work already completed.
#[test]
fn repeated_call_is_a_pure_sync_with_no_redecode() {
    let mut dispatcher = Dispatcher::with_fake_reader();
    let mut cfg = Config::new();
    cfg.set_num_threads(3).unwrap();
    let files = names(&["a.jpg", "b.jpg", "c.jpg"]);

    let first = dispatcher.call(cfg.clone(), &files).unwrap();
    assert!(first.is_some());

    // Same filenames, same config: the dispatcher must reuse the batch
    // rather than clearing and re-registering it, and every repeated call
    // must still hand back populated, error-free tensors - not the first
    // call's already-consumed ones.
    for _ in 0..5 {
        let output = dispatcher.call(cfg.clone(), &files).unwrap();
        match output {
            Some(BatchOutput::Individual(results)) => {
                assert_eq!(results.len(), files.len());
                for r in &results {
                    assert!(r.error.is_none());
                    assert!(r.tensor.is_some());
                }
            }
            _ => panic!("expected individual output"),
        }
    }
}

// S6: pack=yes, many files, repeatedly interleaving prefetch-only and
// synced calls must never deadlock and must never leak a borrowed item.
#[test]
fn interleaved_prefetch_and_sync_does_not_deadlock() {
    let mut dispatcher = Dispatcher::with_fake_reader();
    let mut cfg = Config::new();
    cfg.set_num_threads(2).unwrap();
    cfg.set_packing(Packing::Packed).unwrap();
    cfg.set_resize(ResizeMode::Fixed(8, 8)).unwrap();

    let files: Vec<PathBuf> = (0..20).map(|i| PathBuf::from(format!("file-{}.jpg", i))).collect();

    for round in 0..10 {
        let mut prefetch_cfg = cfg.clone();
        prefetch_cfg.set_prefetch(true).unwrap();
        let prefetch_result = dispatcher.call(prefetch_cfg, &files).unwrap();
        assert!(prefetch_result.is_none(), "round {round}: prefetch-only call should return None");

        let output = dispatcher.call(cfg.clone(), &files).unwrap();
        match output {
            Some(BatchOutput::Packed { shape, results, .. }) => {
                assert_eq!(shape, (8, 8, 3, files.len()));
                assert_eq!(results.len(), files.len());
            }
            _ => panic!("round {round}: expected packed output"),
        }
    }
}

// Changing the worker count mid-stream rebuilds the pool without losing
// the ability to serve subsequent batches.
#[test]
fn changing_worker_count_rebuilds_pool_and_keeps_serving() {
    let mut dispatcher = Dispatcher::with_fake_reader();

    let mut cfg = Config::new();
    cfg.set_num_threads(1).unwrap();
    let files = names(&["a.jpg", "b.jpg"]);
    assert!(dispatcher.call(cfg, &files).unwrap().is_some());

    let mut cfg = Config::new();
    cfg.set_num_threads(4).unwrap();
    assert!(dispatcher.call(cfg, &files).unwrap().is_some());
}

// Random crop location and flip produce a deterministic plan when the
// batch RNG is seeded, and the crop rectangle always stays in bounds.
#[test]
fn seeded_random_crop_and_flip_stay_in_bounds_and_are_reproducible() {
    let mut cfg = Config::new();
    cfg.set_resize(ResizeMode::Fixed(32, 32)).unwrap();
    cfg.set_crop_location(CropLocation::Random).unwrap();
    cfg.set_crop_size(0.5, 1.0).unwrap();
    cfg.set_flip(true).unwrap();
    cfg.set_seed(Some(123)).unwrap();

    let files = names(&["a.jpg", "b.jpg", "c.jpg"]);

    let mut d1 = Dispatcher::with_fake_reader();
    let mut d2 = Dispatcher::with_fake_reader();

    let o1 = d1.call(cfg.clone(), &files).unwrap().unwrap();
    let o2 = d2.call(cfg, &files).unwrap().unwrap();

    match (o1, o2) {
        (BatchOutput::Individual(r1), BatchOutput::Individual(r2)) => {
            assert_eq!(r1.len(), r2.len());
            for (a, b) in r1.iter().zip(r2.iter()) {
                assert_eq!(a.tensor, b.tensor);
            }
        }
        _ => panic!("expected individual output"),
    }
}
