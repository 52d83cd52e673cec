//! tilegrid integration tests
//!
//! End-to-end runs of the block operations through the public API, checked
//! against the dense reference.

use num_complex::{Complex32, Complex64};
use tilegrid_core::level3::{self, Options};
use tilegrid_core::{
    CopyState, DistributedMatrix, Engine, EngineConfig, EngineError, Location, ProcessGrid, Target, Uplo,
};
use tilegrid_harness::reference;
use tilegrid_harness::{NormCase, OperandGenerator, Syr2kCase};

fn engine(devices: usize) -> Engine {
    let mut config = EngineConfig::default();
    config.runtime.num_threads = 4;
    config.devices.num_devices = devices;
    Engine::new(config).unwrap()
}

// =============================================================================
// Section 1: syr2k on every target
// =============================================================================

mod syr2k_tests {
    use super::*;

    #[test]
    fn test_all_targets_agree_with_reference() {
        let engine = engine(2);
        for uplo in [Uplo::Lower, Uplo::Upper] {
            let case = Syr2kCase::new(37, 19, 8).uplo(uplo).devices(2);
            for target in Target::ALL {
                case.verify::<f64>(&engine, target).unwrap();
                case.verify::<f32>(&engine, target).unwrap();
            }
        }
    }

    #[test]
    fn test_complex_instantiations() {
        let engine = engine(2);
        for uplo in [Uplo::Lower, Uplo::Upper] {
            let case = Syr2kCase::new(21, 10, 4).uplo(uplo).devices(2).seed(3);
            for target in Target::ALL {
                case.verify::<Complex64>(&engine, target).unwrap();
                case.verify::<Complex32>(&engine, target).unwrap();
            }
        }
    }

    #[test]
    fn test_identity_and_ones() {
        // A = I, B = ones: every stored entry of C becomes 2
        let engine = engine(1);
        for target in Target::ALL {
            let a = DistributedMatrix::<f64>::builder(2, 2, 1).devices(1).build().unwrap();
            let b = DistributedMatrix::<f64>::builder(2, 2, 1).devices(1).build().unwrap();
            let c = DistributedMatrix::<f64>::builder(2, 2, 1)
                .symmetric(Uplo::Lower)
                .devices(1)
                .build()
                .unwrap();
            a.from_dense(&[1.0, 0.0, 0.0, 1.0], 2).unwrap();
            b.from_dense(&[1.0; 4], 2).unwrap();
            c.from_dense(&[0.0; 4], 2).unwrap();

            level3::syr2k(&engine, 1.0, &a, &b, 0.0, &c, &Options::with_target(target)).unwrap();
            let out = c.to_dense().unwrap();
            assert_eq!((out[0], out[1], out[3]), (2.0, 2.0, 2.0), "{}", target);
        }
    }

    #[test]
    fn test_single_block_column_of_c() {
        let engine = engine(1);
        let case = Syr2kCase::new(5, 7, 8).devices(1);
        for target in Target::ALL {
            case.verify::<f64>(&engine, target).unwrap();
        }
    }

    #[test]
    fn test_options_priority_and_queue() {
        let mut config = EngineConfig::default();
        config.devices.num_devices = 1;
        config.devices.queues_per_device = 3;
        let engine = Engine::new(config).unwrap();

        let n = 6;
        let mut source = OperandGenerator::new(11);
        let (da, db): (Vec<f64>, Vec<f64>) = (source.dense(n, 2), source.dense(n, 2));
        let a = DistributedMatrix::<f64>::builder(n, 2, 2).devices(1).build().unwrap();
        let b = DistributedMatrix::<f64>::builder(n, 2, 2).devices(1).build().unwrap();
        let c = DistributedMatrix::<f64>::builder(n, n, 2)
            .symmetric(Uplo::Lower)
            .devices(1)
            .build()
            .unwrap();
        a.from_dense(&da, n).unwrap();
        b.from_dense(&db, n).unwrap();
        c.from_dense(&vec![0.0; n * n], n).unwrap();

        let opts = Options {
            target: Target::Devices,
            priority: 5,
            queue_index: 2,
            ..Options::default()
        };
        level3::syr2k(&engine, 1.0, &a, &b, 0.0, &c, &opts).unwrap();
        assert!(engine.queue(0, 2).unwrap().completed() > 0);
        assert_eq!(engine.queue(0, 0).unwrap().completed(), 0);

        let mut want = vec![0.0; n * n];
        reference::syr2k(Uplo::Lower, n, 2, 1.0, &da, &db, 0.0, &mut want);
        let got = c.to_dense().unwrap();
        assert!(reference::max_error(Uplo::Lower, n, &got, &want) < 1e-12);
    }
}

// =============================================================================
// Section 2: Tile lifetime and failures
// =============================================================================

mod lifetime_tests {
    use super::*;

    #[test]
    fn test_holds_balanced_and_device_copies_released() {
        let engine = engine(2);
        let n = 12;
        let mut source = OperandGenerator::new(5);
        let (da, db): (Vec<f64>, Vec<f64>) = (source.dense(n, 3), source.dense(n, 3));

        for target in Target::ALL {
            let a = DistributedMatrix::<f64>::builder(n, 3, 3).devices(2).build().unwrap();
            let b = DistributedMatrix::<f64>::builder(n, 3, 3).devices(2).build().unwrap();
            let c = DistributedMatrix::<f64>::builder(n, n, 3)
                .symmetric(Uplo::Lower)
                .devices(2)
                .build()
                .unwrap();
            a.from_dense(&da, n).unwrap();
            b.from_dense(&db, n).unwrap();

            level3::syr2k(&engine, 1.0, &a, &b, 0.0, &c, &Options::with_target(target)).unwrap();

            for m in [&a, &b] {
                for (i, j) in m.local_tiles() {
                    assert_eq!(m.tile_holds(i, j), 0, "{} holds on ({}, {})", target, i, j);
                    assert_eq!(m.tile_copies(i, j), vec![(Location::Host, CopyState::Modified)]);
                }
            }
        }
    }

    #[test]
    fn test_task_failure_surfaces_after_siblings_ran() {
        // Rank 0 of a 2x1 grid owns tile rows 0 and 2; A and B row 1 are
        // never received, so only C tile (2, 1) fails.
        let engine = engine(0);
        let (n, nb) = (6, 2);
        let grid = ProcessGrid::new(2, 1, 0).unwrap();
        let mut source = OperandGenerator::new(9);
        let (da, db): (Vec<f64>, Vec<f64>) = (source.dense(n, nb), source.dense(n, nb));
        let dc: Vec<f64> = source.symmetric(n, false);

        let a = DistributedMatrix::<f64>::builder(n, nb, nb).grid(grid).build().unwrap();
        let b = DistributedMatrix::<f64>::builder(n, nb, nb).grid(grid).build().unwrap();
        let c = DistributedMatrix::<f64>::builder(n, n, nb)
            .symmetric(Uplo::Lower)
            .grid(grid)
            .build()
            .unwrap();
        a.from_dense(&da, n).unwrap();
        b.from_dense(&db, n).unwrap();
        c.from_dense(&dc, n).unwrap();

        let err = level3::syr2k(&engine, 1.0, &a, &b, 1.0, &c, &Options::default()).unwrap_err();
        assert!(matches!(err, EngineError::Kernel { .. }));
        assert!(matches!(err.root_cause(), EngineError::Resource(_)));

        for m in [&a, &b] {
            for (i, j) in m.local_tiles() {
                assert_eq!(m.tile_holds(i, j), 0);
            }
        }

        // Tile (2, 0) was computed by a sibling task
        let mut want = dc.clone();
        reference::syr2k(Uplo::Lower, n, nb, 1.0, &da, &db, 1.0, &mut want);
        let got = c.to_dense().unwrap();
        for j in 0..2 {
            for i in 4..6 {
                assert!((got[i + j * n] - want[i + j * n]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_disabled_host_batch() {
        let mut config = EngineConfig::default();
        config.batch.host_backend = tilegrid_core::BatchBackend::Disabled;
        let engine = Engine::new(config).unwrap();
        let err = Syr2kCase::new(8, 4, 2)
            .run::<f64>(&engine, Target::HostBatch)
            .unwrap_err();
        assert!(matches!(
            err,
            tilegrid_harness::HarnessError::Engine(EngineError::UnsupportedBackend(_))
        ));
        // Other targets are unaffected
        Syr2kCase::new(8, 4, 2).verify::<f64>(&engine, Target::HostNest).unwrap();
    }
}

// =============================================================================
// Section 3: Multi-rank emulation
// =============================================================================

mod distribution_tests {
    use super::*;

    #[test]
    fn test_union_of_ranks_matches_reference() {
        let engine = engine(2);
        for (p, q) in [(2, 1), (2, 2), (1, 3)] {
            for uplo in [Uplo::Lower, Uplo::Upper] {
                let case = Syr2kCase::new(23, 9, 4).uplo(uplo).grid(p, q).devices(2);
                for target in Target::ALL {
                    case.verify::<f64>(&engine, target).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_band_structure() {
        // kl = 2, ku = 0 with 2x2 tiles: diagonal and first sub-diagonal tiles
        let a = DistributedMatrix::<f64>::builder(8, 8, 2).band(2, 0).build().unwrap();
        for j in 0..4 {
            for i in 0..4 {
                assert_eq!(a.tile_exists(i, j), i == j || i == j + 1, "({}, {})", i, j);
            }
        }
        assert_eq!(a.local_tiles().len(), 7);

        // a wider band reaches one more tile diagonal
        let wide = DistributedMatrix::<f64>::builder(8, 8, 2).band(3, 1).build().unwrap();
        assert!(wide.tile_exists(2, 0));
        assert!(wide.tile_exists(0, 1));
        assert!(!wide.tile_exists(0, 2));
        assert!(!wide.tile_exists(3, 0));
    }
}

// =============================================================================
// Section 4: Norms
// =============================================================================

mod norm_tests {
    use super::*;

    #[test]
    fn test_symmetric_norms_all_targets() {
        let engine = engine(2);
        for uplo in [Uplo::Lower, Uplo::Upper] {
            let case = NormCase::new(29, 6).uplo(uplo).devices(2);
            for target in Target::ALL {
                for (kind, rel) in case.run::<f64>(&engine, target).unwrap() {
                    assert!(rel < 1e-12, "{:?} {:?} {}: {}", uplo, kind, target, rel);
                }
            }
        }
    }

    #[test]
    fn test_hermitian_norms_all_targets() {
        let engine = engine(2);
        let case = NormCase::new(17, 4).hermitian(true).devices(2);
        for target in Target::ALL {
            for (kind, rel) in case.run::<Complex64>(&engine, target).unwrap() {
                assert!(rel < 1e-12, "{:?} {}: {}", kind, target, rel);
            }
            for (kind, rel) in case.run::<Complex32>(&engine, target).unwrap() {
                assert!(rel < 1e-4, "{:?} {}: {}", kind, target, rel);
            }
        }
    }

    #[test]
    fn test_norms_combined_across_ranks() {
        let engine = engine(2);
        for (p, q) in [(2, 1), (1, 2), (2, 3)] {
            for uplo in [Uplo::Lower, Uplo::Upper] {
                let case = NormCase::new(19, 4).uplo(uplo).grid(p, q).devices(2);
                for target in Target::ALL {
                    for (kind, rel) in case.run::<f64>(&engine, target).unwrap() {
                        assert!(rel < 1e-12, "{}x{} {:?} {:?} {}: {}", p, q, uplo, kind, target, rel);
                    }
                }
            }
        }
    }

    #[test]
    fn test_hermitian_norms_combined_across_ranks() {
        let engine = engine(2);
        let case = NormCase::new(13, 3).hermitian(true).grid(2, 2).devices(2).seed(4);
        for target in Target::ALL {
            for (kind, rel) in case.run::<Complex64>(&engine, target).unwrap() {
                assert!(rel < 1e-12, "{:?} {}: {}", kind, target, rel);
            }
        }
    }
}
