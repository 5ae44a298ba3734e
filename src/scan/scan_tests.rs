// Tests for the whole-device scan
//
// Tests cover: range resolution, window clipping, transfer shrinking after
// resource exhaustion, failure reporting, passes, and the signal flags.

use super::*;
use crate::engine::ReadPolicy;
use crate::scsi::sense::FixedSense;
use crate::scsi::transport::MockScsiTransport;
use crate::scsi::{sense_key, CommandResponse, TransportError};
use serial_test::serial;
use std::sync::{Arc, Mutex};

const BS: u32 = 512;

fn capacity(blocks: u64) -> Capacity {
    Capacity { blocks, block_size: BS }
}

fn cdb_lba(cdb: &[u8]) -> u64 {
    u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]) as u64
}

fn cdb_blocks(cdb: &[u8]) -> u32 {
    u16::from_be_bytes([cdb[7], cdb[8]]) as u32
}

/// Transport that accepts every READ and records (lba, blocks)
fn recording_transport() -> (MockScsiTransport, Arc<Mutex<Vec<(u64, u32)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let mut transport = MockScsiTransport::new();
    transport.expect_execute().returning(move |cdb, _, _, _, _| {
        log.lock().unwrap().push((cdb_lba(cdb), cdb_blocks(cdb)));
        Ok(CommandResponse::good())
    });
    (transport, seen)
}

#[derive(Default)]
struct RecordingSink {
    begun: Vec<String>,
    updates: Vec<ProgressSnapshot>,
    reports: usize,
}

impl ProgressSink for RecordingSink {
    fn begin(&mut self, device: &str) {
        self.begun.push(device.to_string());
    }

    fn update(&mut self, snapshot: &ProgressSnapshot) {
        self.updates.push(snapshot.clone());
    }

    fn report(&mut self, _device: &str, _stats: &ReadStats) {
        self.reports += 1;
    }
}

fn plan(start: u64, end: u64, blocks_per_transfer: u32) -> ScanPlan {
    ScanPlan {
        start,
        end,
        blocks_per_transfer,
        passes: 1,
    }
}

fn quiet_runner(plan: ScanPlan) -> ScanRunner {
    ScanRunner::new(plan).with_refresh(Duration::from_secs(3600))
}

// ==================== PLAN RESOLUTION TESTS ====================

#[test]
fn test_resolve_zero_end_means_capacity() {
    assert_eq!(plan(0, 0, 128).resolve(1000).unwrap(), (0, 1000));
    assert_eq!(plan(10, 0, 128).resolve(1000).unwrap(), (10, 1000));
    assert_eq!(plan(10, 500, 128).resolve(1000).unwrap(), (10, 500));
    assert_eq!(plan(0, 1000, 128).resolve(1000).unwrap(), (0, 1000));
}

#[test]
fn test_resolve_rejects_bad_ranges() {
    let rejected = vec![
        plan(0, 1001, 128),
        plan(600, 500, 128),
        plan(2000, 0, 128),
        plan(0, 0, 0),
        plan(0, 0, MAX_BLOCKS_PER_TRANSFER),
        ScanPlan {
            passes: 0,
            ..Default::default()
        },
    ];

    for p in rejected {
        assert!(
            matches!(p.resolve(1000), Err(ReadError::InvalidRange(_))),
            "{:?} should be rejected",
            p
        );
    }
}

#[test]
fn test_default_plan() {
    let p = ScanPlan::default();
    assert_eq!(p.blocks_per_transfer, DEFAULT_BLOCKS_PER_TRANSFER);
    assert_eq!(p.passes, 1);
    assert!(p.validate().is_ok());
}

// ==================== WINDOWING TESTS ====================

#[test]
#[serial]
fn test_windows_cover_range_and_clip_last() {
    crate::reset_interrupted();
    let (transport, seen) = recording_transport();
    let mut ctx = DeviceContext::new(transport, "mock", BS);
    let mut session = Session::default();
    let mut sink = RecordingSink::default();

    let summary = quiet_runner(plan(0, 300, 128))
        .run(&mut ctx, &mut session, capacity(1000), &mut sink)
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(0, 128), (128, 128), (256, 44)]);
    assert_eq!(summary.blocks_scanned, 300);
    assert_eq!(session.stats.blocks_read, 300);
    assert_eq!(sink.begun, vec!["mock".to_string()]);
}

#[test]
#[serial]
fn test_multiple_passes() {
    crate::reset_interrupted();
    let (transport, seen) = recording_transport();
    let mut ctx = DeviceContext::new(transport, "mock", BS);
    let mut session = Session::default();
    let mut sink = RecordingSink::default();

    let summary = quiet_runner(ScanPlan {
        start: 100,
        end: 200,
        blocks_per_transfer: 64,
        passes: 2,
    })
    .run(&mut ctx, &mut session, capacity(1000), &mut sink)
    .unwrap();

    assert_eq!(summary.blocks_scanned, 200);
    assert_eq!(seen.lock().unwrap().len(), 4);

    // Only the end-of-pass updates fire with a long refresh interval
    assert_eq!(sink.updates.len(), 2);
    assert_eq!(sink.updates[0].pass, 1);
    assert_eq!(sink.updates[1].pass, 2);
    assert!(sink.updates.iter().all(|s| s.pass_complete()));
    assert_eq!(sink.updates[1].total_blocks_done(), sink.updates[1].total_blocks());
}

#[test]
#[serial]
fn test_empty_range_reads_nothing() {
    crate::reset_interrupted();
    let transport = MockScsiTransport::new();
    let mut ctx = DeviceContext::new(transport, "mock", BS);
    let mut session = Session::default();

    let summary = quiet_runner(plan(500, 500, 128))
        .run(&mut ctx, &mut session, capacity(1000), &mut NullProgress)
        .unwrap();
    assert_eq!(summary.blocks_scanned, 0);
}

// ==================== RESOURCE EXHAUSTION TESTS ====================

#[test]
#[serial]
fn test_transfer_shrinks_to_reserved_size() {
    crate::reset_interrupted();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let mut transport = MockScsiTransport::new();
    transport.expect_execute().returning(move |cdb, _, _, _, _| {
        let blocks = cdb_blocks(cdb);
        log.lock().unwrap().push(blocks);
        if blocks > 16 {
            Err(TransportError::OutOfMemory)
        } else {
            Ok(CommandResponse::good())
        }
    });
    // Below the floor: 8192 bytes is 16 blocks
    transport.expect_reserved_size().times(1).returning(|| Some(4096));

    let mut ctx = DeviceContext::new(transport, "mock", BS);
    let mut session = Session::default();

    let summary = quiet_runner(plan(0, 64, 64))
        .run(&mut ctx, &mut session, capacity(64), &mut NullProgress)
        .unwrap();

    assert_eq!(summary.blocks_per_transfer, 16);
    assert_eq!(summary.blocks_scanned, 64);
    assert_eq!(*seen.lock().unwrap(), vec![64, 16, 16, 16, 16]);
    // Resource exhaustion is neither retried nor counted
    assert_eq!(session.stats.retries, 0);
    assert_eq!(session.stats.unrecovered_errors, 0);
}

#[test]
#[serial]
fn test_resource_exhausted_without_reserved_size_fails() {
    crate::reset_interrupted();
    let mut transport = MockScsiTransport::new();
    transport
        .expect_execute()
        .times(1)
        .returning(|_, _, _, _, _| Err(TransportError::OutOfMemory));
    transport.expect_reserved_size().times(1).returning(|| None);

    let mut ctx = DeviceContext::new(transport, "mock", BS);
    let mut session = Session::default();

    let result = quiet_runner(plan(0, 64, 64)).run(&mut ctx, &mut session, capacity(64), &mut NullProgress);
    assert!(matches!(
        result,
        Err(ReadError::Failed {
            status: ReadStatus::ResourceExhausted,
            lba: 0
        })
    ));
}

#[test]
#[serial]
fn test_resource_exhausted_when_already_small_fails() {
    crate::reset_interrupted();
    let mut transport = MockScsiTransport::new();
    transport
        .expect_execute()
        .times(1)
        .returning(|_, _, _, _, _| Err(TransportError::OutOfMemory));
    transport.expect_reserved_size().times(1).returning(|| Some(65536));

    let mut ctx = DeviceContext::new(transport, "mock", BS);
    let mut session = Session::default();

    let result = quiet_runner(plan(0, 64, 8)).run(&mut ctx, &mut session, capacity(64), &mut NullProgress);
    assert!(matches!(
        result,
        Err(ReadError::Failed {
            status: ReadStatus::ResourceExhausted,
            ..
        })
    ));
}

// ==================== FAILURE REPORTING TESTS ====================

#[test]
#[serial]
fn test_medium_error_reports_failing_block() {
    crate::reset_interrupted();
    let mut transport = MockScsiTransport::new();
    transport.expect_execute().returning(|cdb, _, _, _, _| {
        let lba = cdb_lba(cdb);
        let end = lba + cdb_blocks(cdb) as u64;
        if (lba..end).contains(&130) {
            let sense = FixedSense::new(sense_key::MEDIUM_ERROR, 0x11, 0).info(130).bytes();
            Ok(CommandResponse::check_condition(&sense))
        } else {
            Ok(CommandResponse::good())
        }
    });

    let mut ctx = DeviceContext::new(transport, "mock", BS).with_policy(ReadPolicy::default());
    let mut session = Session::default();

    let result = quiet_runner(plan(0, 256, 128)).run(&mut ctx, &mut session, capacity(256), &mut NullProgress);
    match result {
        Err(ReadError::Failed { status, lba }) => {
            assert_eq!(status, ReadStatus::MediumHard);
            assert_eq!(lba, 130);
        }
        other => panic!("expected a medium error, got {:?}", other),
    }
    // First window plus the good prefix of the second
    assert_eq!(session.stats.blocks_read, 130);
}

#[test]
#[serial]
fn test_zero_block_size_rejected() {
    crate::reset_interrupted();
    let transport = MockScsiTransport::new();
    let mut ctx = DeviceContext::new(transport, "mock", 0);
    let mut session = Session::default();

    let result = quiet_runner(plan(0, 0, 8)).run(&mut ctx, &mut session, capacity(64), &mut NullProgress);
    assert!(matches!(result, Err(ReadError::InvalidRange(_))));
}

// ==================== SIGNAL FLAG TESTS ====================

#[test]
#[serial]
fn test_interrupt_stops_before_first_window() {
    crate::reset_interrupted();
    crate::set_interrupted();

    // No expectations: a device call would panic
    let transport = MockScsiTransport::new();
    let mut ctx = DeviceContext::new(transport, "mock", BS);
    let mut session = Session::default();

    let result = quiet_runner(plan(0, 64, 8)).run(&mut ctx, &mut session, capacity(64), &mut NullProgress);
    crate::reset_interrupted();

    assert!(matches!(result, Err(ReadError::Interrupted)));
}

#[test]
#[serial]
fn test_progress_request_reports_once() {
    crate::reset_interrupted();
    crate::request_progress();

    let (transport, _) = recording_transport();
    let mut ctx = DeviceContext::new(transport, "mock", BS);
    let mut session = Session::default();
    let mut sink = RecordingSink::default();

    quiet_runner(plan(0, 64, 8))
        .run(&mut ctx, &mut session, capacity(64), &mut sink)
        .unwrap();

    assert_eq!(sink.reports, 1);
    assert!(!crate::take_progress_request());
}
