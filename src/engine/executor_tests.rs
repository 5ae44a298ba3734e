/// Tests for the transfer executor and classifier
///
/// This test suite covers:
/// - Mapping of completions to transfer outcomes, including MMC quirks
/// - Unrecovered and recovered error counting
/// - Transparent reissue of interrupted device calls
/// - Resource exhaustion and CDB build failures
use super::executor::{classify, read_low};
use super::{DeviceContext, ReadPolicy, ReadStats, TransferOutcome};
use crate::scsi::sense::FixedSense;
use crate::scsi::transport::MockScsiTransport;
use crate::scsi::{device_type, opcode, sense_key, status, CdbSize, CommandResponse, TransportError};

fn check(sense: FixedSense) -> CommandResponse {
    CommandResponse::check_condition(&sense.bytes())
}

// ============================================================================
// Classification Tests
// ============================================================================

#[test]
fn test_classify_disk_outcomes() {
    let test_cases = vec![
        (CommandResponse::good(), TransferOutcome::Clean),
        (
            CommandResponse::good().with_status(status::CONDITION_MET),
            TransferOutcome::Clean,
        ),
        (
            check(FixedSense::new(sense_key::RECOVERED_ERROR, 0x17, 0).info(55)),
            TransferOutcome::Recovered { error_lba: Some(55) },
        ),
        (
            check(FixedSense::new(sense_key::RECOVERED_ERROR, 0x17, 0)),
            TransferOutcome::Recovered { error_lba: None },
        ),
        (
            check(FixedSense::new(sense_key::UNIT_ATTENTION, 0x29, 0)),
            TransferOutcome::UnitAttention,
        ),
        (
            check(FixedSense::new(sense_key::ABORTED_COMMAND, 0x47, 0)),
            TransferOutcome::AbortedCommand,
        ),
        (
            check(FixedSense::new(sense_key::MEDIUM_ERROR, 0x11, 0).info(102)),
            TransferOutcome::MediumError { error_lba: Some(102) },
        ),
        (
            check(FixedSense::new(sense_key::MEDIUM_ERROR, 0x11, 0).info_unflagged(102)),
            TransferOutcome::MediumError { error_lba: None },
        ),
        (
            check(FixedSense::new(sense_key::HARDWARE_ERROR, 0x44, 0)),
            TransferOutcome::MediumError { error_lba: None },
        ),
        (
            check(FixedSense::new(sense_key::NOT_READY, 0x04, 0)),
            TransferOutcome::NotReady,
        ),
        (
            check(FixedSense::new(sense_key::ILLEGAL_REQUEST, 0x21, 0)),
            TransferOutcome::IllegalRequest { asc: 0x21, ascq: 0 },
        ),
        (
            check(FixedSense::new(sense_key::DATA_PROTECT, 0x27, 0)),
            TransferOutcome::Other,
        ),
        (CommandResponse::good().with_status(status::BUSY), TransferOutcome::Other),
    ];

    for (response, expected) in test_cases {
        assert_eq!(classify(&response, device_type::DISK), expected, "{:?}", response);
    }
}

#[test]
fn test_classify_optical_unflagged_information() {
    let response = check(FixedSense::new(sense_key::MEDIUM_ERROR, 0x11, 0).info_unflagged(300));
    assert_eq!(
        classify(&response, device_type::OPTICAL),
        TransferOutcome::MediumError { error_lba: Some(300) }
    );

    let response = check(FixedSense::new(sense_key::MEDIUM_ERROR, 0x11, 0).info_unflagged(0));
    assert_eq!(
        classify(&response, device_type::OPTICAL),
        TransferOutcome::MediumError { error_lba: None }
    );
}

#[test]
fn test_classify_optical_illegal_mode_for_track() {
    let with_ili = check(FixedSense::new(sense_key::ILLEGAL_REQUEST, 0x64, 0).info(77).ili());
    assert_eq!(
        classify(&with_ili, device_type::OPTICAL),
        TransferOutcome::MediumError { error_lba: Some(77) }
    );

    let without_ili = check(FixedSense::new(sense_key::ILLEGAL_REQUEST, 0x64, 0).info(77));
    assert_eq!(
        classify(&without_ili, device_type::OPTICAL),
        TransferOutcome::MediumError { error_lba: None }
    );

    // Only MMC devices get this treatment
    assert_eq!(
        classify(&with_ili, device_type::DISK),
        TransferOutcome::IllegalRequest { asc: 0x64, ascq: 0 }
    );
}

// ============================================================================
// Executor Tests
// ============================================================================

fn context(transport: MockScsiTransport) -> DeviceContext<MockScsiTransport> {
    DeviceContext::new(transport, "mock", 512)
}

#[test]
fn test_read_low_issues_expected_cdb() {
    let mut transport = MockScsiTransport::new();
    transport
        .expect_execute()
        .withf(|cdb, _, data, timeout, _| {
            cdb.len() == 10
                && cdb[0] == opcode::READ[1]
                && cdb[2..6] == [0, 0, 0, 100]
                && cdb[7..9] == [0, 4]
                && data.len() == 2048
                && timeout.as_secs() == 60
        })
        .times(1)
        .returning(|_, _, data, _, _| {
            data.fill(0xAB);
            Ok(CommandResponse::good())
        });

    let mut ctx = context(transport);
    let mut stats = ReadStats::default();
    let mut buffer = vec![0u8; 2048];

    let outcome = read_low(&mut ctx, &mut stats, 100, 4, &mut buffer, None);
    assert_eq!(outcome, TransferOutcome::Clean);
    assert!(buffer.iter().all(|&b| b == 0xAB));
    assert_eq!(stats, ReadStats::default());
}

#[test]
fn test_read_low_reissues_interrupted_calls() {
    let mut transport = MockScsiTransport::new();
    let mut calls = 0;
    transport.expect_execute().times(4).returning(move |_, _, _, _, _| {
        calls += 1;
        if calls < 4 {
            Err(TransportError::Interrupted)
        } else {
            Ok(CommandResponse::good())
        }
    });

    let mut ctx = context(transport);
    let mut stats = ReadStats::default();
    let mut buffer = vec![0u8; 512];

    assert_eq!(
        read_low(&mut ctx, &mut stats, 0, 1, &mut buffer, None),
        TransferOutcome::Clean
    );
}

#[test]
fn test_read_low_out_of_memory() {
    let mut transport = MockScsiTransport::new();
    transport
        .expect_execute()
        .times(1)
        .returning(|_, _, _, _, _| Err(TransportError::OutOfMemory));

    let mut ctx = context(transport);
    let mut stats = ReadStats::default();
    let mut buffer = vec![0u8; 512];

    assert_eq!(
        read_low(&mut ctx, &mut stats, 0, 1, &mut buffer, None),
        TransferOutcome::ResourceExhausted
    );
    assert_eq!(stats.unrecovered_errors, 0);
}

#[test]
fn test_read_low_io_failure_is_other() {
    let mut transport = MockScsiTransport::new();
    transport.expect_execute().times(1).returning(|_, _, _, _, _| {
        Err(TransportError::Io(std::io::Error::from_raw_os_error(libc::EIO)))
    });

    let mut ctx = context(transport);
    let mut stats = ReadStats::default();
    let mut buffer = vec![0u8; 512];

    assert_eq!(
        read_low(&mut ctx, &mut stats, 0, 1, &mut buffer, None),
        TransferOutcome::Other
    );
    assert_eq!(stats.unrecovered_errors, 1);
}

#[test]
fn test_read_low_counts_errors() {
    let test_cases = vec![
        (FixedSense::new(sense_key::MEDIUM_ERROR, 0x11, 0).info(0), 0u64, 1u64),
        (FixedSense::new(sense_key::NOT_READY, 0x04, 0), 0, 1),
        (FixedSense::new(sense_key::RECOVERED_ERROR, 0x17, 0), 1, 0),
        (FixedSense::new(sense_key::UNIT_ATTENTION, 0x29, 0), 0, 0),
    ];

    for (sense, recovered, unrecovered) in test_cases {
        let mut transport = MockScsiTransport::new();
        let bytes = sense.bytes();
        transport
            .expect_execute()
            .times(1)
            .returning(move |_, _, _, _, _| Ok(CommandResponse::check_condition(&bytes)));

        let mut ctx = context(transport);
        let mut stats = ReadStats::default();
        let mut buffer = vec![0u8; 512];
        read_low(&mut ctx, &mut stats, 0, 1, &mut buffer, None);

        assert_eq!(stats.recovered_errors, recovered, "{:?}", sense);
        assert_eq!(stats.unrecovered_errors, unrecovered, "{:?}", sense);
    }
}

#[test]
fn test_read_low_build_failure_skips_device() {
    // No expectations: any device call would panic
    let transport = MockScsiTransport::new();
    let mut ctx = context(transport)
        .with_cdb_size(CdbSize::Six)
        .with_policy(ReadPolicy {
            fua: true,
            ..Default::default()
        });
    let mut stats = ReadStats::default();
    let mut buffer = vec![0u8; 512];

    assert_eq!(
        read_low(&mut ctx, &mut stats, 0, 1, &mut buffer, None),
        TransferOutcome::SyntaxError
    );
}

#[test]
fn test_read_low_short_buffer_is_syntax_error() {
    let transport = MockScsiTransport::new();
    let mut ctx = context(transport);
    let mut stats = ReadStats::default();
    let mut buffer = vec![0u8; 600];

    assert_eq!(
        read_low(&mut ctx, &mut stats, 0, 2, &mut buffer, None),
        TransferOutcome::SyntaxError
    );
}
