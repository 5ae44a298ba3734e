/// Common test utilities for integration tests
///
/// - A simulated SCSI disk with fault injection
/// - Helpers building device contexts and sessions around it
pub mod mock_device;

use dskread::{DeviceContext, ReadPolicy, RetryCeilings, Session};
use mock_device::MockScsiDisk;

pub const BLOCK_SIZE: u32 = 512;

/// Device context over a simulated disk with the given continue-on-error level
#[allow(dead_code)]
pub fn disk_context(disk: MockScsiDisk, coe: u8) -> DeviceContext<MockScsiDisk> {
    let block_size = disk.block_size;
    let pdt = disk.pdt;
    DeviceContext::new(disk, "sim0", block_size)
        .with_pdt(pdt)
        .with_policy(ReadPolicy {
            coe,
            ..Default::default()
        })
}

#[allow(dead_code)]
pub fn session_with_ceilings(unit_attentions: u32, aborted_commands: u32) -> Session {
    Session::new(RetryCeilings::new(unit_attentions, aborted_commands))
}

#[allow(dead_code)]
pub fn block(buffer: &[u8], index: usize, block_size: u32) -> &[u8] {
    let bs = block_size as usize;
    &buffer[index * bs..(index + 1) * bs]
}
