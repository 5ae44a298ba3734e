use super::{check_completion, returned_len};
use crate::engine::executor::issue;
use crate::error::{DeviceError, DeviceResult};
use crate::scsi::cdb::Cdb;
use crate::scsi::{DataDirection, ScsiTransport};
use serde::Serialize;

const COMMAND: &str = "INQUIRY";
const RESPONSE_LEN: usize = 36;

/// Identification returned by a standard INQUIRY
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InquiryData {
    /// Peripheral device type
    pub pdt: u8,
    pub vendor: String,
    pub product: String,
    pub revision: String,
}

/// Issue a standard INQUIRY
pub fn inquiry<T: ScsiTransport + ?Sized>(transport: &mut T) -> DeviceResult<InquiryData> {
    let mut buffer = [0u8; RESPONSE_LEN];
    let response = issue(
        transport,
        &Cdb::inquiry(RESPONSE_LEN as u16),
        DataDirection::FromDevice,
        &mut buffer,
        false,
    )?;
    check_completion(COMMAND, &response)?;

    let len = returned_len(&response, buffer.len());
    if len < 8 {
        return Err(DeviceError::MalformedResponse { command: COMMAND });
    }
    let data = &buffer[..len];

    Ok(InquiryData {
        pdt: data[0] & 0x1F,
        vendor: ascii_field(data, 8..16),
        product: ascii_field(data, 16..32),
        revision: ascii_field(data, 32..36),
    })
}

/// Space-padded ASCII field, clipped to what the device returned
fn ascii_field(data: &[u8], range: std::ops::Range<usize>) -> String {
    let end = range.end.min(data.len());
    let start = range.start.min(end);
    String::from_utf8_lossy(&data[start..end]).trim().to_string()
}
