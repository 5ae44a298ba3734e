/// The device-control call
///
/// One `execute` is one command on the wire: CDB out, optional data phase,
/// status and sense back. Implementations do not retry anything themselves;
/// interrupted and busy conditions are reported as
/// [`TransportError::Interrupted`] so the executor can decide.
use super::sense::{SenseCategory, SenseData};
use super::SENSE_BUFFER_LEN;
use std::time::Duration;
use thiserror::Error;

/// Data phase direction of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    /// No data transfer
    None,
    /// Device to host (reads)
    FromDevice,
    /// Host to device (writes)
    ToDevice,
}

/// Completion of one command as reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// SCSI status byte
    pub status: u8,
    /// Transport (HBA) status
    pub host_status: u16,
    /// Driver status
    pub driver_status: u16,
    sense: [u8; SENSE_BUFFER_LEN],
    sense_len: usize,
    /// Bytes requested but not transferred
    pub residual: u32,
    /// Time the command spent on the device
    pub duration: Duration,
    /// Whether the driver honoured the direct I/O request
    pub direct_io_done: bool,
}

impl CommandResponse {
    /// A GOOD completion with no sense data
    pub fn good() -> Self {
        Self {
            status: super::status::GOOD,
            host_status: 0,
            driver_status: 0,
            sense: [0; SENSE_BUFFER_LEN],
            sense_len: 0,
            residual: 0,
            duration: Duration::ZERO,
            direct_io_done: true,
        }
    }

    /// A CHECK CONDITION completion carrying the given sense bytes
    pub fn check_condition(sense: &[u8]) -> Self {
        let mut response = Self::good();
        response.status = super::status::CHECK_CONDITION;
        response.driver_status = super::sense::DRIVER_SENSE;
        response.set_sense(sense);
        response
    }

    /// Store sense bytes, truncated to the capture area
    pub fn set_sense(&mut self, sense: &[u8]) {
        let len = sense.len().min(SENSE_BUFFER_LEN);
        self.sense[..len].copy_from_slice(&sense[..len]);
        self.sense_len = len;
    }

    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    pub fn with_host_status(mut self, host_status: u16) -> Self {
        self.host_status = host_status;
        self
    }

    pub fn with_direct_io_done(mut self, done: bool) -> Self {
        self.direct_io_done = done;
        self
    }

    pub fn with_residual(mut self, residual: u32) -> Self {
        self.residual = residual;
        self
    }

    /// Sense bytes the driver actually wrote
    pub fn sense(&self) -> SenseData<'_> {
        SenseData::new(&self.sense[..self.sense_len])
    }

    pub fn category(&self) -> SenseCategory {
        SenseCategory::from_completion(
            self.status,
            self.host_status,
            self.driver_status,
            &self.sense[..self.sense_len],
        )
    }
}

/// Failures of the device-control call itself (no completion was produced)
#[derive(Debug, Error)]
pub enum TransportError {
    /// EINTR, EAGAIN or EBUSY; the same call may simply be issued again
    #[error("device call interrupted or busy")]
    Interrupted,

    /// ENOMEM: the driver could not reserve a buffer of the requested size
    #[error("device call could not allocate transfer buffer")]
    OutOfMemory,

    #[error("device call failed: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Map an OS error from the ioctl into the transport taxonomy
    pub fn from_os_error(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EINTR) | Some(libc::EAGAIN) | Some(libc::EBUSY) => TransportError::Interrupted,
            Some(libc::ENOMEM) => TransportError::OutOfMemory,
            _ => TransportError::Io(err),
        }
    }
}

/// An abstract command channel to a single SCSI device
#[cfg_attr(test, mockall::automock)]
pub trait ScsiTransport {
    /// Execute one command
    ///
    /// `data` is the data-phase buffer: filled for [`DataDirection::FromDevice`],
    /// sent for [`DataDirection::ToDevice`], ignored for
    /// [`DataDirection::None`]. `direct_io` requests that the driver transfer
    /// straight into `data`; whether it did is reported in the response.
    fn execute(
        &mut self,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        timeout: Duration,
        direct_io: bool,
    ) -> Result<CommandResponse, TransportError>;

    /// Size of the driver's reserved transfer buffer, if the driver has one
    fn reserved_size(&mut self) -> Option<usize> {
        None
    }
}

impl<T: ScsiTransport + ?Sized> ScsiTransport for &mut T {
    fn execute(
        &mut self,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        timeout: Duration,
        direct_io: bool,
    ) -> Result<CommandResponse, TransportError> {
        (**self).execute(cdb, direction, data, timeout, direct_io)
    }

    fn reserved_size(&mut self) -> Option<usize> {
        (**self).reserved_size()
    }
}

impl<T: ScsiTransport + ?Sized> ScsiTransport for Box<T> {
    fn execute(
        &mut self,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        timeout: Duration,
        direct_io: bool,
    ) -> Result<CommandResponse, TransportError> {
        (**self).execute(cdb, direction, data, timeout, direct_io)
    }

    fn reserved_size(&mut self) -> Option<usize> {
        (**self).reserved_size()
    }
}
