// Linux SG_IO transport
//
// Issues commands through the sg driver's synchronous SG_IO ioctl. Works on
// sg character devices and, for plain SG_IO, on bsg and block device nodes.

use super::transport::{CommandResponse, DataDirection, ScsiTransport, TransportError};
use super::SENSE_BUFFER_LEN;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SG_IO: libc::c_ulong = 0x2285;
const SG_SET_RESERVED_SIZE: libc::c_ulong = 0x2275;
const SG_GET_RESERVED_SIZE: libc::c_ulong = 0x2272;
const SG_GET_VERSION_NUM: libc::c_ulong = 0x2282;

const SG_DXFER_NONE: libc::c_int = -1;
const SG_DXFER_TO_DEV: libc::c_int = -2;
const SG_DXFER_FROM_DEV: libc::c_int = -3;

const SG_FLAG_DIRECT_IO: libc::c_uint = 0x1;
const SG_INFO_DIRECT_IO_MASK: libc::c_uint = 0x6;
const SG_INFO_DIRECT_IO: libc::c_uint = 0x2;

/// Oldest sg driver version with SG_IO (3.0.0)
const MIN_SG_VERSION: libc::c_int = 30000;

/// `struct sg_io_hdr` from <scsi/sg.h>
#[repr(C)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *const libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

/// A device node driven through SG_IO
#[derive(Debug)]
pub struct SgDevice {
    file: File,
    path: PathBuf,
    /// Whether the node is an sg character device with a reserved buffer
    sg_driver: bool,
}

impl SgDevice {
    /// Open a device node for SG_IO reads
    ///
    /// The node is opened read-only and non-blocking. When `sg_driver` is set
    /// the driver version is checked and the reserved buffer is sized to
    /// `reserve` bytes.
    pub fn open(path: &Path, sg_driver: bool, reserve: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;

        let device = Self {
            file,
            path: path.to_path_buf(),
            sg_driver,
        };

        if sg_driver {
            device.check_version()?;
            if let Err(e) = device.set_reserved_size(reserve) {
                tracing::warn!(device = %path.display(), error = %e, "SG_SET_RESERVED_SIZE failed");
            }
        }

        Ok(device)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_version(&self) -> std::io::Result<()> {
        let mut version: libc::c_int = 0;
        let res = unsafe {
            libc::ioctl(self.file.as_raw_fd(), SG_GET_VERSION_NUM as _, &mut version as *mut libc::c_int)
        };
        if res < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if version < MIN_SG_VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                format!("sg driver version {} predates SG_IO", version),
            ));
        }
        Ok(())
    }

    fn set_reserved_size(&self, size: usize) -> std::io::Result<()> {
        let mut value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
        let res = unsafe {
            libc::ioctl(self.file.as_raw_fd(), SG_SET_RESERVED_SIZE as _, &mut value as *mut libc::c_int)
        };
        if res < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

impl ScsiTransport for SgDevice {
    fn execute(
        &mut self,
        cdb: &[u8],
        direction: DataDirection,
        data: &mut [u8],
        timeout: Duration,
        direct_io: bool,
    ) -> Result<CommandResponse, TransportError> {
        let mut sense = [0u8; SENSE_BUFFER_LEN];

        let (dxfer_direction, dxfer_len, dxferp) = match direction {
            DataDirection::None => (SG_DXFER_NONE, 0, std::ptr::null_mut()),
            DataDirection::FromDevice => (
                SG_DXFER_FROM_DEV,
                data.len() as libc::c_uint,
                data.as_mut_ptr() as *mut libc::c_void,
            ),
            DataDirection::ToDevice => (
                SG_DXFER_TO_DEV,
                data.len() as libc::c_uint,
                data.as_mut_ptr() as *mut libc::c_void,
            ),
        };

        let mut hdr = SgIoHdr {
            interface_id: b'S' as libc::c_int,
            dxfer_direction,
            cmd_len: cdb.len() as libc::c_uchar,
            mx_sb_len: SENSE_BUFFER_LEN as libc::c_uchar,
            iovec_count: 0,
            dxfer_len,
            dxferp,
            cmdp: cdb.as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: timeout.as_millis().min(u32::MAX as u128) as libc::c_uint,
            flags: if direct_io { SG_FLAG_DIRECT_IO } else { 0 },
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        let res = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO as _, &mut hdr as *mut SgIoHdr) };
        if res < 0 {
            return Err(TransportError::from_os_error(std::io::Error::last_os_error()));
        }

        let sense_len = (hdr.sb_len_wr as usize).min(SENSE_BUFFER_LEN);
        let mut response = CommandResponse::good()
            .with_status(hdr.status)
            .with_host_status(hdr.host_status)
            .with_residual(hdr.resid.max(0) as u32)
            .with_direct_io_done(hdr.info & SG_INFO_DIRECT_IO_MASK == SG_INFO_DIRECT_IO);
        response.driver_status = hdr.driver_status;
        response.duration = Duration::from_millis(hdr.duration as u64);
        response.set_sense(&sense[..sense_len]);

        Ok(response)
    }

    fn reserved_size(&mut self) -> Option<usize> {
        if !self.sg_driver {
            return None;
        }
        let mut size: libc::c_int = 0;
        let res = unsafe {
            libc::ioctl(self.file.as_raw_fd(), SG_GET_RESERVED_SIZE as _, &mut size as *mut libc::c_int)
        };
        if res < 0 {
            tracing::warn!(
                device = %self.path.display(),
                error = %std::io::Error::last_os_error(),
                "SG_GET_RESERVED_SIZE failed"
            );
            return None;
        }
        usize::try_from(size).ok()
    }
}
