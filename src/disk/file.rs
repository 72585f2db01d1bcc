//! Disk-image block device using positional system calls

use crate::disk::error::{DiskError, DiskResult};
use crate::disk::{BlockDevice, block_offset};
use crate::types::{BSIZE, BlockBuf, BlockNo, DeviceId};
use libc::{self, c_int, c_void, off_t, size_t};
use log::warn;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// One device backed by an image file of `nblocks * BSIZE` bytes
#[derive(Debug)]
pub struct FileDisk {
    dev: DeviceId,
    fd: c_int,
    nblocks: BlockNo,
    path: PathBuf,
}

impl FileDisk {
    /// Creates (or truncates) an image of `nblocks` zeroed blocks
    pub fn create(path: impl AsRef<Path>, dev: DeviceId, nblocks: BlockNo) -> DiskResult<Self> {
        let path = path.as_ref().to_path_buf();
        let fd = open_image(&path, libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC)?;
        let disk = FileDisk {
            dev,
            fd,
            nblocks,
            path,
        };
        let result = unsafe { libc::ftruncate(disk.fd, block_offset(nblocks) as off_t) };
        if result < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(disk)
    }

    /// Opens an existing image; its size determines the block count
    pub fn open(path: impl AsRef<Path>, dev: DeviceId) -> DiskResult<Self> {
        let path = path.as_ref().to_path_buf();
        let fd = open_image(&path, libc::O_RDWR)?;
        let mut disk = FileDisk {
            dev,
            fd,
            nblocks: 0,
            path,
        };
        let end = unsafe { libc::lseek(disk.fd, 0, libc::SEEK_END) };
        if end < 0 {
            return Err(io::Error::last_os_error().into());
        }
        disk.nblocks = (end as u64 / BSIZE as u64) as BlockNo;
        Ok(disk)
    }

    /// Opens the image at `path`, creating `nblocks` zeroed blocks only when
    /// no file exists there yet. An existing image keeps its contents and size.
    pub fn open_or_create(
        path: impl AsRef<Path>,
        dev: DeviceId,
        nblocks: BlockNo,
    ) -> DiskResult<Self> {
        let path = path.as_ref();
        match Self::open(path, dev) {
            Err(DiskError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Self::create(path, dev, nblocks)
            }
            other => other,
        }
    }

    /// Device number served by this image
    #[inline]
    pub fn dev(&self) -> DeviceId {
        self.dev
    }

    /// Blocks in the image
    #[inline]
    pub fn nblocks(&self) -> BlockNo {
        self.nblocks
    }

    /// Image path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, dev: DeviceId, blockno: BlockNo) -> DiskResult<()> {
        if dev != self.dev {
            return Err(DiskError::NoSuchDevice(dev));
        }
        if blockno >= self.nblocks {
            return Err(DiskError::OutOfRange { dev, blockno });
        }
        Ok(())
    }
}

fn open_image(path: &Path, flags: c_int) -> DiskResult<c_int> {
    // CString must outlive the system call
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let fd = unsafe { libc::open(c_path.as_ptr(), flags, 0o644 as libc::c_uint) };
    if fd < 0 {
        Err(io::Error::last_os_error().into())
    } else {
        Ok(fd)
    }
}

impl BlockDevice for FileDisk {
    fn read(&self, dev: DeviceId, blockno: BlockNo, buf: &mut BlockBuf) -> DiskResult<()> {
        self.check(dev, blockno)?;
        let result = unsafe {
            libc::pread(
                self.fd,
                buf.as_mut_ptr() as *mut c_void,
                BSIZE as size_t,
                block_offset(blockno) as off_t,
            )
        };
        if result < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if result as usize != BSIZE {
            return Err(DiskError::ShortTransfer {
                blockno,
                done: result as usize,
                expected: BSIZE,
            });
        }
        Ok(())
    }

    fn write(&self, dev: DeviceId, blockno: BlockNo, buf: &BlockBuf) -> DiskResult<()> {
        self.check(dev, blockno)?;
        let result = unsafe {
            libc::pwrite(
                self.fd,
                buf.as_ptr() as *const c_void,
                BSIZE as size_t,
                block_offset(blockno) as off_t,
            )
        };
        if result < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if result as usize != BSIZE {
            return Err(DiskError::ShortTransfer {
                blockno,
                done: result as usize,
                expected: BSIZE,
            });
        }
        Ok(())
    }
}

impl Drop for FileDisk {
    fn drop(&mut self) {
        if unsafe { libc::fsync(self.fd) } < 0 {
            warn!(
                "fsync {} failed: {}",
                self.path.display(),
                io::Error::last_os_error()
            );
        }
        unsafe {
            libc::close(self.fd);
        }
    }
}
