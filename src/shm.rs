//! Low-level POSIX shared memory operations

use rustix::fd::OwnedFd;
use rustix::fs::ftruncate;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::io;
use std::ptr::NonNull;
use tracing::{debug, warn};

/// Handle to a mapped shared memory region
pub(crate) struct SharedRegion {
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping is plain memory; concurrent access to its contents is
// synchronized through the atomics stored in it
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

/// Why a region could not be brought into this address space
#[derive(Debug)]
pub(crate) enum RegionError {
    /// `shm_open`/`fstat`/`ftruncate` failed
    Access(io::Error),
    /// `mmap` failed or the region is empty
    Map(io::Error),
}

impl SharedRegion {
    /// Create a fresh, zeroed, writable region owned by this process.
    ///
    /// A region left behind by a crashed owner is unlinked first; readers
    /// still holding it keep their old mapping.
    pub(crate) fn create(name: &str, size: usize) -> Result<Self, RegionError> {
        let mode = Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::ROTH;
        let flags = ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR;

        let fd = match shm_open(name, flags, mode) {
            Ok(fd) => fd,
            Err(rustix::io::Errno::EXIST) => {
                warn!(region = name, "Replacing stale shared region");
                let _ = shm_unlink(name);
                shm_open(name, flags, mode).map_err(|e| RegionError::Access(e.into()))?
            }
            Err(e) => return Err(RegionError::Access(e.into())),
        };

        if let Err(e) = ftruncate(&fd, size as u64) {
            let _ = shm_unlink(name);
            return Err(RegionError::Access(e.into()));
        }

        let addr = match map(&fd, size, ProtFlags::READ | ProtFlags::WRITE) {
            Ok(addr) => addr,
            Err(e) => {
                let _ = shm_unlink(name);
                return Err(e);
            }
        };

        // Zero initialize
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        debug!(region = name, size, "Created shared region");
        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: true,
        })
    }

    /// Map an existing region read-only
    pub(crate) fn open_read_only(name: &str) -> Result<Self, RegionError> {
        let fd = shm_open(name, ShmOFlags::RDONLY, Mode::empty())
            .map_err(|e| RegionError::Access(e.into()))?;

        let stat = rustix::fs::fstat(&fd).map_err(|e| RegionError::Access(e.into()))?;
        let size = usize::try_from(stat.st_size).unwrap_or(0);
        if size == 0 {
            return Err(RegionError::Map(io::Error::new(
                io::ErrorKind::InvalidData,
                "shared region is empty",
            )));
        }

        let addr = map(&fd, size, ProtFlags::READ)?;

        debug!(region = name, size, "Mapped shared region read-only");
        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    /// Check that a region exists without mapping it
    pub(crate) fn probe(name: &str) -> io::Result<()> {
        shm_open(name, ShmOFlags::RDONLY, Mode::empty())
            .map(drop)
            .map_err(Into::into)
    }

    /// Base address of the mapping
    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Size of the mapping in bytes
    #[inline(always)]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name still refers to the object this region maps
    fn name_is_ours(&self) -> bool {
        let Ok(current) = shm_open(self.name.as_str(), ShmOFlags::RDONLY, Mode::empty()) else {
            return false;
        };
        match (rustix::fs::fstat(&current), rustix::fs::fstat(&self.fd)) {
            (Ok(current), Ok(ours)) => {
                (current.st_dev, current.st_ino) == (ours.st_dev, ours.st_ino)
            }
            _ => false,
        }
    }
}

fn map(fd: &OwnedFd, size: usize, prot: ProtFlags) -> Result<NonNull<u8>, RegionError> {
    let addr = unsafe {
        mmap(std::ptr::null_mut(), size, prot, MapFlags::SHARED, fd, 0)
            .map_err(|e| RegionError::Map(e.into()))?
    };
    NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| RegionError::Map(io::Error::other("mmap returned null")))
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }

        if self.is_owner {
            if self.name_is_ours() {
                let _ = shm_unlink(self.name.as_str());
                debug!(region = %self.name, "Unlinked shared region");
            } else {
                debug!(region = %self.name, "Region name was taken over, leaving it");
            }
        }
    }
}
