// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use std::{
    fs::File,
    num::NonZeroUsize,
    os::fd::AsFd,
    ptr::NonNull,
    sync::atomic::{AtomicU64, Ordering},
};

use nix::sys::{
    memfd::{memfd_create, MemFdCreateFlag},
    mman::{mmap, munmap, MapFlags, ProtFlags},
};
use tracing::{trace, warn};
use wayland_client::protocol::wl_shm;

use crate::{surface::SurfaceKey, transport::Transport, Error};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    #[default]
    Argb8888,
    Xrgb8888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }

    pub fn wl_format(&self) -> wl_shm::Format {
        match self {
            PixelFormat::Argb8888 => wl_shm::Format::Argb8888,
            PixelFormat::Xrgb8888 => wl_shm::Format::Xrgb8888,
        }
    }

    /// The wl_shm format code.
    pub fn code(&self) -> u32 {
        self.wl_format().into()
    }
}

/// Returns a readable name for a wl_shm format code.
pub fn format_name(code: u32) -> Option<&'static str> {
    match wl_shm::Format::try_from(code).ok()? {
        wl_shm::Format::Argb8888 => Some("ARGB8888"),
        wl_shm::Format::Xrgb8888 => Some("XRGB8888"),
        wl_shm::Format::Rgb565 => Some("RGB565"),
        _ => None,
    }
}

/// wl_shm pool sizes are signed 32-bit.
const MAX_POOL_SIZE: u64 = i32::MAX as u64;

/// The layout of a single buffer, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

impl BufferGeometry {
    pub fn new(size: glam::UVec2, format: PixelFormat) -> Result<Self, Error> {
        Self::scaled(size, 1, format)
    }

    /// The layout for a buffer of logical `size` at `scale`. Fails if the
    /// buffer wouldn't fit in a shm pool.
    pub fn scaled(size: glam::UVec2, scale: u32, format: PixelFormat) -> Result<Self, Error> {
        let too_large = || {
            Error::Allocation(format!(
                "buffer too large: {}x{} at scale {}",
                size.x, size.y, scale
            ))
        };

        let width = size.x.checked_mul(scale).ok_or_else(too_large)?;
        let height = size.y.checked_mul(scale).ok_or_else(too_large)?;
        let stride = width
            .checked_mul(format.bytes_per_pixel())
            .ok_or_else(too_large)?;

        if u64::from(stride) * u64::from(height) > MAX_POOL_SIZE {
            return Err(too_large());
        }

        Ok(Self {
            width,
            height,
            stride,
            format,
        })
    }

    pub fn size_bytes(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

impl PoolId {
    fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies the owner of a buffer object in release events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTag {
    pub surface: SurfaceKey,
    pub pool: PoolId,
}

/// A memory-mapped region holding exactly one buffer.
///
/// The region is exclusively ours until the buffer is attached and
/// committed. After that the pool is in flight, and the compositor may read
/// from it until it sends a release; we neither write to nor unmap an
/// in-flight pool.
pub struct BufferPool<B> {
    id: PoolId,
    geometry: BufferGeometry,
    ptr: Option<NonNull<u8>>,
    buffer: Option<B>,
    in_flight: bool,
}

impl<B: std::fmt::Debug> BufferPool<B> {
    /// Allocates a zeroed shm region for `geometry` and registers it with the
    /// compositor as a single buffer.
    pub fn create<T: Transport<Buffer = B>>(
        transport: &mut T,
        surface: SurfaceKey,
        geometry: BufferGeometry,
    ) -> Result<Self, Error> {
        let size = geometry.size_bytes();
        let len = NonZeroUsize::new(size).ok_or_else(|| {
            Error::Allocation(format!(
                "zero-sized buffer ({}x{})",
                geometry.width, geometry.height
            ))
        })?;

        let fd = memfd_create(c"wevp-shm", MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|err| Error::Allocation(format!("memfd_create: {}", err)))?;

        // Extending the file zero-fills it.
        let file = File::from(fd);
        file.set_len(size as u64)
            .map_err(|err| Error::Allocation(format!("ftruncate: {}", err)))?;

        let ptr = unsafe { map(&file, len)? };

        let id = PoolId::next();
        let tag = BufferTag { surface, pool: id };
        let buffer = match transport.create_buffer(tag, file.as_fd(), &geometry) {
            Ok(buf) => buf,
            Err(err) => {
                unsafe { unmap(ptr, size) };
                return Err(err);
            }
        };

        trace!(
            pool = ?id,
            width = geometry.width,
            height = geometry.height,
            size,
            "created buffer pool"
        );

        // The file is closed here. The mapping stays valid, and the compositor
        // holds its own reference.
        Ok(Self {
            id,
            geometry,
            ptr: Some(ptr),
            buffer: Some(buffer),
            in_flight: false,
        })
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn geometry(&self) -> BufferGeometry {
        self.geometry
    }

    pub fn size_bytes(&self) -> usize {
        self.geometry.size_bytes()
    }

    pub fn buffer(&self) -> Option<&B> {
        self.buffer.as_ref()
    }

    /// The mapped region, for direct pixel writes. Returns None if the pool is
    /// in flight or destroyed.
    pub fn pixels(&mut self) -> Option<&mut [u8]> {
        if self.in_flight {
            return None;
        }

        let ptr = self.ptr?;
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size_bytes()) })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn is_destroyed(&self) -> bool {
        self.ptr.is_none() && self.buffer.is_none()
    }

    /// Marks the pool as handed to the compositor.
    pub fn mark_in_flight(&mut self) {
        self.in_flight = true;
    }

    /// Called when the compositor releases the buffer.
    pub fn release(&mut self) {
        self.in_flight = false;
    }

    /// Unmaps the region and destroys the buffer object. Safe to call more
    /// than once.
    pub fn destroy<T: Transport<Buffer = B>>(&mut self, transport: &mut T) {
        if let Some(ptr) = self.ptr.take() {
            unsafe { unmap(ptr, self.size_bytes()) };
        }

        if let Some(buffer) = self.buffer.take() {
            trace!(pool = ?self.id, "destroying buffer pool");
            transport.destroy_buffer(buffer);
        }

        self.in_flight = false;
    }
}

impl<B> Drop for BufferPool<B> {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            unsafe { unmap(ptr, self.geometry.size_bytes()) };
        }

        if self.buffer.is_some() {
            warn!(pool = ?self.id, "buffer pool dropped without destroying its buffer");
        }
    }
}

unsafe fn map(fd: impl AsFd, len: NonZeroUsize) -> Result<NonNull<u8>, Error> {
    let ptr = mmap(
        None,
        len,
        ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        MapFlags::MAP_SHARED,
        fd,
        0,
    )
    .map_err(|err| Error::Allocation(format!("mmap: {}", err)))?;

    Ok(ptr.cast())
}

unsafe fn unmap(ptr: NonNull<u8>, len: usize) {
    if let Err(err) = munmap(ptr.cast(), len) {
        warn!(%err, "munmap failed");
    }
}
