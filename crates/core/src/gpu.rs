//! GPU device, stream and buffer management
//!
//! This module wraps cudarc so the batch engine deals in four owning types:
//! - [`GpuDevice`]: one accelerator context, selected by ordinal
//! - [`GpuStream`]: the command stream a batch enqueues all of its work on
//! - [`DeviceBuffer`]: accelerator-resident memory
//! - [`HostBuffer`]: page-locked host staging memory
//!
//! Without the `cuda` feature the same API is backed by host `Vec`s and every
//! stream operation completes eagerly, in call order. That keeps the
//! same-stream ordering guarantee and lets the whole pipeline run without an
//! accelerator.

#[cfg(feature = "cuda")]
use std::sync::Arc;

use crate::error::{PoaError, Result};

#[cfg(feature = "cuda")]
use cudarc::driver::{
    sys, CudaContext, CudaSlice, CudaStream, DevicePtr, DeviceRepr, PinnedHostSlice,
    ValidAsZeroBits,
};

/// Element types that can live in a batch buffer
#[cfg(feature = "cuda")]
pub trait BufferElem: DeviceRepr + ValidAsZeroBits + Copy + Default + Unpin {}
#[cfg(feature = "cuda")]
impl<T: DeviceRepr + ValidAsZeroBits + Copy + Default + Unpin> BufferElem for T {}

/// Element types that can live in a batch buffer
#[cfg(not(feature = "cuda"))]
pub trait BufferElem: Copy + Default + Send + Sync {}
#[cfg(not(feature = "cuda"))]
impl<T: Copy + Default + Send + Sync> BufferElem for T {}

/// GPU device wrapper
#[derive(Clone)]
pub struct GpuDevice {
    #[cfg(feature = "cuda")]
    context: Arc<CudaContext>,
    pub device_id: usize,
}

impl GpuDevice {
    /// Open the accelerator with the given ordinal
    #[cfg(feature = "cuda")]
    pub fn new(device_id: usize) -> Result<Self> {
        let context = CudaContext::new(device_id).map_err(|e| {
            PoaError::Gpu(format!("Failed to create CUDA context {}: {:?}", device_id, e))
        })?;
        Ok(Self {
            context,
            device_id,
        })
    }

    #[cfg(not(feature = "cuda"))]
    pub fn new(device_id: usize) -> Result<Self> {
        Ok(Self { device_id })
    }

    /// Number of visible accelerators
    #[cfg(feature = "cuda")]
    pub fn count() -> Result<usize> {
        CudaContext::device_count()
            .map(|n| n as usize)
            .map_err(|e| PoaError::Gpu(format!("Failed to query device count: {:?}", e)))
    }

    #[cfg(not(feature = "cuda"))]
    pub fn count() -> Result<usize> {
        Ok(1)
    }

    /// Make this device current for the calling thread
    #[cfg(feature = "cuda")]
    pub fn bind_to_thread(&self) -> Result<()> {
        self.context
            .bind_to_thread()
            .map_err(|e| PoaError::Gpu(format!("Failed to bind device {}: {:?}", self.device_id, e)))
    }

    #[cfg(not(feature = "cuda"))]
    pub fn bind_to_thread(&self) -> Result<()> {
        Ok(())
    }

    /// The device's default stream
    #[cfg(feature = "cuda")]
    pub fn default_stream(&self) -> GpuStream {
        GpuStream {
            stream: self.context.default_stream(),
            device_id: self.device_id,
        }
    }

    #[cfg(not(feature = "cuda"))]
    pub fn default_stream(&self) -> GpuStream {
        GpuStream {
            device_id: self.device_id,
        }
    }

    /// Create a new non-default stream
    #[cfg(feature = "cuda")]
    pub fn new_stream(&self) -> Result<GpuStream> {
        let stream = self
            .context
            .new_stream()
            .map_err(|e| PoaError::Gpu(format!("Failed to create stream: {:?}", e)))?;
        Ok(GpuStream {
            stream,
            device_id: self.device_id,
        })
    }

    #[cfg(not(feature = "cuda"))]
    pub fn new_stream(&self) -> Result<GpuStream> {
        Ok(self.default_stream())
    }

    /// Allocate zeroed page-locked host memory
    #[cfg(feature = "cuda")]
    pub fn alloc_host<T: BufferElem>(&self, len: usize) -> Result<HostBuffer<T>> {
        // SAFETY: the slice is fully initialized below before it is handed out.
        let mut pinned = unsafe { self.context.alloc_pinned::<T>(len) }
            .map_err(|e| PoaError::Gpu(format!("Failed to allocate pinned host memory: {:?}", e)))?;
        pinned
            .as_mut_slice()
            .map_err(|e| PoaError::Gpu(format!("Failed to map pinned host memory: {:?}", e)))?
            .fill(T::default());
        Ok(HostBuffer { pinned })
    }

    #[cfg(not(feature = "cuda"))]
    pub fn alloc_host<T: BufferElem>(&self, len: usize) -> Result<HostBuffer<T>> {
        Ok(HostBuffer {
            data: vec![T::default(); len],
        })
    }

    /// Get the underlying CudaContext (for module loading)
    #[cfg(feature = "cuda")]
    pub fn cuda_context(&self) -> &Arc<CudaContext> {
        &self.context
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuDevice")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Command stream bound to one device
#[derive(Clone)]
pub struct GpuStream {
    #[cfg(feature = "cuda")]
    stream: Arc<CudaStream>,
    device_id: usize,
}

impl GpuStream {
    /// Ordinal of the device the stream belongs to
    pub fn device_id(&self) -> usize {
        self.device_id
    }

    /// Allocate zeroed device memory
    #[cfg(feature = "cuda")]
    pub fn alloc_zeros<T: BufferElem>(&self, len: usize) -> Result<DeviceBuffer<T>> {
        let slice = self
            .stream
            .alloc_zeros::<T>(len)
            .map_err(|e| PoaError::Gpu(format!("Failed to allocate GPU memory: {:?}", e)))?;
        Ok(DeviceBuffer { slice })
    }

    #[cfg(not(feature = "cuda"))]
    pub fn alloc_zeros<T: BufferElem>(&self, len: usize) -> Result<DeviceBuffer<T>> {
        Ok(DeviceBuffer {
            data: vec![T::default(); len],
        })
    }

    /// Allocate device memory with every element set to `value`
    #[cfg(feature = "cuda")]
    pub fn alloc_filled<T: BufferElem>(&self, len: usize, value: T) -> Result<DeviceBuffer<T>> {
        let slice = self
            .stream
            .clone_htod(&vec![value; len])
            .map_err(|e| PoaError::Gpu(format!("Failed to allocate GPU memory: {:?}", e)))?;
        Ok(DeviceBuffer { slice })
    }

    #[cfg(not(feature = "cuda"))]
    pub fn alloc_filled<T: BufferElem>(&self, len: usize, value: T) -> Result<DeviceBuffer<T>> {
        Ok(DeviceBuffer {
            data: vec![value; len],
        })
    }

    /// Enqueue a host-to-device copy of `src` into the prefix of `dst`
    #[cfg(feature = "cuda")]
    pub fn copy_htod<T: BufferElem>(&self, src: &[T], dst: &mut DeviceBuffer<T>) -> Result<()> {
        check_prefix(src.len(), dst.len())?;
        if src.is_empty() {
            return Ok(());
        }
        let mut view = dst.slice.slice_mut(..src.len());
        self.stream
            .memcpy_htod(src, &mut view)
            .map_err(|e| PoaError::Gpu(format!("Failed to copy to GPU: {:?}", e)))
    }

    #[cfg(not(feature = "cuda"))]
    pub fn copy_htod<T: BufferElem>(&self, src: &[T], dst: &mut DeviceBuffer<T>) -> Result<()> {
        check_prefix(src.len(), dst.len())?;
        dst.data[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Enqueue a zero-fill of the whole device buffer
    #[cfg(feature = "cuda")]
    pub fn zero_device<T: BufferElem>(&self, dst: &mut DeviceBuffer<T>) -> Result<()> {
        self.stream
            .memset_zeros(&mut dst.slice)
            .map_err(|e| PoaError::Gpu(format!("Failed to clear GPU memory: {:?}", e)))
    }

    #[cfg(not(feature = "cuda"))]
    pub fn zero_device<T: BufferElem>(&self, dst: &mut DeviceBuffer<T>) -> Result<()> {
        dst.data.fill(T::default());
        Ok(())
    }

    /// Enqueue a strided device-to-host copy of `rows` rows of `width` bytes.
    ///
    /// Source rows are `src_pitch` bytes apart, destination rows `dst_pitch`.
    #[cfg(feature = "cuda")]
    pub fn copy_rows_dtoh(
        &self,
        src: &DeviceBuffer<u8>,
        src_pitch: usize,
        dst: &mut HostBuffer<u8>,
        dst_pitch: usize,
        width: usize,
        rows: usize,
    ) -> Result<()> {
        check_rows(src.len(), src_pitch, dst.len(), dst_pitch, width, rows)?;

        let (src_ptr, _record_src) = src.slice.device_ptr(&self.stream);
        let dst_ptr = dst
            .pinned
            .as_mut_ptr()
            .map_err(|e| PoaError::Gpu(format!("Failed to map pinned host memory: {:?}", e)))?;

        // SAFETY: both extents were checked above; the pinned destination
        // outlives the copy because the batch synchronizes before reading it.
        unsafe {
            let mut copy: sys::CUDA_MEMCPY2D = std::mem::zeroed();
            copy.srcMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_DEVICE;
            copy.srcDevice = src_ptr;
            copy.srcPitch = src_pitch;
            copy.dstMemoryType = sys::CUmemorytype::CU_MEMORYTYPE_HOST;
            copy.dstHost = dst_ptr as *mut std::ffi::c_void;
            copy.dstPitch = dst_pitch;
            copy.WidthInBytes = width;
            copy.Height = rows;
            sys::cuMemcpy2DAsync_v2(&copy, self.stream.cu_stream())
                .result()
                .map_err(|e| PoaError::Gpu(format!("Failed to copy rows from GPU: {:?}", e)))
        }
    }

    #[cfg(not(feature = "cuda"))]
    pub fn copy_rows_dtoh(
        &self,
        src: &DeviceBuffer<u8>,
        src_pitch: usize,
        dst: &mut HostBuffer<u8>,
        dst_pitch: usize,
        width: usize,
        rows: usize,
    ) -> Result<()> {
        check_rows(src.len(), src_pitch, dst.len(), dst_pitch, width, rows)?;
        for row in 0..rows {
            let from = &src.data[row * src_pitch..row * src_pitch + width];
            dst.data[row * dst_pitch..row * dst_pitch + width].copy_from_slice(from);
        }
        Ok(())
    }

    /// Block until every operation enqueued on the stream has completed
    #[cfg(feature = "cuda")]
    pub fn synchronize(&self) -> Result<()> {
        self.stream
            .synchronize()
            .map_err(|e| PoaError::Gpu(format!("Failed to synchronize stream: {:?}", e)))
    }

    #[cfg(not(feature = "cuda"))]
    pub fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    /// Get the underlying CudaStream (for kernel launches)
    #[cfg(feature = "cuda")]
    pub fn cuda_stream(&self) -> &Arc<CudaStream> {
        &self.stream
    }
}

impl std::fmt::Debug for GpuStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuStream")
            .field("device_id", &self.device_id)
            .finish()
    }
}

fn check_prefix(src_len: usize, dst_len: usize) -> Result<()> {
    if src_len > dst_len {
        return Err(PoaError::Gpu(format!(
            "Copy of {} elements overruns buffer of {}",
            src_len, dst_len
        )));
    }
    Ok(())
}

fn check_rows(
    src_len: usize,
    src_pitch: usize,
    dst_len: usize,
    dst_pitch: usize,
    width: usize,
    rows: usize,
) -> Result<()> {
    if width > src_pitch || width > dst_pitch {
        return Err(PoaError::Gpu(format!(
            "Row width {} exceeds pitch (src {}, dst {})",
            width, src_pitch, dst_pitch
        )));
    }
    if rows * src_pitch > src_len || rows * dst_pitch > dst_len {
        return Err(PoaError::Gpu(format!(
            "Copy of {} rows overruns buffers (src {} bytes, dst {} bytes)",
            rows, src_len, dst_len
        )));
    }
    Ok(())
}

/// Accelerator-resident buffer, freed on drop
pub struct DeviceBuffer<T: BufferElem> {
    #[cfg(feature = "cuda")]
    slice: CudaSlice<T>,
    #[cfg(not(feature = "cuda"))]
    data: Vec<T>,
}

impl<T: BufferElem> DeviceBuffer<T> {
    /// Number of elements
    #[cfg(feature = "cuda")]
    pub fn len(&self) -> usize {
        self.slice.len()
    }

    #[cfg(not(feature = "cuda"))]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes
    pub fn size_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<T>()
    }

    /// Get the underlying GPU data (for kernel arguments)
    #[cfg(feature = "cuda")]
    pub fn cuda_slice(&self) -> &CudaSlice<T> {
        &self.slice
    }

    #[cfg(feature = "cuda")]
    pub fn cuda_slice_mut(&mut self) -> &mut CudaSlice<T> {
        &mut self.slice
    }

    /// Host view of the "device" memory (host backend only)
    #[cfg(not(feature = "cuda"))]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    #[cfg(not(feature = "cuda"))]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: BufferElem> std::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.len())
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

/// Page-locked host staging buffer, freed on drop
pub struct HostBuffer<T: BufferElem> {
    #[cfg(feature = "cuda")]
    pinned: PinnedHostSlice<T>,
    #[cfg(not(feature = "cuda"))]
    data: Vec<T>,
}

impl<T: BufferElem> HostBuffer<T> {
    /// Number of elements
    #[cfg(feature = "cuda")]
    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    #[cfg(not(feature = "cuda"))]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes
    pub fn size_bytes(&self) -> usize {
        self.len() * std::mem::size_of::<T>()
    }

    /// Read access; waits for any in-flight transfer touching the buffer
    #[cfg(feature = "cuda")]
    pub fn as_slice(&self) -> Result<&[T]> {
        self.pinned
            .as_slice()
            .map_err(|e| PoaError::Gpu(format!("Failed to map pinned host memory: {:?}", e)))
    }

    #[cfg(not(feature = "cuda"))]
    pub fn as_slice(&self) -> Result<&[T]> {
        Ok(&self.data)
    }

    /// Write access; waits for any in-flight transfer touching the buffer
    #[cfg(feature = "cuda")]
    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        self.pinned
            .as_mut_slice()
            .map_err(|e| PoaError::Gpu(format!("Failed to map pinned host memory: {:?}", e)))
    }

    #[cfg(not(feature = "cuda"))]
    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        Ok(&mut self.data)
    }
}

impl<T: BufferElem> std::fmt::Debug for HostBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer")
            .field("len", &self.len())
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
