//! Capture buffer pool
//!
//! A fixed set of equally sized buffers shared with the driver. Each buffer is
//! owned by exactly one side at a time; ownership only moves through
//! `hand_to_driver` (enqueue) and `take_from_driver` (dequeue).

use crate::format::FieldTag;
use crate::CaptureError;
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};
use std::ops::Index;
use tracing::{debug, error, info};

#[cfg(target_os = "linux")]
use std::os::unix::io::{AsRawFd, RawFd};

/// Backing memory kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// Anonymous mapping handed to the driver by address
    Mapped,
    /// DMA-heap buffer handed to the driver (and display) by fd
    #[default]
    DmaBuf,
}

/// Current owner of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Owner {
    Application,
    Driver,
}

enum BufferMemory {
    Mapped(MmapMut),
    #[cfg(target_os = "linux")]
    DmaBuf { map: MmapMut, fd: std::fs::File },
}

/// One capture surface
pub struct Buffer {
    index: usize,
    memory: BufferMemory,
    size: usize,
    field: FieldTag,
    owner: Owner,
    bytes_used: usize,
    sequence: u32,
}

impl Buffer {
    /// Stable index within the pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Capacity in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Field tag from the last dequeue
    pub fn field(&self) -> FieldTag {
        self.field
    }

    /// Current owner
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Bytes the driver filled on the last dequeue
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Driver sequence number from the last dequeue
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Buffer contents
    pub fn as_slice(&self) -> &[u8] {
        match &self.memory {
            BufferMemory::Mapped(map) => map,
            #[cfg(target_os = "linux")]
            BufferMemory::DmaBuf { map, .. } => map,
        }
    }

    /// Address of the mapping, for user-pointer I/O
    pub fn user_ptr(&self) -> usize {
        self.as_slice().as_ptr() as usize
    }

    /// DMA-BUF fd, when the buffer is DMA backed
    #[cfg(target_os = "linux")]
    pub fn dma_fd(&self) -> Option<RawFd> {
        match &self.memory {
            BufferMemory::Mapped(_) => None,
            BufferMemory::DmaBuf { fd, .. } => Some(fd.as_raw_fd()),
        }
    }

    /// DMA-BUF fd, when the buffer is DMA backed
    #[cfg(not(target_os = "linux"))]
    pub fn dma_fd(&self) -> Option<i32> {
        None
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("index", &self.index)
            .field("size", &self.size)
            .field("field", &self.field)
            .field("owner", &self.owner)
            .field("dma_fd", &self.dma_fd())
            .finish()
    }
}

/// What the display side needs to import a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferExport {
    pub index: usize,
    pub size: usize,
    pub dma_fd: Option<i32>,
}

/// Fixed set of capture buffers
#[derive(Debug)]
pub struct BufferPool {
    buffers: Vec<Buffer>,
    buffer_size: usize,
    memory: MemoryKind,
}

impl BufferPool {
    /// Allocate `count` buffers of `size` bytes, all application owned
    pub fn allocate(count: usize, size: usize, memory: MemoryKind) -> Result<Self, CaptureError> {
        if count == 0 || size == 0 {
            return Err(CaptureError::Buffer(format!(
                "cannot allocate {} buffers of {} bytes",
                count, size
            )));
        }

        let mut allocator = Allocator::new(memory)?;
        let buffers = (0..count)
            .map(|index| {
                Ok(Buffer {
                    index,
                    memory: allocator.allocate(size)?,
                    size,
                    field: FieldTag::None,
                    owner: Owner::Application,
                    bytes_used: 0,
                    sequence: 0,
                })
            })
            .collect::<Result<Vec<_>, CaptureError>>()?;

        info!(
            count,
            size,
            total_kb = count * size / 1024,
            memory = ?memory,
            "Allocated capture buffer pool"
        );

        Ok(Self {
            buffers,
            buffer_size: size,
            memory,
        })
    }

    /// Number of buffers
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Always false for an allocated pool
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Size of each buffer
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Buffer by index
    pub fn get(&self, index: usize) -> Option<&Buffer> {
        self.buffers.get(index)
    }

    /// Buffers currently owned by the driver
    pub fn driver_owned(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.owner == Owner::Driver)
            .count()
    }

    /// Check a raw driver index against the pool
    pub fn validate_index(&self, raw: i64) -> Result<usize, CaptureError> {
        usize::try_from(raw)
            .ok()
            .filter(|&index| index < self.buffers.len())
            .ok_or(CaptureError::IndexOutOfRange {
                index: raw,
                count: self.buffers.len(),
            })
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Buffer, CaptureError> {
        let count = self.buffers.len();
        self.buffers
            .get_mut(index)
            .ok_or(CaptureError::IndexOutOfRange {
                index: index as i64,
                count,
            })
    }

    /// Transfer ownership of an application buffer to the driver
    pub fn hand_to_driver(&mut self, index: usize) -> Result<(), CaptureError> {
        let buffer = self.slot_mut(index)?;
        if buffer.owner == Owner::Driver {
            return Err(CaptureError::Ownership {
                index,
                owner: Owner::Driver,
            });
        }
        buffer.owner = Owner::Driver;
        Ok(())
    }

    /// Transfer ownership of a completed buffer back from the driver
    pub fn take_from_driver(
        &mut self,
        index: usize,
        field: FieldTag,
        bytes_used: usize,
        sequence: u32,
    ) -> Result<&Buffer, CaptureError> {
        let buffer = self.slot_mut(index)?;
        if buffer.owner == Owner::Application {
            return Err(CaptureError::Ownership {
                index,
                owner: Owner::Application,
            });
        }
        buffer.owner = Owner::Application;
        buffer.field = field;
        buffer.bytes_used = bytes_used;
        buffer.sequence = sequence;
        Ok(buffer)
    }

    /// Undo a hand-off the driver refused
    pub fn reclaim(&mut self, index: usize) {
        if let Some(buffer) = self.buffers.get_mut(index) {
            buffer.owner = Owner::Application;
        }
    }

    /// Take every buffer back after stream-off
    pub fn reclaim_all(&mut self) -> usize {
        let mut reclaimed = 0;
        for buffer in self.buffers.iter_mut().filter(|b| b.owner == Owner::Driver) {
            buffer.owner = Owner::Application;
            reclaimed += 1;
        }
        debug!("Reclaimed {} buffers from the driver", reclaimed);
        reclaimed
    }

    /// Import descriptors for the display side
    pub fn exports(&self) -> Vec<BufferExport> {
        self.buffers
            .iter()
            .map(|b| BufferExport {
                index: b.index,
                size: b.size,
                dma_fd: b.dma_fd(),
            })
            .collect()
    }

    /// Free all backing memory. Driver-owned buffers are leaked, not freed.
    pub fn release(self) -> Result<(), CaptureError> {
        let outstanding = self.driver_owned();
        if outstanding > 0 {
            error!(
                "Releasing pool with {} buffers still queued; leaking their memory",
                outstanding
            );
            // The driver may still write into these mappings
            std::mem::forget(self.buffers);
            return Err(CaptureError::BuffersOutstanding { count: outstanding });
        }
        info!(
            "Released {} {:?} capture buffers",
            self.buffers.len(),
            self.memory
        );
        Ok(())
    }
}

impl Index<usize> for BufferPool {
    type Output = Buffer;

    fn index(&self, index: usize) -> &Buffer {
        &self.buffers[index]
    }
}

enum Allocator {
    Mapped,
    #[cfg(target_os = "linux")]
    DmaHeap(dma_heap::DmaHeap),
}

impl Allocator {
    fn new(memory: MemoryKind) -> Result<Self, CaptureError> {
        match memory {
            MemoryKind::Mapped => Ok(Allocator::Mapped),
            #[cfg(target_os = "linux")]
            MemoryKind::DmaBuf => Ok(Allocator::DmaHeap(dma_heap::DmaHeap::open()?)),
            #[cfg(not(target_os = "linux"))]
            MemoryKind::DmaBuf => Err(CaptureError::Buffer(
                "DMA-BUF memory is only available on Linux".to_string(),
            )),
        }
    }

    fn allocate(&mut self, size: usize) -> Result<BufferMemory, CaptureError> {
        match self {
            Allocator::Mapped => MmapMut::map_anon(size)
                .map(BufferMemory::Mapped)
                .map_err(|e| {
                    CaptureError::Buffer(format!("anonymous map of {} bytes: {}", size, e))
                }),
            #[cfg(target_os = "linux")]
            Allocator::DmaHeap(heap) => {
                let (fd, map) = heap.allocate(size)?;
                Ok(BufferMemory::DmaBuf { map, fd })
            }
        }
    }
}

#[cfg(target_os = "linux")]
mod dma_heap {
    use crate::CaptureError;
    use memmap2::{MmapMut, MmapOptions};
    use nix::errno::Errno;
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::{AsRawFd, FromRawFd};

    const DMA_HEAP_PATH: &str = "/dev/dma_heap/system";

    #[repr(C)]
    #[derive(Default)]
    pub struct DmaHeapAllocationData {
        len: u64,
        fd: u32,
        fd_flags: u32,
        heap_flags: u64,
    }

    nix::ioctl_readwrite!(dma_heap_alloc, b'H', 0, DmaHeapAllocationData);

    pub(super) struct DmaHeap {
        heap: File,
    }

    impl DmaHeap {
        pub(super) fn open() -> Result<Self, CaptureError> {
            let heap = OpenOptions::new()
                .read(true)
                .write(true)
                .open(DMA_HEAP_PATH)
                .map_err(|e| {
                    CaptureError::Buffer(format!("{}: {}", DMA_HEAP_PATH, e))
                })?;
            Ok(Self { heap })
        }

        pub(super) fn allocate(&mut self, size: usize) -> Result<(File, MmapMut), CaptureError> {
            let mut data = DmaHeapAllocationData {
                len: size as u64,
                fd_flags: (libc::O_RDWR | libc::O_CLOEXEC) as u32,
                ..Default::default()
            };
            loop {
                // SAFETY: data is a live allocation request the heap fills in
                match unsafe { dma_heap_alloc(self.heap.as_raw_fd(), &mut data) } {
                    Ok(_) => break,
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        return Err(CaptureError::Buffer(format!(
                            "DMA heap alloc of {} bytes: {}",
                            size, e
                        )))
                    }
                }
            }

            // SAFETY: the kernel just returned a fresh fd that nothing else owns
            let fd = unsafe { File::from_raw_fd(data.fd as i32) };
            // SAFETY: the DMA-BUF stays alive as long as `fd`, which is stored
            // next to the mapping and dropped after it
            let map = unsafe { MmapOptions::new().len(size).map_mut(&fd) }
                .map_err(|e| CaptureError::Buffer(format!("mapping DMA-BUF: {}", e)))?;
            Ok((fd, map))
        }
    }

    #[cfg(test)]
    mod tests {
        #[test]
        fn test_alloc_request_matches_kernel_abi() {
            // struct dma_heap_allocation_data is 24 bytes
            assert_eq!(std::mem::size_of::<super::DmaHeapAllocationData>(), 24);
        }
    }
}
