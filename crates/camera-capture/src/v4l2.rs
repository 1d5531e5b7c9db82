//! V4L2 capture backend
//!
//! Single-planar video capture with application-allocated buffers, passed to
//! the driver by user pointer or DMA-BUF fd. Format negotiation goes through
//! `v4l::video::Capture`; buffer exchange uses the raw VIDIOC calls since the
//! `v4l` streams own their buffers.

use crate::buffer::{Buffer, MemoryKind};
use crate::device::{CaptureBackend, CaptureDevice, Dequeued};
use crate::format::{FieldMode, FieldTag, FormatRequest, PixelFormat, StreamFormat};
use crate::CaptureError;
use std::io;
use std::os::raw::{c_int, c_ulong, c_void};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::format::FieldOrder;
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Issue a VIDIOC request on `$fd`, retrying on EINTR
macro_rules! vidioc {
    ($fd:expr, $request:ident, $arg:expr) => {
        retry_interrupted(|| {
            // SAFETY: the argument is a live, exclusively borrowed struct of
            // the type the request expects
            unsafe {
                v4l2::ioctl(
                    $fd,
                    v4l2::vidioc::$request,
                    $arg as *mut _ as *mut c_void,
                )
            }
        })
    };
}

fn retry_interrupted(mut call: impl FnMut() -> io::Result<()>) -> io::Result<()> {
    loop {
        match call() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

fn memory_code(memory: MemoryKind) -> u32 {
    match memory {
        MemoryKind::Mapped => Memory::UserPtr as u32,
        MemoryKind::DmaBuf => Memory::DmaBuf as u32,
    }
}

fn field_order(field: FieldMode) -> FieldOrder {
    match field {
        FieldMode::None => FieldOrder::Progressive,
        FieldMode::Alternate => FieldOrder::Alternate,
    }
}

fn field_tag(code: u32) -> FieldTag {
    if code == FieldOrder::Top as u32 {
        FieldTag::Top
    } else if code == FieldOrder::Bottom as u32 {
        FieldTag::Bottom
    } else {
        FieldTag::None
    }
}

/// `v4l` format for a request
fn request_format(request: &FormatRequest) -> Format {
    let mut format = Format::new(
        request.width,
        request.height,
        FourCC::new(&request.pixel_format.fourcc().to_le_bytes()),
    );
    format.field_order = field_order(request.field);
    format.stride = request.bytes_per_line.unwrap_or(0);
    format
}

/// Check what the driver settled on against what was asked for
fn negotiated_format(
    request: &FormatRequest,
    actual: &Format,
) -> Result<StreamFormat, CaptureError> {
    let code = u32::from_le_bytes(actual.fourcc.repr);
    let pixel_format = PixelFormat::from_fourcc(code).ok_or_else(|| {
        CaptureError::Format(format!("driver chose unsupported fourcc {}", actual.fourcc))
    })?;
    let field = if actual.field_order == FieldOrder::Alternate {
        FieldMode::Alternate
    } else {
        FieldMode::None
    };
    if field != request.field {
        warn!(
            "Driver set field mode {:?}, requested {:?}",
            field, request.field
        );
    }
    if actual.stride == 0 || actual.size == 0 {
        return Err(CaptureError::Format(format!(
            "driver returned empty geometry: {} bytes per line, {} bytes per image",
            actual.stride, actual.size
        )));
    }

    Ok(StreamFormat {
        width: actual.width,
        height: actual.height,
        pixel_format,
        field,
        bytes_per_line: actual.stride,
        size_image: actual.size as usize,
        planes: 1,
    })
}

/// Opens `/dev/videoN` nodes
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Backend;

impl CaptureBackend for V4l2Backend {
    type Device = V4l2Device;

    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn device_path(&self, device_id: u32) -> PathBuf {
        PathBuf::from(format!("/dev/video{}", device_id))
    }

    fn open(&self, path: &Path) -> Result<V4l2Device, CaptureError> {
        // v4l opens nodes non-blocking, so DQBUF reports EAGAIN when idle
        let device = Device::with_path(path).map_err(|source| CaptureError::Open {
            path: path.display().to_string(),
            source,
        })?;
        info!("Opened capture device {}", path.display());
        Ok(V4l2Device {
            device: Some(device),
            path: path.to_path_buf(),
            memory: Memory::DmaBuf as u32,
        })
    }
}

/// An open V4L2 capture node
pub struct V4l2Device {
    device: Option<Device>,
    path: PathBuf,
    memory: u32,
}

impl std::fmt::Debug for V4l2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Device")
            .field("path", &self.path)
            .field("open", &self.device.is_some())
            .field("memory", &self.memory)
            .finish()
    }
}

impl V4l2Device {
    fn device(&self) -> Result<&Device, CaptureError> {
        self.device
            .as_ref()
            .ok_or_else(|| {
                CaptureError::Stream(format!("{} is closed", self.path.display()))
            })
    }

    fn fd(&self) -> Result<c_int, CaptureError> {
        Ok(self.device()?.handle().fd())
    }

    fn new_buffer(&self) -> v4l2_buffer {
        // SAFETY: v4l2_buffer is plain data; all-zero is a valid value
        let mut vbuf: v4l2_buffer = unsafe { std::mem::zeroed() };
        vbuf.type_ = Type::VideoCapture as u32;
        vbuf.memory = self.memory;
        vbuf
    }

    fn stream_type_ioctl(&self, streaming: bool) -> Result<(), CaptureError> {
        let fd = self.fd()?;
        let mut type_ = Type::VideoCapture as u32;
        let (what, result) = if streaming {
            ("STREAMON", vidioc!(fd, VIDIOC_STREAMON, &mut type_))
        } else {
            ("STREAMOFF", vidioc!(fd, VIDIOC_STREAMOFF, &mut type_))
        };
        result.map_err(|e| {
            CaptureError::Stream(format!("{} on {}: {}", what, self.path.display(), e))
        })
    }

    fn reqbufs(&self, count: u32) -> Result<u32, CaptureError> {
        let fd = self.fd()?;
        // SAFETY: v4l2_requestbuffers is plain data; all-zero is a valid value
        let mut req: v4l2_requestbuffers = unsafe { std::mem::zeroed() };
        req.count = count;
        req.type_ = Type::VideoCapture as u32;
        req.memory = self.memory;
        vidioc!(fd, VIDIOC_REQBUFS, &mut req)
            .map_err(|e| {
                CaptureError::Buffer(format!("REQBUFS({}): {}", count, e))
            })?;
        Ok(req.count)
    }
}

impl CaptureDevice for V4l2Device {
    fn negotiate_format(&mut self, request: &FormatRequest) -> Result<StreamFormat, CaptureError> {
        let actual = self
            .device()?
            .set_format(&request_format(request))
            .map_err(|e| {
                CaptureError::Format(format!(
                    "{}x{} {} on {}: {}",
                    request.width,
                    request.height,
                    request.pixel_format,
                    self.path.display(),
                    e
                ))
            })?;

        let negotiated = negotiated_format(request, &actual)?;
        info!(
            "Negotiated {}x{} {} field={:?} stride={} size={}",
            negotiated.width,
            negotiated.height,
            negotiated.pixel_format,
            negotiated.field,
            negotiated.bytes_per_line,
            negotiated.size_image
        );
        Ok(negotiated)
    }

    fn request_buffers(&mut self, count: usize, memory: MemoryKind) -> Result<(), CaptureError> {
        self.memory = memory_code(memory);
        let requested = u32::try_from(count)
            .map_err(|_| {
                CaptureError::Buffer(format!("{} buffers requested", count))
            })?;
        let granted = self.reqbufs(requested)?;
        if granted < requested {
            return Err(CaptureError::Buffer(format!(
                "driver granted {} of {} buffers",
                granted, requested
            )));
        }
        debug!("Driver accepted {} {:?} buffers", granted, memory);
        Ok(())
    }

    fn enqueue(&mut self, buffer: &Buffer) -> Result<(), CaptureError> {
        let fd = self.fd()?;
        let mut vbuf = self.new_buffer();
        vbuf.index = buffer.index() as u32;
        vbuf.field = FieldOrder::Progressive as u32;
        vbuf.length = buffer.size() as u32;
        if self.memory == Memory::DmaBuf as u32 {
            vbuf.m.fd = buffer.dma_fd().ok_or_else(|| {
                CaptureError::Buffer(format!("buffer {} has no DMA-BUF fd", buffer.index()))
            })?;
        } else {
            vbuf.m.userptr = buffer.user_ptr() as c_ulong;
        }
        vidioc!(fd, VIDIOC_QBUF, &mut vbuf)
            .map_err(|e| {
                CaptureError::Stream(format!("QBUF {}: {}", buffer.index(), e))
            })
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool, CaptureError> {
        let mut pfd = libc::pollfd {
            fd: self.fd()?,
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(c_int::MAX as u128) as c_int;
        // SAFETY: one valid pollfd, borrowed for the duration of the call
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        match ret {
            0 => Ok(false),
            r if r < 0 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(false)
                } else {
                    Err(CaptureError::Io(err))
                }
            }
            _ if pfd.revents & libc::POLLERR != 0 => Err(CaptureError::Stream(format!(
                "poll error on {}",
                self.path.display()
            ))),
            _ => Ok(true),
        }
    }

    fn dequeue(&mut self) -> Result<Option<Dequeued>, CaptureError> {
        let fd = self.fd()?;
        let mut vbuf = self.new_buffer();
        match vidioc!(fd, VIDIOC_DQBUF, &mut vbuf) {
            Ok(()) => Ok(Some(Dequeued {
                index: i64::from(vbuf.index),
                field: field_tag(vbuf.field),
                bytes_used: vbuf.bytesused as usize,
                sequence: vbuf.sequence,
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(CaptureError::Io(e)),
        }
    }

    fn stream_on(&mut self) -> Result<(), CaptureError> {
        self.stream_type_ioctl(true)?;
        info!("Streaming started on {}", self.path.display());
        Ok(())
    }

    fn stream_off(&mut self) -> Result<(), CaptureError> {
        self.stream_type_ioctl(false)?;
        // Drop the driver's references to our memory
        if let Err(e) = self.reqbufs(0) {
            warn!("Releasing driver buffers on {}: {}", self.path.display(), e);
        }
        info!("Streaming stopped on {}", self.path.display());
        Ok(())
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        if self.device.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
        Ok(())
    }
}
