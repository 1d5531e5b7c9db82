//! Stream format negotiation types

use crate::buffer::MemoryKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Uyvy,
    Yuyv,
    Rgb888,
    Sgrbg8,
    Nv12,
}

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

impl PixelFormat {
    /// V4L2 fourcc code
    pub const fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Uyvy => fourcc(b"UYVY"),
            PixelFormat::Yuyv => fourcc(b"YUYV"),
            PixelFormat::Rgb888 => fourcc(b"RGB3"),
            PixelFormat::Sgrbg8 => fourcc(b"GRBG"),
            PixelFormat::Nv12 => fourcc(b"NV12"),
        }
    }

    /// Reverse of `fourcc`
    pub fn from_fourcc(code: u32) -> Option<Self> {
        [
            PixelFormat::Uyvy,
            PixelFormat::Yuyv,
            PixelFormat::Rgb888,
            PixelFormat::Sgrbg8,
            PixelFormat::Nv12,
        ]
        .into_iter()
        .find(|f| f.fourcc() == code)
    }

    /// Bytes per pixel of the first plane
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Uyvy | PixelFormat::Yuyv => 2,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Sgrbg8 | PixelFormat::Nv12 => 1,
        }
    }

    /// Image size for `height` lines of `bytes_per_line`
    pub const fn image_size(self, bytes_per_line: u32, height: u32) -> usize {
        let plane = bytes_per_line as usize * height as usize;
        match self {
            // Half-height interleaved chroma plane follows luma
            PixelFormat::Nv12 => plane + plane / 2,
            _ => plane,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc().to_le_bytes();
        write!(f, "{}", String::from_utf8_lossy(&code))
    }
}

/// Field layout of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldMode {
    /// Progressive frames
    #[default]
    None,
    /// Top and bottom fields delivered in separate buffers
    Alternate,
}

/// Which half of an interlaced frame a buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FieldTag {
    #[default]
    None,
    Top,
    Bottom,
}

/// Physical input feeding the capture pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamInput {
    /// Analog rear-view camera through a video decoder
    #[default]
    Cvbs,
    Hdmi,
    /// Sensor test pattern generator
    Tpg,
    /// OmniVision CSI sensor
    Ovti,
}

/// Capture parameters supplied by configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Physical input
    pub input: StreamInput,
    /// Requested pixel format; input default when unset
    pub pixel_format: Option<PixelFormat>,
    /// ISYS capture width for HDMI (0 = input default)
    pub isys_width: u32,
    /// ISYS capture height for HDMI (0 = input default)
    pub isys_height: u32,
    /// Deliver alternating fields (CVBS only)
    pub interlaced: bool,
    /// Stop after this many buffers (0 = run until stopped)
    pub frames_count: u64,
    /// Buffers shared with the driver
    pub buffer_count: usize,
    /// Backing memory for the buffers
    pub memory: MemoryKind,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            input: StreamInput::Cvbs,
            pixel_format: None,
            isys_width: 0,
            isys_height: 0,
            interlaced: false,
            frames_count: 0,
            buffer_count: 4,
            memory: MemoryKind::DmaBuf,
        }
    }
}

impl StreamConfig {
    /// Rear-view CVBS camera, interlaced
    pub fn rear_view() -> Self {
        Self {
            interlaced: true,
            ..Default::default()
        }
    }

    /// Requested format for the configured input
    pub fn format_request(&self) -> FormatRequest {
        let mut request = match self.input {
            StreamInput::Hdmi => {
                let (width, height) = if self.isys_width != 0 && self.isys_height != 0 {
                    (self.isys_width, self.isys_height)
                } else {
                    (1920, 1080)
                };
                FormatRequest::new(width, height, PixelFormat::Rgb888)
            }
            StreamInput::Tpg => FormatRequest {
                bytes_per_line: Some(1984),
                ..FormatRequest::new(1920, 1080, PixelFormat::Sgrbg8)
            },
            StreamInput::Ovti => FormatRequest::new(1280, 720, PixelFormat::Uyvy),
            StreamInput::Cvbs => {
                if let Some(format) = self.pixel_format.filter(|f| *f != PixelFormat::Uyvy) {
                    warn!(
                        "Pixel format {} requested for CVBS, only UYVY is supported",
                        format
                    );
                }
                let mut request = FormatRequest::new(720, 288, PixelFormat::Uyvy);
                if self.interlaced {
                    request.field = FieldMode::Alternate;
                }
                return request;
            }
        };
        if let Some(format) = self.pixel_format {
            request.pixel_format = format;
        }
        request
    }
}

/// Format asked of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub field: FieldMode,
    /// Explicit line stride, driver default when unset
    pub bytes_per_line: Option<u32>,
}

impl FormatRequest {
    /// Progressive request with driver-chosen stride
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            field: FieldMode::None,
            bytes_per_line: None,
        }
    }
}

/// Format the driver actually agreed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub field: FieldMode,
    pub bytes_per_line: u32,
    pub size_image: usize,
    pub planes: u32,
}

impl StreamFormat {
    /// Format a well-behaved driver would return for `request`
    pub fn from_request(request: &FormatRequest) -> Self {
        let bytes_per_line = request
            .bytes_per_line
            .unwrap_or(request.width * request.pixel_format.bytes_per_pixel());
        Self {
            width: request.width,
            height: request.height,
            pixel_format: request.pixel_format,
            field: request.field,
            bytes_per_line,
            size_image: request.pixel_format.image_size(bytes_per_line, request.height),
            planes: 1,
        }
    }

    /// Whether buffers carry alternating fields
    pub fn is_interlaced(&self) -> bool {
        self.field == FieldMode::Alternate
    }

    /// Line stride in pixels
    pub fn stride_width(&self) -> u32 {
        self.bytes_per_line / self.pixel_format.bytes_per_pixel()
    }

    /// Height of an assembled frame
    pub fn frame_height(&self) -> u32 {
        if self.is_interlaced() {
            self.height * 2
        } else {
            self.height
        }
    }
}
