//! V4L2 camera capture via the `v4l` crate.
//!
//! The camera is a scoped resource: open it for one check-in sequence and
//! drop it afterwards. Dropping releases the device on every path.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags as CaptureFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Something that yields RGB frames, one per call.
pub trait FrameSource: Send {
    fn capture_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Acquires a frame source on demand.
pub trait OpenCamera: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// A V4L2 node that advertises video capture.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the capture path can turn into RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2, two bytes per pixel.
    Yuyv,
    /// Packed 24-bit RGB.
    Rgb3,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"RGB3" => Some(Self::Rgb3),
            _ => None,
        }
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV buffer: {e}"))),
            Self::Rgb3 => {
                let len = width as usize * height as usize * 3;
                buf.get(..len).map(<[u8]>::to_vec).ok_or_else(|| {
                    CameraError::CaptureFailed(format!(
                        "RGB3 buffer holds {} bytes, frame needs {len}",
                        buf.len()
                    ))
                })
            }
        }
    }
}

/// Opens the V4L2 device at a fixed path each time a sequence needs it.
#[derive(Debug, Clone)]
pub struct CameraDevice {
    path: String,
}

impl CameraDevice {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl OpenCamera for CameraDevice {
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        Ok(Box::new(Camera::open(&self.path)?))
    }
}

/// An open capture device, streaming RGB frames.
pub struct Camera {
    device: Device,
    path: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Camera {
    /// Open and configure the device at `path`, e.g. `/dev/video0`.
    pub fn open(path: &str) -> Result<Self, CameraError> {
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceNotFound(path.to_string()));
        }
        let device = Device::with_path(path).map_err(|e| open_error(path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(CaptureFlags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let (width, height, format) = negotiate(&device)?;
        tracing::info!(
            device = path,
            card = %caps.card,
            width,
            height,
            format = ?format,
            "camera opened"
        );

        Ok(Self {
            device,
            path: path.to_string(),
            width,
            height,
            format,
        })
    }

    /// Enumerate `/dev/video0` through `/dev/video15` for capture nodes.
    pub fn capture_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(CaptureFlags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

fn open_error(path: &str, e: std::io::Error) -> CameraError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        return CameraError::PermissionDenied(path.to_string());
    }
    if e.raw_os_error() == Some(EBUSY) {
        return CameraError::DeviceBusy;
    }
    CameraError::DeviceNotFound(format!("{path}: {e}"))
}

/// Request YUYV at the capture size; keep whatever the driver settles on
/// as long as it is YUYV or RGB3.
fn negotiate(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("read format: {e}")))?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = REQUESTED_WIDTH;
    fmt.height = REQUESTED_HEIGHT;

    let got = device
        .set_format(&fmt)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("write format: {e}")))?;
    let format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!("driver chose {:?}", got.fourcc))
    })?;
    Ok((got.width, got.height, format))
}

impl FrameSource for Camera {
    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("mmap stream: {e}")))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue: {e}")))?;

        let mut frame = Frame::from_rgb(
            self.format.to_rgb(buf, self.width, self.height)?,
            self.width,
            self.height,
        )
        .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
        frame.sequence = meta.sequence;
        Ok(frame)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::debug!(device = %self.path, "camera released");
    }
}

/// Replays a fixed list of frames, cycling when exhausted. For tests and
/// dry runs without hardware.
#[derive(Clone)]
pub struct ScriptedSource {
    frames: Vec<Frame>,
    next: usize,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames, next: 0 }
    }

    /// How many frames have been captured so far.
    pub fn captured(&self) -> usize {
        self.next
    }
}

impl FrameSource for ScriptedSource {
    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.frames.is_empty() {
            return Err(CameraError::CaptureFailed("no scripted frames".into()));
        }
        let mut frame = self.frames[self.next % self.frames.len()].clone();
        frame.sequence = self.next as u32;
        self.next += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/does-not-exist-video99").err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }

    #[test]
    fn test_camera_device_open_missing() {
        let opener = CameraDevice::new("/dev/does-not-exist-video99");
        assert_eq!(opener.path(), "/dev/does-not-exist-video99");
        assert!(opener.open().is_err());
    }

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"YUYV")),
            Some(PixelFormat::Yuyv)
        );
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"RGB3")),
            Some(PixelFormat::Rgb3)
        );
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_rgb3_buffer_is_trimmed_and_checked() {
        let rgb = PixelFormat::Rgb3.to_rgb(&[7; 14], 2, 2).unwrap();
        assert_eq!(rgb.len(), 12);
        assert!(PixelFormat::Rgb3.to_rgb(&[7; 11], 2, 2).is_err());
    }

    #[test]
    fn test_busy_device_error() {
        let err = open_error("/dev/video0", std::io::Error::from_raw_os_error(EBUSY));
        assert!(matches!(err, CameraError::DeviceBusy));
        let err = open_error(
            "/dev/video0",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, CameraError::PermissionDenied(_)));
    }

    #[test]
    fn test_scripted_source_cycles() {
        let a = Frame::from_rgb(vec![1; 3], 1, 1).unwrap();
        let b = Frame::from_rgb(vec![2; 3], 1, 1).unwrap();
        let mut source = ScriptedSource::new(vec![a, b]);
        let seq: Vec<u8> = (0..5)
            .map(|_| source.capture_frame().unwrap().data[0])
            .collect();
        assert_eq!(seq, vec![1, 2, 1, 2, 1]);
        assert_eq!(source.captured(), 5);
    }

    #[test]
    fn test_empty_scripted_source_fails() {
        let mut source = ScriptedSource::new(Vec::new());
        assert!(source.capture_frame().is_err());
    }
}
