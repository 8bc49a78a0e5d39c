//! rollcall-hw — Camera capture and RGB frame handling.
//!
//! Provides V4L2-based camera access, YUYV→RGB conversion, fixed-size
//! resampling and the PNG blob encoding used for face templates.

pub mod camera;
pub mod frame;

pub use camera::{
    Camera, CameraDevice, CameraError, FrameSource, OpenCamera, PixelFormat, ScriptedSource,
};
pub use frame::{Frame, FrameError};
