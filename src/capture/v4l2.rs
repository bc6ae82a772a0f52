//! V4L2 capture over memory-mapped driver buffers

use std::os::fd::BorrowedFd;
use std::os::raw::{c_int, c_void};
use std::time::Duration;
use std::{io, mem};

use memmap2::{Mmap, MmapOptions};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::v4l2;
use v4l::v4l_sys::{v4l2_buffer, v4l2_requestbuffers};
use v4l::video::Capture;
use v4l::{Device, FourCC, Memory};

use super::device::{CaptureDevice, CaptureError};
use super::frame::{Dequeued, NegotiatedFormat, PixelFormat};

/// A V4L2 capture node driven through the raw buffer ioctls
pub struct V4l2Device {
    device: Device,
    path: String,
    mappings: Vec<Option<Mmap>>,
    streaming: bool,
}

impl V4l2Device {
    /// Open `path` and check it can stream video capture
    pub fn open(path: &str) -> Result<Self, CaptureError> {
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(path).map_err(|source| CaptureError::Open {
            path: path.to_string(),
            source,
        })?;

        let caps = device
            .query_caps()
            .map_err(CaptureError::io("VIDIOC_QUERYCAP"))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps
            .capabilities
            .contains(CapFlags::VIDEO_CAPTURE | CapFlags::STREAMING)
        {
            return Err(CaptureError::NotCapture {
                path: path.to_string(),
            });
        }

        Ok(Self {
            device,
            path: path.to_string(),
            mappings: Vec::new(),
            streaming: false,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    fn buffer_desc(index: usize) -> v4l2_buffer {
        v4l2_buffer {
            index: index as u32,
            type_: Type::VideoCapture as u32,
            memory: Memory::Mmap as u32,
            ..unsafe { mem::zeroed() }
        }
    }

    fn request(&mut self, count: u32) -> Result<u32, CaptureError> {
        let mut req = v4l2_requestbuffers {
            count,
            type_: Type::VideoCapture as u32,
            memory: Memory::Mmap as u32,
            ..unsafe { mem::zeroed() }
        };
        unsafe {
            v4l2::ioctl(
                self.fd(),
                v4l2::vidioc::VIDIOC_REQBUFS,
                &mut req as *mut _ as *mut c_void,
            )
            .map_err(CaptureError::io("VIDIOC_REQBUFS"))?;
        }
        Ok(req.count)
    }

    /// Wait without a timeout until the driver has a filled buffer
    fn wait_readable(&self) -> Result<(), CaptureError> {
        // the descriptor lives as long as `self.device`
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd()) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        poll(&mut fds, PollTimeout::NONE)
            .map_err(|errno| CaptureError::io("poll")(io::Error::from(errno)))?;
        Ok(())
    }
}

impl CaptureDevice for V4l2Device {
    fn negotiate(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<NegotiatedFormat, CaptureError> {
        let mut fmt = self
            .device
            .format()
            .map_err(CaptureError::io("VIDIOC_G_FMT"))?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(&format.fourcc());

        let actual = self
            .device
            .set_format(&fmt)
            .map_err(CaptureError::io("VIDIOC_S_FMT"))?;

        if actual.fourcc != fmt.fourcc || actual.width != width || actual.height != height {
            return Err(CaptureError::FormatMismatch {
                requested: format!("{}x{} {}", width, height, fmt.fourcc),
                actual: format!("{}x{} {}", actual.width, actual.height, actual.fourcc),
            });
        }

        Ok(NegotiatedFormat {
            width: actual.width,
            height: actual.height,
            format,
            stride: actual.stride,
            size: actual.size,
        })
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32, CaptureError> {
        let granted = self.request(count)?;
        self.mappings = (0..granted).map(|_| None).collect();
        Ok(granted)
    }

    fn map_buffer(&mut self, index: usize) -> Result<usize, CaptureError> {
        let count = self.mappings.len();
        if index >= count {
            return Err(CaptureError::UnknownBuffer { index, count });
        }

        let mut buf = Self::buffer_desc(index);
        unsafe {
            v4l2::ioctl(
                self.fd(),
                v4l2::vidioc::VIDIOC_QUERYBUF,
                &mut buf as *mut _ as *mut c_void,
            )
            .map_err(CaptureError::io("VIDIOC_QUERYBUF"))?;
        }

        let offset = unsafe { buf.m.offset } as u64;
        let length = buf.length as usize;

        // the driver owns the memory; it stays valid until REQBUFS(0)
        let mapping = unsafe {
            MmapOptions::new()
                .offset(offset)
                .len(length)
                .map(self.fd())
                .map_err(|source| CaptureError::Map { index, source })?
        };
        debug!("Mapped {} bytes at offset {:#x}", length, offset);

        self.mappings[index] = Some(mapping);
        Ok(length)
    }

    fn buffer(&self, index: usize) -> Option<&[u8]> {
        self.mappings.get(index)?.as_deref()
    }

    fn stream_on(&mut self) -> Result<(), CaptureError> {
        let mut typ = Type::VideoCapture as u32;
        unsafe {
            v4l2::ioctl(
                self.fd(),
                v4l2::vidioc::VIDIOC_STREAMON,
                &mut typ as *mut _ as *mut c_void,
            )
            .map_err(CaptureError::io("VIDIOC_STREAMON"))?;
        }
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<(), CaptureError> {
        let mut typ = Type::VideoCapture as u32;
        unsafe {
            v4l2::ioctl(
                self.fd(),
                v4l2::vidioc::VIDIOC_STREAMOFF,
                &mut typ as *mut _ as *mut c_void,
            )
            .map_err(CaptureError::io("VIDIOC_STREAMOFF"))?;
        }
        self.streaming = false;
        Ok(())
    }

    fn enqueue(&mut self, index: usize) -> Result<(), CaptureError> {
        let mut buf = Self::buffer_desc(index);
        unsafe {
            v4l2::ioctl(
                self.fd(),
                v4l2::vidioc::VIDIOC_QBUF,
                &mut buf as *mut _ as *mut c_void,
            )
            .map_err(CaptureError::io("VIDIOC_QBUF"))
        }
    }

    fn dequeue(&mut self) -> Result<Dequeued, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::NotStreaming);
        }
        self.wait_readable()?;

        let mut buf = Self::buffer_desc(0);
        unsafe {
            v4l2::ioctl(
                self.fd(),
                v4l2::vidioc::VIDIOC_DQBUF,
                &mut buf as *mut _ as *mut c_void,
            )
            .map_err(CaptureError::io("VIDIOC_DQBUF"))?;
        }

        let timestamp = (buf.timestamp.tv_sec > 0 || buf.timestamp.tv_usec > 0).then(|| {
            Duration::from_secs(buf.timestamp.tv_sec as u64)
                + Duration::from_micros(buf.timestamp.tv_usec as u64)
        });

        Ok(Dequeued {
            index: buf.index as usize,
            bytes_used: buf.bytesused as usize,
            sequence: buf.sequence,
            timestamp,
        })
    }

    fn release_buffers(&mut self) -> Result<(), CaptureError> {
        // unmap before handing the memory back
        self.mappings.clear();
        self.request(0)?;
        Ok(())
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        if self.streaming {
            if let Err(e) = self.stream_off() {
                warn!("Failed to stop {}: {}", self.path, e);
            }
        }
        if !self.mappings.is_empty() {
            if let Err(e) = self.release_buffers() {
                warn!("Failed to release buffers of {}: {}", self.path, e);
            }
        }
    }
}
