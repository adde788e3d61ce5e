//! Multi-plane video frames.
//!
//! A frame owns one buffer per plane plus a property map. Buffers are
//! row-major with a stride padded to [`STRIDE_ALIGNMENT`] bytes.
//!
//! Frames are shared by reference counting. A frame returned from a node is
//! read-only; [`VideoFrame::copy`] gives a writable frame that shares
//! buffers with the original until one of them is written (copy-on-write at
//! plane granularity).

use crate::core::error::{FrameError, FrameResult, PropertyError, PropertyResult};
use crate::core::format::PixelFormat;
use crate::core::props::PropertyMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Row stride alignment in bytes.
pub const STRIDE_ALIGNMENT: usize = 32;

/// A sample type that plane rows can be viewed as.
pub trait Sample: bytemuck::Pod + Send + Sync {}

impl Sample for u8 {}
impl Sample for u16 {}
impl Sample for u32 {}
impl Sample for f32 {}

#[derive(Clone)]
struct Plane {
    // u32 backing keeps every row start 4-byte aligned.
    buf: Vec<u32>,
    stride: usize,
    width: usize,
    height: usize,
}

impl Plane {
    fn new(width: usize, height: usize, bytes_per_sample: usize) -> Self {
        let row = width * bytes_per_sample;
        let stride = row.div_ceil(STRIDE_ALIGNMENT) * STRIDE_ALIGNMENT;
        Self {
            buf: vec![0u32; stride * height / 4],
            stride,
            width,
            height,
        }
    }

    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.buf)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.buf)
    }
}

#[derive(Clone)]
struct FrameData {
    format: PixelFormat,
    width: usize,
    height: usize,
    planes: Vec<Arc<Plane>>,
    props: PropertyMap,
}

/// A reference-counted video frame.
#[derive(Clone)]
pub struct VideoFrame {
    data: Arc<FrameData>,
    writable: bool,
}

impl VideoFrame {
    /// Allocate a new zero-filled, writable frame.
    pub fn new(format: PixelFormat, width: usize, height: usize) -> Self {
        let bps = format.bytes_per_sample as usize;
        let planes = (0..format.num_planes)
            .map(|p| {
                Arc::new(Plane::new(
                    format.plane_width(p, width),
                    format.plane_height(p, height),
                    bps,
                ))
            })
            .collect();
        Self {
            data: Arc::new(FrameData {
                format,
                width,
                height,
                planes,
                props: PropertyMap::new(),
            }),
            writable: true,
        }
    }

    /// A writable copy. Buffers are shared until written.
    pub fn copy(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            writable: true,
        }
    }

    /// Mark the frame read-only.
    pub(crate) fn freeze(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Whether pixel data and properties may be modified.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// True if both handles refer to the same frame object.
    pub fn ptr_eq(a: &VideoFrame, b: &VideoFrame) -> bool {
        Arc::ptr_eq(&a.data, &b.data)
    }

    /// Pixel format.
    pub fn format(&self) -> &PixelFormat {
        &self.data.format
    }

    /// Luma width.
    pub fn width(&self) -> usize {
        self.data.width
    }

    /// Luma height.
    pub fn height(&self) -> usize {
        self.data.height
    }

    /// Number of planes.
    pub fn num_planes(&self) -> usize {
        self.data.planes.len()
    }

    fn plane_data(&self, plane: usize) -> FrameResult<&Plane> {
        self.data
            .planes
            .get(plane)
            .map(|p| p.as_ref())
            .ok_or(FrameError::PlaneIndex {
                plane,
                num_planes: self.num_planes(),
            })
    }

    /// Width of a plane in samples.
    pub fn plane_width(&self, plane: usize) -> FrameResult<usize> {
        self.plane_data(plane).map(|p| p.width)
    }

    /// Height of a plane in rows.
    pub fn plane_height(&self, plane: usize) -> FrameResult<usize> {
        self.plane_data(plane).map(|p| p.height)
    }

    /// Stride of a plane in bytes.
    pub fn stride(&self, plane: usize) -> FrameResult<usize> {
        self.plane_data(plane).map(|p| p.stride)
    }

    /// The visible bytes of one row, without stride padding.
    pub fn row_bytes(&self, plane: usize, row: usize) -> FrameResult<&[u8]> {
        let p = self.plane_data(plane)?;
        if row >= p.height {
            return Err(FrameError::RowIndex {
                row,
                height: p.height,
            });
        }
        let start = row * p.stride;
        let len = p.width * self.data.format.bytes_per_sample as usize;
        Ok(&p.bytes()[start..start + len])
    }

    fn check_sample<T: Sample>(&self) -> FrameResult<()> {
        let actual = self.data.format.bytes_per_sample as usize;
        let requested = std::mem::size_of::<T>();
        if actual != requested {
            return Err(FrameError::SampleType { requested, actual });
        }
        Ok(())
    }

    /// Read view of a plane.
    pub fn plane<T: Sample>(&self, plane: usize) -> FrameResult<PlaneRef<'_, T>> {
        self.check_sample::<T>()?;
        let p = self.plane_data(plane)?;
        Ok(PlaneRef {
            data: p.bytes(),
            stride: p.stride,
            width: p.width,
            height: p.height,
            _marker: PhantomData,
        })
    }

    fn data_mut(&mut self) -> FrameResult<&mut FrameData> {
        if !self.writable {
            return Err(FrameError::ReadOnly);
        }
        Ok(Arc::make_mut(&mut self.data))
    }

    /// Write view of a plane. Fails on read-only frames.
    pub fn plane_mut<T: Sample>(&mut self, plane: usize) -> FrameResult<PlaneMut<'_, T>> {
        self.check_sample::<T>()?;
        let num_planes = self.num_planes();
        let data = self.data_mut()?;
        let shared = data
            .planes
            .get_mut(plane)
            .ok_or(FrameError::PlaneIndex { plane, num_planes })?;
        let p = Arc::make_mut(shared);
        Ok(PlaneMut {
            stride: p.stride,
            width: p.width,
            height: p.height,
            data: p.bytes_mut(),
            _marker: PhantomData,
        })
    }

    /// Make `plane` share the buffer of `src_plane` in `src`.
    ///
    /// Dimensions and sample size must match.
    pub fn copy_plane_from(
        &mut self,
        plane: usize,
        src: &VideoFrame,
        src_plane: usize,
    ) -> FrameResult<()> {
        let source = Arc::clone(src.data.planes.get(src_plane).ok_or(
            FrameError::PlaneIndex {
                plane: src_plane,
                num_planes: src.num_planes(),
            },
        )?);
        if src.data.format.bytes_per_sample != self.data.format.bytes_per_sample {
            return Err(FrameError::SampleType {
                requested: self.data.format.bytes_per_sample as usize,
                actual: src.data.format.bytes_per_sample as usize,
            });
        }
        let num_planes = self.num_planes();
        let data = self.data_mut()?;
        let target = data
            .planes
            .get_mut(plane)
            .ok_or(FrameError::PlaneIndex { plane, num_planes })?;
        if target.width != source.width || target.height != source.height {
            return Err(FrameError::filter(format!(
                "plane {} is {}x{} but source plane {} is {}x{}",
                plane, target.width, target.height, src_plane, source.width, source.height
            )));
        }
        *target = source;
        Ok(())
    }

    /// Frame properties.
    pub fn props(&self) -> &PropertyMap {
        &self.data.props
    }

    /// Mutable frame properties. Fails with `ReadOnly` on shared frames.
    pub fn props_mut(&mut self) -> PropertyResult<&mut PropertyMap> {
        if !self.writable {
            return Err(PropertyError::ReadOnly);
        }
        Ok(&mut Arc::make_mut(&mut self.data).props)
    }

    /// Bytes held by the plane buffers.
    pub fn memory_size(&self) -> usize {
        self.data.planes.iter().map(|p| p.buf.len() * 4).sum()
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("format", &self.data.format.name())
            .field("width", &self.data.width)
            .field("height", &self.data.height)
            .field("writable", &self.writable)
            .field("props", &self.data.props)
            .finish()
    }
}

/// Read-only view of one plane, addressed by (row, column).
pub struct PlaneRef<'a, T: Sample> {
    data: &'a [u8],
    stride: usize,
    width: usize,
    height: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: Sample> PlaneRef<'a, T> {
    /// Width in samples.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Stride in bytes.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Samples of row `y`.
    pub fn row(&self, y: usize) -> &'a [T] {
        let start = y * self.stride;
        bytemuck::cast_slice(&self.data[start..start + self.width * std::mem::size_of::<T>()])
    }

    /// Sample at (row, column).
    pub fn get(&self, y: usize, x: usize) -> T {
        self.row(y)[x]
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &'a [T]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }
}

/// Writable view of one plane.
pub struct PlaneMut<'a, T: Sample> {
    data: &'a mut [u8],
    stride: usize,
    width: usize,
    height: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: Sample> PlaneMut<'a, T> {
    /// Width in samples.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Mutable samples of row `y`.
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let start = y * self.stride;
        let len = self.width * std::mem::size_of::<T>();
        bytemuck::cast_slice_mut(&mut self.data[start..start + len])
    }

    /// Write the sample at (row, column).
    pub fn set(&mut self, y: usize, x: usize, value: T) {
        self.row_mut(y)[x] = value;
    }

    /// Fill every visible sample with `value`.
    pub fn fill(&mut self, value: T) {
        for y in 0..self.height {
            self.row_mut(y).fill(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::{FormatRegistry, Preset};

    fn gray8() -> PixelFormat {
        FormatRegistry::new().preset(Preset::Gray8)
    }

    #[test]
    fn test_stride_alignment() {
        let frame = VideoFrame::new(FormatRegistry::new().preset(Preset::Yuv420P16), 33, 10);
        assert_eq!(frame.stride(0).unwrap() % STRIDE_ALIGNMENT, 0);
        assert!(frame.stride(0).unwrap() >= 66);
        assert_eq!(frame.plane_width(1).unwrap(), 16);
        assert_eq!(frame.plane_height(2).unwrap(), 5);
    }

    #[test]
    fn test_read_write_views() {
        let mut frame = VideoFrame::new(gray8(), 4, 3);
        {
            let mut plane = frame.plane_mut::<u8>(0).unwrap();
            plane.fill(7);
            plane.set(2, 3, 9);
        }
        let plane = frame.plane::<u8>(0).unwrap();
        assert_eq!(plane.get(0, 0), 7);
        assert_eq!(plane.get(2, 3), 9);
        assert_eq!(plane.row(1), &[7, 7, 7, 7]);
        assert!(frame.plane::<u16>(0).is_err());
        assert!(frame.plane::<u8>(1).is_err());
    }

    #[test]
    fn test_copy_is_independent() {
        let mut original = VideoFrame::new(gray8(), 8, 2);
        original.plane_mut::<u8>(0).unwrap().fill(10);
        original.props_mut().unwrap().set_int("a", 1).unwrap();
        let original = original.freeze();

        let mut copy = original.copy();
        copy.plane_mut::<u8>(0).unwrap().fill(20);
        copy.props_mut().unwrap().delete("a").unwrap();

        assert_eq!(original.plane::<u8>(0).unwrap().get(0, 0), 10);
        assert_eq!(copy.plane::<u8>(0).unwrap().get(0, 0), 20);
        assert!(original.props().contains_key("a"));
        assert!(!copy.props().contains_key("a"));
    }

    #[test]
    fn test_read_only_frame() {
        let mut frame = VideoFrame::new(gray8(), 2, 2);
        frame.props_mut().unwrap().set_int("_DurationNum", 1).unwrap();
        let mut frame = frame.freeze();
        assert!(matches!(frame.plane_mut::<u8>(0), Err(FrameError::ReadOnly)));
        assert_eq!(
            frame.props_mut().and_then(|p| p.delete("_DurationNum")),
            Err(PropertyError::ReadOnly)
        );
        assert_eq!(frame.props().get_int("_DurationNum", 0).unwrap(), 1);
    }

    #[test]
    fn test_copy_plane_from_shares_data() {
        let mut src = VideoFrame::new(gray8(), 4, 4);
        src.plane_mut::<u8>(0).unwrap().fill(42);
        let src = src.freeze();
        let mut dst = VideoFrame::new(gray8(), 4, 4);
        dst.copy_plane_from(0, &src, 0).unwrap();
        assert_eq!(dst.plane::<u8>(0).unwrap().get(3, 3), 42);
        dst.plane_mut::<u8>(0).unwrap().set(0, 0, 1);
        assert_eq!(src.plane::<u8>(0).unwrap().get(0, 0), 42);

        let mut small = VideoFrame::new(gray8(), 2, 2);
        assert!(small.copy_plane_from(0, &src, 0).is_err());
    }

    #[test]
    fn test_row_bytes_excludes_padding() {
        let frame = VideoFrame::new(FormatRegistry::new().preset(Preset::Gray16), 5, 1);
        assert_eq!(frame.row_bytes(0, 0).unwrap().len(), 10);
    }

    #[test]
    fn test_row_bytes_out_of_range() {
        let frame = VideoFrame::new(FormatRegistry::new().preset(Preset::Yuv420P8), 8, 4);
        assert_eq!(frame.row_bytes(2, 1).unwrap().len(), 4);
        assert_eq!(
            frame.row_bytes(2, 2).unwrap_err(),
            FrameError::RowIndex { row: 2, height: 2 }
        );
        assert_eq!(
            frame.row_bytes(0, usize::MAX).unwrap_err(),
            FrameError::RowIndex {
                row: usize::MAX,
                height: 4
            }
        );
    }
}
