//! Pixel formats and the format registry.
//!
//! A format is the tuple (color family, sample type, bits, subsampling).
//! Its identifier is a pure function of that tuple, so two queries for the
//! same tuple always yield the same id and the registry never holds
//! duplicates.

use crate::core::error::{FormatError, FormatResult};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum subsampling exponent in either direction.
pub const MAX_SUBSAMPLING: u32 = 4;

/// Color family of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorFamily {
    /// Single luma plane.
    Gray,
    /// Three planes, red green blue.
    Rgb,
    /// Three planes, luma and two chroma planes that may be subsampled.
    Yuv,
}

impl ColorFamily {
    fn code(self) -> u32 {
        match self {
            ColorFamily::Gray => 1,
            ColorFamily::Rgb => 2,
            ColorFamily::Yuv => 3,
        }
    }

    /// Number of planes a frame of this family carries.
    pub fn num_planes(self) -> usize {
        match self {
            ColorFamily::Gray => 1,
            ColorFamily::Rgb | ColorFamily::Yuv => 3,
        }
    }

    /// Parse a family name as used in argument maps (`gray`, `rgb`, `yuv`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gray" | "grey" => Some(ColorFamily::Gray),
            "rgb" => Some(ColorFamily::Rgb),
            "yuv" => Some(ColorFamily::Yuv),
            _ => None,
        }
    }
}

impl fmt::Display for ColorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorFamily::Gray => write!(f, "Gray"),
            ColorFamily::Rgb => write!(f, "RGB"),
            ColorFamily::Yuv => write!(f, "YUV"),
        }
    }
}

/// How samples are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    /// Unsigned integer samples.
    Integer,
    /// IEEE float samples (half or single precision).
    Float,
}

/// Stable identifier of a registered format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormatId(pub u32);

impl FormatId {
    fn encode(
        family: ColorFamily,
        sample_type: SampleType,
        bits: u32,
        ssw: u32,
        ssh: u32,
    ) -> Self {
        let st = match sample_type {
            SampleType::Integer => 0,
            SampleType::Float => 1,
        };
        FormatId((family.code() << 28) | (st << 24) | (bits << 16) | (ssw << 8) | ssh)
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Full description of a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelFormat {
    /// Registry identifier.
    pub id: FormatId,
    /// Color family.
    pub color_family: ColorFamily,
    /// Integer or float samples.
    pub sample_type: SampleType,
    /// Significant bits per sample.
    pub bits_per_sample: u32,
    /// Storage size of one sample (1, 2 or 4).
    pub bytes_per_sample: u32,
    /// Horizontal chroma subsampling as a power of two.
    pub subsampling_w: u32,
    /// Vertical chroma subsampling as a power of two.
    pub subsampling_h: u32,
    /// Number of planes.
    pub num_planes: usize,
}

impl PixelFormat {
    /// Canonical name, e.g. `YUV420P8`, `GRAYS`, `RGB24`.
    pub fn name(&self) -> String {
        let float_suffix = |bits: u32| if bits == 16 { "H" } else { "S" };
        match (self.color_family, self.sample_type) {
            (ColorFamily::Gray, SampleType::Integer) => format!("GRAY{}", self.bits_per_sample),
            (ColorFamily::Gray, SampleType::Float) => {
                format!("GRAY{}", float_suffix(self.bits_per_sample))
            }
            (ColorFamily::Rgb, SampleType::Integer) => format!("RGB{}", self.bits_per_sample * 3),
            (ColorFamily::Rgb, SampleType::Float) => {
                format!("RGB{}", float_suffix(self.bits_per_sample))
            }
            (ColorFamily::Yuv, sample_type) => {
                let sub = match (self.subsampling_w, self.subsampling_h) {
                    (1, 1) => "420".to_string(),
                    (1, 0) => "422".to_string(),
                    (0, 0) => "444".to_string(),
                    (2, 2) => "410".to_string(),
                    (2, 0) => "411".to_string(),
                    (0, 1) => "440".to_string(),
                    (w, h) => format!("ssw{}ssh{}", w, h),
                };
                match sample_type {
                    SampleType::Integer => format!("YUV{}P{}", sub, self.bits_per_sample),
                    SampleType::Float => {
                        format!("YUV{}P{}", sub, float_suffix(self.bits_per_sample))
                    }
                }
            }
        }
    }

    /// Width of `plane` for a frame that is `width` luma samples wide.
    pub fn plane_width(&self, plane: usize, width: usize) -> usize {
        if plane == 0 {
            width
        } else {
            width >> self.subsampling_w
        }
    }

    /// Height of `plane` for a frame that is `height` luma rows tall.
    pub fn plane_height(&self, plane: usize, height: usize) -> usize {
        if plane == 0 {
            height
        } else {
            height >> self.subsampling_h
        }
    }

    /// Largest representable integer sample value.
    pub fn max_integer_value(&self) -> u64 {
        (1u64 << self.bits_per_sample) - 1
    }

    /// Whether `plane` carries chroma (YUV planes 1 and 2).
    pub fn is_chroma_plane(&self, plane: usize) -> bool {
        self.color_family == ColorFamily::Yuv && plane > 0
    }

    /// True when both formats share family, subsampling and plane count.
    pub fn same_layout(&self, other: &PixelFormat) -> bool {
        self.color_family == other.color_family
            && self.subsampling_w == other.subsampling_w
            && self.subsampling_h == other.subsampling_h
            && self.num_planes == other.num_planes
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Commonly used formats, registered by every registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Preset {
    Gray8,
    Gray16,
    GrayH,
    GrayS,
    Yuv420P8,
    Yuv422P8,
    Yuv444P8,
    Yuv410P8,
    Yuv411P8,
    Yuv440P8,
    Yuv420P10,
    Yuv420P16,
    Yuv444P16,
    Yuv444PS,
    Rgb24,
    Rgb30,
    Rgb48,
    RgbS,
}

impl Preset {
    /// Every preset, in registration order.
    pub const ALL: [Preset; 18] = [
        Preset::Gray8,
        Preset::Gray16,
        Preset::GrayH,
        Preset::GrayS,
        Preset::Yuv420P8,
        Preset::Yuv422P8,
        Preset::Yuv444P8,
        Preset::Yuv410P8,
        Preset::Yuv411P8,
        Preset::Yuv440P8,
        Preset::Yuv420P10,
        Preset::Yuv420P16,
        Preset::Yuv444P16,
        Preset::Yuv444PS,
        Preset::Rgb24,
        Preset::Rgb30,
        Preset::Rgb48,
        Preset::RgbS,
    ];

    /// The (family, sample type, bits, ssw, ssh) tuple of this preset.
    pub fn params(self) -> (ColorFamily, SampleType, u32, u32, u32) {
        use ColorFamily::*;
        use SampleType::*;
        match self {
            Preset::Gray8 => (Gray, Integer, 8, 0, 0),
            Preset::Gray16 => (Gray, Integer, 16, 0, 0),
            Preset::GrayH => (Gray, Float, 16, 0, 0),
            Preset::GrayS => (Gray, Float, 32, 0, 0),
            Preset::Yuv420P8 => (Yuv, Integer, 8, 1, 1),
            Preset::Yuv422P8 => (Yuv, Integer, 8, 1, 0),
            Preset::Yuv444P8 => (Yuv, Integer, 8, 0, 0),
            Preset::Yuv410P8 => (Yuv, Integer, 8, 2, 2),
            Preset::Yuv411P8 => (Yuv, Integer, 8, 2, 0),
            Preset::Yuv440P8 => (Yuv, Integer, 8, 0, 1),
            Preset::Yuv420P10 => (Yuv, Integer, 10, 1, 1),
            Preset::Yuv420P16 => (Yuv, Integer, 16, 1, 1),
            Preset::Yuv444P16 => (Yuv, Integer, 16, 0, 0),
            Preset::Yuv444PS => (Yuv, Float, 32, 0, 0),
            Preset::Rgb24 => (Rgb, Integer, 8, 0, 0),
            Preset::Rgb30 => (Rgb, Integer, 10, 0, 0),
            Preset::Rgb48 => (Rgb, Integer, 16, 0, 0),
            Preset::RgbS => (Rgb, Float, 32, 0, 0),
        }
    }

    /// Identifier of this preset; identical to what `FormatRegistry::query` returns.
    pub fn id(self) -> FormatId {
        let (cf, st, bits, ssw, ssh) = self.params();
        FormatId::encode(cf, st, bits, ssw, ssh)
    }
}

/// Deduplicating registry of pixel formats.
pub struct FormatRegistry {
    formats: RwLock<IndexMap<FormatId, PixelFormat>>,
}

impl FormatRegistry {
    /// Create a registry pre-populated with every [`Preset`].
    pub fn new() -> Self {
        let registry = Self {
            formats: RwLock::new(IndexMap::new()),
        };
        for preset in Preset::ALL {
            let (cf, st, bits, ssw, ssh) = preset.params();
            // Presets are valid by construction.
            let _ = registry.query(cf, st, bits, ssw, ssh);
        }
        registry
    }

    /// Validate a tuple and return its identifier, registering it on first use.
    pub fn query(
        &self,
        color_family: ColorFamily,
        sample_type: SampleType,
        bits_per_sample: u32,
        subsampling_w: u32,
        subsampling_h: u32,
    ) -> FormatResult<FormatId> {
        let format = Self::describe(
            color_family,
            sample_type,
            bits_per_sample,
            subsampling_w,
            subsampling_h,
        )?;

        if let Some(existing) = self.formats.read().get(&format.id) {
            return Ok(existing.id);
        }
        let mut formats = self.formats.write();
        formats.entry(format.id).or_insert(format);
        Ok(format.id)
    }

    /// Look up a previously registered format.
    pub fn lookup(&self, id: FormatId) -> FormatResult<PixelFormat> {
        self.formats
            .read()
            .get(&id)
            .copied()
            .ok_or(FormatError::UnknownFormat(id.0))
    }

    /// Look up a preset.
    pub fn preset(&self, preset: Preset) -> PixelFormat {
        let (cf, st, bits, ssw, ssh) = preset.params();
        Self::build(cf, st, bits, ssw, ssh)
    }

    /// Find a registered format by its canonical name (case-insensitive).
    pub fn by_name(&self, name: &str) -> FormatResult<PixelFormat> {
        self.formats
            .read()
            .values()
            .find(|f| f.name().eq_ignore_ascii_case(name))
            .copied()
            .ok_or_else(|| FormatError::UnknownName(name.to_string()))
    }

    /// Number of distinct registered formats.
    pub fn len(&self) -> usize {
        self.formats.read().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.formats.read().is_empty()
    }

    fn describe(
        color_family: ColorFamily,
        sample_type: SampleType,
        bits: u32,
        ssw: u32,
        ssh: u32,
    ) -> FormatResult<PixelFormat> {
        match sample_type {
            SampleType::Integer if !(8..=32).contains(&bits) => {
                return Err(FormatError::InvalidFormat(format!(
                    "integer samples must be 8 to 32 bits, got {}",
                    bits
                )))
            }
            SampleType::Float if bits != 16 && bits != 32 => {
                return Err(FormatError::InvalidFormat(format!(
                    "float samples must be 16 or 32 bits, got {}",
                    bits
                )))
            }
            _ => {}
        }
        if color_family != ColorFamily::Yuv && (ssw != 0 || ssh != 0) {
            return Err(FormatError::InvalidFormat(format!(
                "{} formats cannot be subsampled",
                color_family
            )));
        }
        if ssw > MAX_SUBSAMPLING || ssh > MAX_SUBSAMPLING {
            return Err(FormatError::InvalidFormat(format!(
                "subsampling {}x{} exceeds the maximum of {}",
                ssw, ssh, MAX_SUBSAMPLING
            )));
        }

        Ok(Self::build(color_family, sample_type, bits, ssw, ssh))
    }

    fn build(
        color_family: ColorFamily,
        sample_type: SampleType,
        bits: u32,
        ssw: u32,
        ssh: u32,
    ) -> PixelFormat {
        let mut bytes_per_sample = 1;
        while bytes_per_sample * 8 < bits {
            bytes_per_sample *= 2;
        }

        PixelFormat {
            id: FormatId::encode(color_family, sample_type, bits, ssw, ssh),
            color_family,
            sample_type,
            bits_per_sample: bits,
            bytes_per_sample,
            subsampling_w: ssw,
            subsampling_h: ssh,
            num_planes: color_family.num_planes(),
        }
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
