use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use image::{ImageFormat, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StillError {
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid data URL: {0}")]
    InvalidDataUrl(String),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Encoding of a still frame as it travels to the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    Jpeg,
    Png,
}

impl StillFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            StillFormat::Jpeg => "image/jpeg",
            StillFormat::Png => "image/png",
        }
    }

    fn from_image_format(format: ImageFormat) -> Result<Self, StillError> {
        match format {
            ImageFormat::Jpeg => Ok(StillFormat::Jpeg),
            ImageFormat::Png => Ok(StillFormat::Png),
            other => Err(StillError::UnsupportedFormat(format!("{other:?}"))),
        }
    }
}

/// An encoded still image: one camera snapshot or one uploaded file.
#[derive(Clone, PartialEq, Eq)]
pub struct Still {
    pub bytes: Vec<u8>,
    pub format: StillFormat,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for Still {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Still")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl Still {
    pub fn new(bytes: Vec<u8>, format: StillFormat, width: u32, height: u32) -> Self {
        Self {
            bytes,
            format,
            width,
            height,
        }
    }

    /// Wrap an already-encoded JPEG or PNG, sniffing format and dimensions
    /// from the header without decoding the pixel data.
    pub fn from_encoded(bytes: Vec<u8>) -> Result<Self, StillError> {
        let reader = ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;
        let format = reader
            .format()
            .ok_or_else(|| StillError::UnsupportedFormat("unrecognized header".into()))?;
        let format = StillFormat::from_image_format(format)?;
        let (width, height) = reader.into_dimensions()?;
        Ok(Self {
            bytes,
            format,
            width,
            height,
        })
    }

    /// Encode an RGB buffer as JPEG at the given quality (1–100).
    pub fn from_rgb(rgb: &RgbImage, quality: u8) -> Result<Self, StillError> {
        let mut bytes = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
        encoder.encode_image(rgb)?;
        Ok(Self {
            bytes,
            format: StillFormat::Jpeg,
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    /// Parse a `data:image/...;base64,...` URL.
    pub fn from_data_url(url: &str) -> Result<Self, StillError> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| StillError::InvalidDataUrl("missing data: scheme".into()))?;
        let (_, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| StillError::InvalidDataUrl("payload is not base64".into()))?;
        Self::from_encoded(STANDARD.decode(payload.trim())?)
    }

    /// Render as a data URL, the form the attendance API accepts in `image_data`.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime(),
            STANDARD.encode(&self.bytes)
        )
    }

    /// Decode to RGB pixels.
    pub fn decode(&self) -> Result<RgbImage, StillError> {
        Ok(image::load_from_memory(&self.bytes)?.to_rgb8())
    }
}

/// Opaque identifier of a captured sample, assigned in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleId(pub u64);

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One accepted capture held by the wizard.
#[derive(Debug, Clone)]
pub struct CapturedSample {
    pub id: SampleId,
    pub image: Still,
    /// Prompt index the sample was taken at.
    pub step: usize,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    /// Teachers and admins may register faces for other users.
    pub fn can_manage_faces(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}' (expected student, teacher or admin)")),
        }
    }
}

fn default_active() -> bool {
    true
}

/// Accept an identifier sent either as a JSON string or a JSON number.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

/// An authenticated (or listed) user as reported by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub is_face_registered: bool,
}
