//! Format detection
//!
//! Classifies input by content, never by file extension. Binary formats are
//! recognised by magic bytes through `infer`, extended with the formats
//! only ImageMagick reads (GIMP, Radiance, X11 pixmaps and others); SVG has
//! no magic number, so a textual prefix is checked for an `<svg` root.

use crate::error::{ConvertError, Result};
use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::sync::OnceLock;

/// Bytes inspected by default when sniffing.
pub const DEFAULT_SNIFF_LIMIT: usize = 8 * 1024;

/// Canonical short format name: lower-case, no leading dot, `jpg` not `jpeg`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FormatTag(String);

impl FormatTag {
    pub fn new(name: &str) -> Self {
        let lowered = name.trim().trim_start_matches('.').to_ascii_lowercase();
        let canonical = match lowered.as_str() {
            "jpeg" | "jpe" => "jpg",
            "tiff" => "tif",
            "heic" => "heif",
            _ => lowered.as_str(),
        };
        FormatTag(canonical.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_vector(&self) -> bool {
        self.0 == "svg"
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormatTag {
    fn from(name: &str) -> Self {
        FormatTag::new(name)
    }
}

impl PartialEq<&str> for FormatTag {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Detect the image format of a stream by reading at most
/// [`DEFAULT_SNIFF_LIMIT`] bytes from it.
pub fn detect_format<R: Read>(input: R) -> Result<FormatTag> {
    sniff(input, DEFAULT_SNIFF_LIMIT)
}

pub(crate) fn sniff<R: Read>(input: R, limit: usize) -> Result<FormatTag> {
    let mut prefix = Vec::with_capacity(limit.min(DEFAULT_SNIFF_LIMIT));
    input.take(limit as u64).read_to_end(&mut prefix)?;
    classify(&prefix)
}

/// Classify a leading slice of an image stream.
pub fn classify(prefix: &[u8]) -> Result<FormatTag> {
    if prefix.is_empty() {
        return Err(ConvertError::UnsupportedMedia("empty input".to_string()));
    }

    match sniffer().get(prefix) {
        Some(kind)
            if matches!(
                kind.matcher_type(),
                infer::MatcherType::Image | infer::MatcherType::Custom
            ) =>
        {
            Ok(FormatTag::new(kind.extension()))
        }
        Some(kind) if kind.matcher_type() == infer::MatcherType::Text => {
            if looks_like_svg(prefix) {
                Ok(FormatTag::new("svg"))
            } else {
                Err(ConvertError::UnsupportedMedia(kind.mime_type().to_string()))
            }
        }
        Some(kind) => Err(ConvertError::UnsupportedMedia(kind.mime_type().to_string())),
        None if looks_like_svg(prefix) => Ok(FormatTag::new("svg")),
        None if std::str::from_utf8(prefix).is_ok() => {
            Err(ConvertError::UnsupportedMedia("text/plain".to_string()))
        }
        None => Err(ConvertError::UnsupportedMedia(
            "application/octet-stream".to_string(),
        )),
    }
}

/// `infer`'s built-in table plus the raster formats it lacks. Custom
/// matchers only run when no built-in one matched.
fn sniffer() -> &'static infer::Infer {
    static SNIFFER: OnceLock<infer::Infer> = OnceLock::new();
    SNIFFER.get_or_init(|| {
        let mut sniffer = infer::Infer::new();
        sniffer.add("image/x-xcf", "xcf", is_xcf);
        sniffer.add("image/x-icns", "icns", is_icns);
        sniffer.add("image/bpg", "bpg", is_bpg);
        sniffer.add("image/vnd.radiance", "hdr", is_hdr);
        sniffer.add("image/x-xpixmap", "xpm", is_xpm);
        sniffer.add("image/x-gimp-pat", "pat", is_gimp_pattern);
        sniffer.add("image/x-gimp-gbr", "gbr", is_gimp_brush);
        sniffer.add("image/vnd.dwg", "dwg", is_dwg);
        sniffer
    })
}

fn is_xcf(buf: &[u8]) -> bool {
    buf.starts_with(b"gimp xcf ")
}

fn is_icns(buf: &[u8]) -> bool {
    buf.len() >= 8 && buf.starts_with(b"icns")
}

fn is_bpg(buf: &[u8]) -> bool {
    buf.starts_with(b"BPG\xFB")
}

fn is_hdr(buf: &[u8]) -> bool {
    buf.starts_with(b"#?RADIANCE") || buf.starts_with(b"#?RGBE")
}

fn is_xpm(buf: &[u8]) -> bool {
    buf.starts_with(b"/* XPM */")
}

/// GIMP pattern and brush headers carry their magic after five
/// big-endian u32 header fields.
fn is_gimp_pattern(buf: &[u8]) -> bool {
    buf.get(20..24) == Some(b"GPAT".as_slice())
}

fn is_gimp_brush(buf: &[u8]) -> bool {
    buf.get(20..24) == Some(b"GIMP".as_slice())
}

/// AutoCAD drawings start with a version string such as `AC1015`.
fn is_dwg(buf: &[u8]) -> bool {
    buf.len() >= 6 && buf.starts_with(b"AC1") && buf[3..6].iter().all(u8::is_ascii_digit)
}

/// Markup whose first element is `<svg`, allowing for a BOM, an XML
/// declaration, a doctype and comments in front of it.
fn looks_like_svg(prefix: &[u8]) -> bool {
    let text = String::from_utf8_lossy(prefix);
    let mut rest = text.trim_start_matches('\u{feff}').trim_start();

    loop {
        if rest.starts_with("<svg") {
            return true;
        }
        let skip_to = if rest.starts_with("<?") {
            rest.find("?>").map(|i| i + 2)
        } else if rest.starts_with("<!--") {
            rest.find("-->").map(|i| i + 3)
        } else if rest.starts_with("<!") {
            // DOCTYPE, possibly with an internal subset
            match rest.find('[') {
                Some(open) if open < rest.find('>').unwrap_or(usize::MAX) => {
                    rest.find("]>").map(|i| i + 2)
                }
                _ => rest.find('>').map(|i| i + 1),
            }
        } else {
            return false;
        };

        match skip_to {
            Some(i) => rest = rest[i..].trim_start(),
            None => return false,
        }
    }
}
