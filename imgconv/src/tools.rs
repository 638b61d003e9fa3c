//! External converter programs and selection among them
//!
//! Each known program has a static descriptor: its executable name, the
//! formats it reads and writes, and how its command line is built. The
//! preference order puts the fast specialised SVG rasterizer first and the
//! slow but broad ImageMagick last. Nothing is cached between selections;
//! every call looks the programs up again.

use crate::error::{ConvertError, Result};
use crate::format::FormatTag;
use crate::scaling::{compute_dpi, TargetSize, FALLBACK_VECTOR_DPI};
use crate::svg_metrics::SvgMetrics;
use serde::Serialize;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    /// `rsvg-convert`
    SvgRasterizer,
    /// Inkscape's command-line export
    VectorEditor,
    /// ImageMagick
    RasterToolkit,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub program: &'static str,
    pub kind: ToolKind,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
}

const MAGICK_INPUTS: &[&str] = &[
    "svg", "png", "xpm", "jxl", "jp2", "jpf", "jpg", "gif", "webp", "bmp", "ico", "bpg", "dwg",
    "icns", "heif", "hdr", "xcf", "pat", "gbr", "tif", "avif",
];

const MAGICK_OUTPUTS: &[&str] = &[
    "png", "xpm", "jxl", "jp2", "jpf", "gbr", "jpg", "gif", "webp", "bmp", "ico", "bpg", "dwg",
    "icns", "heif", "hdr", "xcf", "pat", "tif", "avif",
];

pub const RSVG_CONVERT: ToolDescriptor = ToolDescriptor {
    program: "rsvg-convert",
    kind: ToolKind::SvgRasterizer,
    inputs: &["svg"],
    outputs: &["png", "pdf", "ps", "eps", "svg", "xml"],
};

pub const INKSCAPE: ToolDescriptor = ToolDescriptor {
    program: "inkscape",
    kind: ToolKind::VectorEditor,
    inputs: &["svg"],
    outputs: &["png", "pdf", "ps", "eps", "svg"],
};

/// ImageMagick 7 entry point.
pub const MAGICK: ToolDescriptor = ToolDescriptor {
    program: "magick",
    kind: ToolKind::RasterToolkit,
    inputs: MAGICK_INPUTS,
    outputs: MAGICK_OUTPUTS,
};

/// ImageMagick 6 entry point.
pub const IM_CONVERT: ToolDescriptor = ToolDescriptor {
    program: "convert",
    kind: ToolKind::RasterToolkit,
    inputs: MAGICK_INPUTS,
    outputs: MAGICK_OUTPUTS,
};

/// Fastest and most specialised first.
pub const PREFERENCE_ORDER: &[&ToolDescriptor] = &[&RSVG_CONVERT, &INKSCAPE, &MAGICK, &IM_CONVERT];

impl ToolDescriptor {
    pub fn accepts(&self, format: &FormatTag) -> bool {
        self.inputs.contains(&format.as_str())
    }

    pub fn produces(&self, format: &FormatTag) -> bool {
        self.outputs.contains(&format.as_str())
    }

    /// ImageMagick renders vector input at 96 DPI unless told otherwise,
    /// which blurs any upscale. It gets a density flag when rasterizing
    /// SVG to a fixed size.
    pub fn needs_density(&self, format_in: &FormatTag, size: TargetSize) -> bool {
        self.kind == ToolKind::RasterToolkit
            && format_in.is_vector()
            && size.exact().is_some()
    }

    /// Command line for a stdin-to-stdout conversion.
    ///
    /// A native-size request omits every size flag; all known programs
    /// then keep the document's own size, so none is excluded for lack of
    /// a native mode.
    pub fn arguments(&self, format_out: &FormatTag, size: TargetSize, density: Option<u32>) -> Vec<String> {
        let fmt = format_out.as_str();
        let mut args: Vec<String> = Vec::new();

        match self.kind {
            ToolKind::SvgRasterizer => {
                if let Some((w, h)) = size.exact() {
                    args.extend(["-w".into(), w.to_string(), "-h".into(), h.to_string()]);
                }
                args.extend(["-f".into(), fmt.to_string()]);
            }
            ToolKind::VectorEditor => {
                args.extend([
                    "-p".into(),
                    format!("--export-type={fmt}"),
                    "--export-filename".into(),
                    "-".into(),
                ]);
                if let Some((w, h)) = size.exact() {
                    args.extend(["-w".into(), w.to_string(), "-h".into(), h.to_string()]);
                }
            }
            ToolKind::RasterToolkit => {
                if let Some(dpi) = density {
                    args.extend(["-density".into(), dpi.to_string()]);
                }
                args.extend(["-background".into(), "none".into()]);
                if let Some((w, h)) = size.exact() {
                    args.extend(["-resize".into(), format!("{w}x{h}")]);
                }
                args.extend(["-".into(), format!("{fmt}:-")]);
            }
        }

        args
    }
}

/// Resolves a program name to an executable path.
pub trait ProgramLocator {
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Looks programs up on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchPath;

impl ProgramLocator for SearchPath {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Looks programs up only in the given directories, in order.
#[derive(Debug, Clone)]
pub struct SearchDirs {
    dirs: Vec<PathBuf>,
}

impl SearchDirs {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }
}

impl ProgramLocator for SearchDirs {
    fn locate(&self, program: &str) -> Option<PathBuf> {
        let cwd = self.dirs.first()?.clone();
        let paths: OsString = std::env::join_paths(&self.dirs).ok()?;
        which::which_in(program, Some(paths), cwd).ok()
    }
}

/// A program chosen for a format pair, found on this host.
#[derive(Debug, Clone)]
pub struct Selection {
    pub tool: &'static ToolDescriptor,
    pub program: PathBuf,
}

/// Everything needed to launch the converter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Selection {
    pub fn invocation(&self, format_out: &FormatTag, size: TargetSize, density: Option<u32>) -> Invocation {
        Invocation {
            program: self.program.clone(),
            args: self.tool.arguments(format_out, size, density),
        }
    }
}

/// Fail early when no known program could ever write `format_out`.
pub fn check_output_supported(format_out: &FormatTag) -> Result<()> {
    if PREFERENCE_ORDER.iter().any(|tool| tool.produces(format_out)) {
        Ok(())
    } else {
        Err(ConvertError::UnsupportedFormat(format_out.to_string()))
    }
}

/// First program in preference order that is installed and handles the pair.
pub fn find_tool(
    locator: &dyn ProgramLocator,
    format_in: &FormatTag,
    format_out: &FormatTag,
) -> Result<Selection> {
    for tool in PREFERENCE_ORDER.iter().copied() {
        if !tool.accepts(format_in) || !tool.produces(format_out) {
            debug!(program = tool.program, from = %format_in, to = %format_out, "Converter lacks format support");
            continue;
        }
        match locator.locate(tool.program) {
            Some(program) => {
                debug!(program = tool.program, path = ?program, from = %format_in, to = %format_out, "Selected converter");
                return Ok(Selection { tool, program });
            }
            None => {
                debug!(program = tool.program, "Converter not installed");
            }
        }
    }

    Err(ConvertError::NoSuitableTool {
        from: format_in.to_string(),
        to: format_out.to_string(),
    })
}

/// Pick a program and build its command line.
///
/// `source` is the vector document's intrinsic size, used for density
/// compensation. Without it ImageMagick gets [`FALLBACK_VECTOR_DPI`].
pub fn select(
    locator: &dyn ProgramLocator,
    format_in: &FormatTag,
    format_out: &FormatTag,
    size: TargetSize,
    source: Option<SvgMetrics>,
) -> Result<Invocation> {
    let selection = find_tool(locator, format_in, format_out)?;
    let density = density_for(selection.tool, format_in, size, source);
    Ok(selection.invocation(format_out, size, density))
}

pub(crate) fn density_for(
    tool: &ToolDescriptor,
    format_in: &FormatTag,
    size: TargetSize,
    source: Option<SvgMetrics>,
) -> Option<u32> {
    if !tool.needs_density(format_in, size) {
        return None;
    }
    let (w, h) = size.exact()?;
    Some(match source {
        Some(src) => compute_dpi(src.width as i64, src.height as i64, w as i64, h as i64),
        None => FALLBACK_VECTOR_DPI,
    })
}

/// One known program and whether it is installed here.
#[derive(Debug, Clone, Serialize)]
pub struct ToolReport {
    pub program: &'static str,
    pub kind: ToolKind,
    pub path: Option<PathBuf>,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
}

pub fn list_tools(locator: &dyn ProgramLocator) -> Vec<ToolReport> {
    PREFERENCE_ORDER
        .iter()
        .map(|tool| ToolReport {
            program: tool.program,
            kind: tool.kind,
            path: locator.locate(tool.program),
            inputs: tool.inputs,
            outputs: tool.outputs,
        })
        .collect()
}
