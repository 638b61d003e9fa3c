//! imgconv - image conversion through whatever converter is installed
//!
//! Wraps `rsvg-convert`, Inkscape and ImageMagick behind one stream API:
//! - Content-based format detection
//! - Program selection by preference order and format support
//! - Aspect-preserving sizing from an SVG's width/height or viewBox
//! - Density compensation so ImageMagick doesn't blur upscaled SVGs
//! - Deadlock-free piping with a bounded wait
//!
//! Failures hand the caller's input back:
//!
//! ```no_run
//! use std::io::Read;
//!
//! let svg = std::fs::File::open("icon.svg")?;
//! match imgconv::convert_with_aspect(svg, 256, "png") {
//!     Ok(mut png) => {
//!         let mut bytes = Vec::new();
//!         png.read_to_end(&mut bytes)?;
//!     }
//!     Err(failure) => {
//!         eprintln!("conversion failed: {}", failure.error);
//!         let _original = failure.input;
//!     }
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod file_ops;
pub mod format;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod scaling;
pub mod svg_metrics;
pub mod tee;
pub mod tools;

pub use config::{ConvertOptions, DiagnosticsPolicy};
pub use error::{ConvertError, ConvertFailure, ConvertResult, Result};
pub use file_ops::{convert_file, convert_file_with_aspect};
pub use format::{detect_format, FormatTag};
pub use pipeline::{convert, convert_with_aspect, ConvertedImage, Converter};
pub use scaling::{compute_dpi, scale_with_aspect, TargetSize};
pub use svg_metrics::{read_svg_metrics, svg_metrics_from_bytes, SvgMetrics};
pub use tee::Replay;
pub use tools::{
    select, Invocation, ProgramLocator, SearchDirs, SearchPath, ToolDescriptor, ToolKind,
    ToolReport,
};
