//! Stream conversion
//!
//! `input -> sniff -> select program -> (SVG metrics) -> run -> output`
//!
//! Every step before the program starts only reads through a
//! [`TeeSource`], so a failure there hands the caller's stream back
//! complete. The program is then fed the buffered prefix in place,
//! followed by the live remainder; only remainder bytes are retained
//! (unless disabled), so at most one copy of the input is held.

use crate::config::ConvertOptions;
use crate::error::{ConvertError, ConvertFailure, ConvertResult};
use crate::format::{sniff, FormatTag};
use crate::process::run_converter;
use crate::scaling::{scale_with_aspect, TargetSize};
use crate::svg_metrics::{svg_metrics_from_bytes, SvgMetrics};
use crate::tee::{Replay, TeeSource};
use crate::tools::{
    check_output_supported, density_for, find_tool, list_tools, ProgramLocator, SearchPath,
    ToolReport,
};
use std::fmt;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Converted image bytes, readable as a stream.
pub struct ConvertedImage {
    format: FormatTag,
    program: PathBuf,
    data: Cursor<Vec<u8>>,
}

impl ConvertedImage {
    pub fn format(&self) -> &FormatTag {
        &self.format
    }

    /// The converter that produced this image.
    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn len(&self) -> usize {
        self.data.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.get_ref()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_inner()
    }
}

impl Read for ConvertedImage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl fmt::Debug for ConvertedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertedImage")
            .field("format", &self.format)
            .field("program", &self.program)
            .field("len", &self.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum SizeRequest {
    Exact(TargetSize),
    /// Longest side, aspect ratio kept.
    FitWithin(u32),
}

/// Converts image streams with whichever external program fits.
///
/// Holds no state between calls beyond its options; every conversion
/// looks the programs up again.
pub struct Converter {
    options: ConvertOptions,
    locator: Box<dyn ProgramLocator + Send + Sync>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(ConvertOptions::default())
    }
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            locator: Box::new(SearchPath),
        }
    }

    /// Options from `IMGCONV_*` environment variables, programs from `PATH`.
    pub fn from_env() -> Self {
        Self::new(ConvertOptions::from_env())
    }

    pub fn with_locator<L>(mut self, locator: L) -> Self
    where
        L: ProgramLocator + Send + Sync + 'static,
    {
        self.locator = Box::new(locator);
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub fn locator(&self) -> &dyn ProgramLocator {
        self.locator.as_ref()
    }

    /// Convert `input` to `format` at `width`x`height`.
    ///
    /// Both dimensions must be positive, or both -1 to keep the source's
    /// own size. On failure the returned [`ConvertFailure`] carries the
    /// input back.
    pub fn convert<R: Read + Send>(&self, input: R, width: i64, height: i64, format: &str) -> ConvertResult<R> {
        match TargetSize::new(width, height) {
            Ok(size) => self.run(input, SizeRequest::Exact(size), FormatTag::new(format)),
            Err(error) => Err(ConvertFailure::new(error, Replay::untouched(input))),
        }
    }

    /// Convert `input` to `format` so its longer side is `max_dimension`.
    ///
    /// SVG sources are scaled by their intrinsic aspect ratio. Raster
    /// sources are handed a `max_dimension` square and the converter fits
    /// the image inside it.
    pub fn convert_with_aspect<R: Read + Send>(
        &self,
        input: R,
        max_dimension: i64,
        format: &str,
    ) -> ConvertResult<R> {
        match u32::try_from(max_dimension) {
            Ok(max) if max > 0 => self.run(input, SizeRequest::FitWithin(max), FormatTag::new(format)),
            _ => Err(ConvertFailure::new(
                ConvertError::InvalidDimensions {
                    width: max_dimension,
                    height: max_dimension,
                },
                Replay::untouched(input),
            )),
        }
    }

    pub fn list_tools(&self) -> Vec<ToolReport> {
        list_tools(self.locator())
    }

    fn run<R: Read + Send>(&self, input: R, request: SizeRequest, format_out: FormatTag) -> ConvertResult<R> {
        if let Err(error) = check_output_supported(&format_out) {
            return Err(ConvertFailure::new(error, Replay::untouched(input)));
        }

        let mut tee = TeeSource::new(input);

        let format_in = match sniff(tee.probe(), self.options.sniff_limit) {
            Ok(format) => format,
            Err(error) => return Err(ConvertFailure::new(error, tee.into_replay())),
        };
        debug!(format = %format_in, "Detected input format");

        let selection = match find_tool(self.locator(), &format_in, &format_out) {
            Ok(selection) => selection,
            Err(error) => return Err(ConvertFailure::new(error, tee.into_replay())),
        };

        let mut metrics: Option<SvgMetrics> = None;
        let size = match request {
            SizeRequest::Exact(size) => size,
            SizeRequest::FitWithin(max) if format_in.is_vector() => {
                let source = match read_metrics(&mut tee) {
                    Ok(source) => source,
                    Err(error) => return Err(ConvertFailure::new(error, tee.into_replay())),
                };
                metrics = Some(source);
                let (width, height) = scale_with_aspect(source.width, source.height, max);
                TargetSize::Exact { width, height }
            }
            SizeRequest::FitWithin(max) => TargetSize::Exact {
                width: max,
                height: max,
            },
        };

        if metrics.is_none() && selection.tool.needs_density(&format_in, size) {
            match read_metrics(&mut tee) {
                Ok(source) => metrics = Some(source),
                Err(error) => {
                    warn!(error = %error, "No SVG metrics for density compensation, using fixed density")
                }
            }
        }

        let density = density_for(selection.tool, &format_in, size, metrics);
        let invocation = selection.invocation(&format_out, size, density);

        info!(
            from = %format_in,
            to = %format_out,
            size = ?size,
            density = ?density,
            program = ?invocation.program,
            "Converting image"
        );

        let (prefix, mut rest) = tee.into_replay().into_parts();
        let run = run_converter(&invocation, &prefix, &mut rest, &self.options);

        let retain = self.options.retain_input;
        let recover = move |mut prefix: Vec<u8>, rest: R, fed: Vec<u8>| {
            if retain {
                prefix.extend_from_slice(&fed);
                Replay::from_parts(prefix, rest)
            } else {
                // Only the untouched remainder is left.
                Replay::untouched(rest)
            }
        };

        let output = match run.outcome {
            Ok(output) => output,
            Err(error) => return Err(ConvertFailure::new(error, recover(prefix, rest, run.fed))),
        };

        let failure = output.failure(&invocation.program, self.options.diagnostics);
        let image = ConvertedImage {
            format: format_out,
            program: invocation.program,
            data: Cursor::new(output.stdout),
        };

        match failure {
            None => Ok(image),
            Some(error) => Err(ConvertFailure {
                error,
                input: recover(prefix, rest, run.fed),
                output: Some(image),
            }),
        }
    }
}

/// Whole-document metrics, parsed straight from the tee's buffer.
fn read_metrics<R: Read>(tee: &mut TeeSource<R>) -> Result<SvgMetrics, ConvertError> {
    svg_metrics_from_bytes(tee.read_all()?)
}

/// [`Converter::convert`] with options from the environment.
pub fn convert<R: Read + Send>(input: R, width: i64, height: i64, format: &str) -> ConvertResult<R> {
    Converter::from_env().convert(input, width, height, format)
}

/// [`Converter::convert_with_aspect`] with options from the environment.
pub fn convert_with_aspect<R: Read + Send>(input: R, max_dimension: i64, format: &str) -> ConvertResult<R> {
    Converter::from_env().convert_with_aspect(input, max_dimension, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ProgramLocator;

    struct NothingInstalled;

    impl ProgramLocator for NothingInstalled {
        fn locate(&self, _program: &str) -> Option<PathBuf> {
            None
        }
    }

    fn converter() -> Converter {
        Converter::default().with_locator(NothingInstalled)
    }

    fn drain<R: Read>(mut r: R) -> Vec<u8> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        out
    }

    const SVG: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100"><rect width="100" height="100"/></svg>"#;

    #[test]
    fn test_invalid_dimensions_return_input() {
        for (w, h) in [(0, 10), (10, 0), (-2, 10), (10, -5)] {
            let failure = converter().convert(SVG, w, h, "png").unwrap_err();
            assert!(matches!(failure.error, ConvertError::InvalidDimensions { .. }));
            assert_eq!(drain(failure.input), SVG);
        }
    }

    #[test]
    fn test_invalid_max_dimension() {
        for max in [0, -1, -7] {
            let failure = converter().convert_with_aspect(SVG, max, "png").unwrap_err();
            assert!(matches!(failure.error, ConvertError::InvalidDimensions { .. }));
            assert_eq!(drain(failure.input), SVG);
        }
    }

    #[test]
    fn test_unknown_output_format() {
        let failure = converter().convert(SVG, 10, 10, "docx").unwrap_err();
        assert!(matches!(failure.error, ConvertError::UnsupportedFormat(_)));
        assert_eq!(drain(failure.input), SVG);
    }

    #[test]
    fn test_non_image_input() {
        let text = b"this is not an image at all";
        let failure = converter().convert(&text[..], 10, 10, "png").unwrap_err();
        assert!(matches!(failure.error, ConvertError::UnsupportedMedia(_)));
        assert_eq!(drain(failure.input), text);
    }

    #[test]
    fn test_no_tool_returns_input() {
        let failure = converter().convert_with_aspect(SVG, 256, "png").unwrap_err();
        match &failure.error {
            ConvertError::NoSuitableTool { from, to } => {
                assert_eq!(from, "svg");
                assert_eq!(to, "png");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(failure.output.is_none());
        assert_eq!(drain(failure.input), SVG);
    }

    /// Resolves every program to a path that doesn't exist, so selection
    /// succeeds and nothing can actually run.
    struct Phantom;

    impl ProgramLocator for Phantom {
        fn locate(&self, program: &str) -> Option<PathBuf> {
            Some(PathBuf::from("/nonexistent/imgconv-test").join(program))
        }
    }

    #[test]
    fn test_oversized_svg_size_is_an_error_not_a_panic() {
        let svg: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg" width="4294967296" height="10"/>"#;
        let failure = Converter::default()
            .with_locator(Phantom)
            .convert_with_aspect(svg, 256, "png")
            .unwrap_err();
        assert!(matches!(failure.error, ConvertError::MetricsUnavailable(_)));
        assert_eq!(drain(failure.input), svg);
    }

    #[test]
    fn test_spawn_failure_returns_svg_read_for_metrics() {
        let failure = Converter::default()
            .with_locator(Phantom)
            .convert_with_aspect(SVG, 64, "png")
            .unwrap_err();
        assert!(matches!(failure.error, ConvertError::Spawn { .. }));
        assert_eq!(drain(failure.input), SVG);
    }

    #[test]
    fn test_large_input_survives_sniff_failure() {
        let mut data = b"plain text ".repeat(10_000);
        data.push(b'!');
        let failure = converter().convert(&data[..], -1, -1, "png").unwrap_err();
        assert_eq!(drain(failure.input), data);
    }
}
