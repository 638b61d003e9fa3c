//! File-path wrappers around the stream API
//!
//! The destination is only created once conversion succeeded, and removed
//! again if writing it fails, so an error never leaves a file behind.

use crate::error::{ConvertError, Result};
use crate::pipeline::{ConvertedImage, Converter};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

impl Converter {
    pub fn convert_file(
        &self,
        src: &Path,
        dest: &Path,
        width: i64,
        height: i64,
        format: &str,
    ) -> Result<()> {
        let input = open_source(src)?;
        let image = self
            .convert(input, width, height, format)
            .map_err(|failure| failure.into_error())?;
        write_destination(dest, image)
    }

    pub fn convert_file_with_aspect(
        &self,
        src: &Path,
        dest: &Path,
        max_dimension: i64,
        format: &str,
    ) -> Result<()> {
        let input = open_source(src)?;
        let image = self
            .convert_with_aspect(input, max_dimension, format)
            .map_err(|failure| failure.into_error())?;
        write_destination(dest, image)
    }
}

/// [`Converter::convert_file`] with options from the environment.
pub fn convert_file(src: &Path, dest: &Path, width: i64, height: i64, format: &str) -> Result<()> {
    Converter::from_env().convert_file(src, dest, width, height, format)
}

/// [`Converter::convert_file_with_aspect`] with options from the environment.
pub fn convert_file_with_aspect(src: &Path, dest: &Path, max_dimension: i64, format: &str) -> Result<()> {
    Converter::from_env().convert_file_with_aspect(src, dest, max_dimension, format)
}

fn open_source(src: &Path) -> Result<BufReader<File>> {
    File::open(src)
        .map(BufReader::new)
        .map_err(|e| ConvertError::file_io(src, e))
}

fn write_destination(dest: &Path, mut image: ConvertedImage) -> Result<()> {
    let file = File::create(dest).map_err(|e| ConvertError::file_io(dest, e))?;
    let mut writer = BufWriter::new(file);

    let written = io::copy(&mut image, &mut writer).and_then(|n| writer.flush().map(|_| n));
    match written {
        Ok(bytes) => {
            info!(dest = ?dest, bytes, format = %image.format(), "Wrote converted image");
            Ok(())
        }
        Err(e) => {
            drop(writer);
            if let Err(remove_err) = std::fs::remove_file(dest) {
                warn!(dest = ?dest, error = %remove_err, "Failed to remove partial output");
            }
            Err(ConvertError::file_io(dest, e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ProgramLocator;
    use std::path::PathBuf;

    struct NothingInstalled;

    impl ProgramLocator for NothingInstalled {
        fn locate(&self, _program: &str) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.png");
        let err = Converter::default()
            .with_locator(NothingInstalled)
            .convert_file(&dir.path().join("nope.svg"), &dest, 10, 10, "png")
            .unwrap_err();
        assert!(matches!(err, ConvertError::FileIo { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_failed_conversion_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.svg");
        std::fs::write(&src, r#"<svg viewBox="0 0 10 10"/>"#).unwrap();
        let dest = dir.path().join("out.png");

        let err = Converter::default()
            .with_locator(NothingInstalled)
            .convert_file_with_aspect(&src, &dest, 64, "png")
            .unwrap_err();
        assert!(matches!(err, ConvertError::NoSuitableTool { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_invalid_dimensions_create_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.svg");
        std::fs::write(&src, r#"<svg viewBox="0 0 10 10"/>"#).unwrap();

        let err = Converter::default()
            .with_locator(NothingInstalled)
            .convert_file(&src, &dir.path().join("out.png"), 0, 5, "png")
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidDimensions { .. }));
        assert!(!dir.path().join("out.png").exists());
    }
}
