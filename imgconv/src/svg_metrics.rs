//! Intrinsic size of an SVG document
//!
//! Uses the root `width`/`height` attributes when both are positive plain
//! numbers (optionally `px`). Otherwise the `viewBox` is read as
//! `x1 y1 x2 y2` and the size is `x2 - x1` by `y2 - y1`, so a negative or
//! shifted origin still yields the extent.

use crate::error::{ConvertError, Result};
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvgMetrics {
    pub width: u32,
    pub height: u32,
}

/// Read a whole SVG document from `input` and return its intrinsic size.
///
/// Both returned dimensions are always at least 1.
pub fn read_svg_metrics<R: Read>(mut input: R) -> Result<SvgMetrics> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    svg_metrics_from_bytes(&bytes)
}

/// Like [`read_svg_metrics`] for a document already in memory. Parses in
/// place without copying it.
pub fn svg_metrics_from_bytes(bytes: &[u8]) -> Result<SvgMetrics> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ConvertError::MetricsUnavailable(format!("document is not UTF-8 text: {e}")))?;
    parse_svg_metrics(text)
}

pub fn parse_svg_metrics(text: &str) -> Result<SvgMetrics> {
    let doc = roxmltree::Document::parse(text)
        .map_err(|e| ConvertError::MetricsUnavailable(format!("not a well-formed document: {e}")))?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(ConvertError::MetricsUnavailable(format!(
            "root element is <{}>, not <svg>",
            root.tag_name().name()
        )));
    }

    let width = root.attribute("width").and_then(parse_length);
    let height = root.attribute("height").and_then(parse_length);
    if let (Some(width), Some(height)) = (width, height) {
        return Ok(SvgMetrics { width, height });
    }

    if let Some((width, height)) = root.attribute("viewBox").and_then(parse_view_box) {
        return Ok(SvgMetrics { width, height });
    }

    Err(ConvertError::MetricsUnavailable(
        "no positive width/height or viewBox".to_string(),
    ))
}

/// Plain user-unit length, truncated. Percentages and physical units are
/// not intrinsic sizes and are ignored.
fn parse_length(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    let numeric = trimmed.strip_suffix("px").unwrap_or(trimmed).trim_end();
    to_dimension(numeric.parse().ok()?)
}

fn parse_view_box(value: &str) -> Option<(u32, u32)> {
    let parts: Vec<f64> = value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    if parts.len() != 4 {
        return None;
    }

    let (x1, y1, x2, y2) = (parts[0], parts[1], parts[2], parts[3]);
    Some((to_dimension(x2 - x1)?, to_dimension(y2 - y1)?))
}

/// Whole pixels in `1..=u32::MAX`; anything else counts as missing.
fn to_dimension(value: f64) -> Option<u32> {
    if !value.is_finite() {
        return None;
    }
    // `as` saturates, so huge values land outside the u32 range
    u32::try_from(value.trunc() as i64).ok().filter(|&v| v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(svg: &str) -> Result<SvgMetrics> {
        parse_svg_metrics(svg)
    }

    #[test]
    fn test_explicit_width_height() {
        let m = metrics(r#"<svg xmlns="http://www.w3.org/2000/svg" width="48" height="32"/>"#).unwrap();
        assert_eq!(m, SvgMetrics { width: 48, height: 32 });
    }

    #[test]
    fn test_px_suffix_and_fraction() {
        let m = metrics(r#"<svg width="10.9px" height=" 20 "/>"#).unwrap();
        assert_eq!(m, SvgMetrics { width: 10, height: 20 });
    }

    #[test]
    fn test_view_box_fallback() {
        let m = metrics(r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100"/>"#).unwrap();
        assert_eq!(m, SvgMetrics { width: 100, height: 100 });
    }

    #[test]
    fn test_view_box_negative_origin() {
        let m = metrics(r#"<svg viewBox="-50 -25 50 25"/>"#).unwrap();
        assert_eq!(m, SvgMetrics { width: 100, height: 50 });
    }

    #[test]
    fn test_view_box_commas() {
        let m = metrics(r#"<svg viewBox="0,0,64,32"/>"#).unwrap();
        assert_eq!(m, SvgMetrics { width: 64, height: 32 });
    }

    #[test]
    fn test_percent_width_falls_back_to_view_box() {
        let m = metrics(r#"<svg width="100%" height="100%" viewBox="0 0 24 12"/>"#).unwrap();
        assert_eq!(m, SvgMetrics { width: 24, height: 12 });
    }

    #[test]
    fn test_zero_width_falls_back_to_view_box() {
        let m = metrics(r#"<svg width="0" height="40" viewBox="0 0 8 4"/>"#).unwrap();
        assert_eq!(m, SvgMetrics { width: 8, height: 4 });
    }

    #[test]
    fn test_no_size_information() {
        assert!(matches!(
            metrics(r#"<svg xmlns="http://www.w3.org/2000/svg"><rect/></svg>"#),
            Err(ConvertError::MetricsUnavailable(_))
        ));
    }

    #[test]
    fn test_degenerate_view_box() {
        assert!(metrics(r#"<svg viewBox="10 10 10 50"/>"#).is_err());
        assert!(metrics(r#"<svg viewBox="0 0 100"/>"#).is_err());
        assert!(metrics(r#"<svg viewBox="a b c d"/>"#).is_err());
    }

    #[test]
    fn test_oversized_width_is_not_a_size() {
        assert!(matches!(
            metrics(r#"<svg width="4294967296" height="10"/>"#),
            Err(ConvertError::MetricsUnavailable(_))
        ));
        let m = metrics(r#"<svg width="4294967296" height="10" viewBox="0 0 40 10"/>"#).unwrap();
        assert_eq!(m, SvgMetrics { width: 40, height: 10 });
        assert!(metrics(r#"<svg viewBox="0 0 1e12 10"/>"#).is_err());
        assert_eq!(
            metrics(r#"<svg width="4294967295" height="1"/>"#).unwrap(),
            SvgMetrics { width: u32::MAX, height: 1 }
        );
    }

    #[test]
    fn test_not_svg() {
        assert!(metrics("<html><body/></html>").is_err());
        assert!(metrics("<svg").is_err());
    }

    #[test]
    fn test_read_from_stream() {
        let doc = br#"<?xml version="1.0"?><svg width="3" height="4"/>"#;
        assert_eq!(
            read_svg_metrics(&doc[..]).unwrap(),
            SvgMetrics { width: 3, height: 4 }
        );
        assert!(matches!(
            read_svg_metrics(&[0xFFu8, 0xFE, 0x00][..]),
            Err(ConvertError::MetricsUnavailable(_))
        ));
        assert_eq!(
            svg_metrics_from_bytes(br#"<svg viewBox="0 0 7 9"/>"#).unwrap(),
            SvgMetrics { width: 7, height: 9 }
        );
    }
}
