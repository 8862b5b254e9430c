/// TOLERANT GPX READER
///
/// Reads every track point of every track and segment of a GPX file. Files
/// with minor XML damage (missing declaration, missing version, stray control
/// characters, truncated endings) are retried once after safe repairs that
/// never touch coordinates or elevations.

use std::fs;
use std::io::{BufReader, Cursor};
use std::path::Path;

use gpx::{read, Gpx};
use log::{debug, warn};

use crate::error::{Result, TrackError};
use crate::track_types::GeoPoint;

/// Track points in file order. A point without `<ele>` gets altitude 0.0.
pub fn read_track_points(path: &Path) -> Result<Vec<GeoPoint>> {
    let gpx = read_gpx_tolerantly(path)?;
    Ok(extract_points(&gpx))
}

pub fn read_gpx_tolerantly(path: &Path) -> Result<Gpx> {
    let content = fs::read_to_string(path).map_err(|e| TrackError::io(path, e))?;

    match parse_gpx(&content) {
        Ok(gpx) => {
            debug!("standard GPX parsing succeeded for {}", path.display());
            return Ok(gpx);
        }
        Err(e) => {
            warn!("standard GPX parsing failed for {}: {}", path.display(), e);
        }
    }

    let repaired = apply_minimal_safe_repairs(&content);
    parse_gpx(&repaired)
        .map(|gpx| {
            warn!("{} needed minimal repair before parsing", path.display());
            gpx
        })
        .map_err(|e| TrackError::Gpx {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

pub fn extract_points(gpx: &Gpx) -> Vec<GeoPoint> {
    gpx.tracks
        .iter()
        .flat_map(|track| track.segments.iter())
        .flat_map(|segment| segment.points.iter())
        .map(|waypoint| {
            let point = waypoint.point();
            GeoPoint::new(point.y(), point.x(), waypoint.elevation.unwrap_or(0.0))
        })
        .collect()
}

fn parse_gpx(content: &str) -> std::result::Result<Gpx, gpx::errors::GpxError> {
    read(BufReader::new(Cursor::new(content.as_bytes())))
}

/// Repairs that only add structure or drop invalid characters.
fn apply_minimal_safe_repairs(content: &str) -> String {
    let mut repaired = remove_invalid_xml_chars(content.trim_start_matches('\u{feff}'));

    if !repaired.trim_start().starts_with("<?xml") {
        repaired = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", repaired.trim_start());
    }

    repaired = add_gpx_version(&repaired);
    close_unclosed_tags(&repaired)
}

fn add_gpx_version(content: &str) -> String {
    let Some(gpx_start) = content.find("<gpx") else {
        return content.to_string();
    };
    let Some(tag_len) = content[gpx_start..].find('>') else {
        return content.to_string();
    };

    let tag_end = gpx_start + tag_len;
    let tag = &content[gpx_start..tag_end];
    if tag.contains("version=") {
        return content.to_string();
    }

    let mut attributes = String::from(" version=\"1.1\"");
    if !tag.contains("xmlns=") {
        attributes.push_str(" xmlns=\"http://www.topografix.com/GPX/1/1\"");
    }

    // insert before `>` (or `/>` on a self-closing root)
    let insert_at = if tag.ends_with('/') { tag_end - 1 } else { tag_end };
    format!("{}{}{}", &content[..insert_at], attributes, &content[insert_at..])
}

fn close_unclosed_tags(content: &str) -> String {
    let mut repaired = content.trim_end().to_string();
    if repaired.ends_with("</gpx>") || !repaired.contains("<gpx") {
        return repaired;
    }

    let missing = |open: &str, close: &str| {
        repaired
            .matches(open)
            .count()
            .saturating_sub(repaired.matches(close).count())
    };
    let missing_trkseg = missing("<trkseg>", "</trkseg>");
    let missing_trk = missing("<trk>", "</trk>");

    // a truncated file often ends mid-element; drop the partial tail
    if let Some(last_close) = repaired.rfind('>') {
        repaired.truncate(last_close + 1);
    }

    for _ in 0..missing_trkseg {
        repaired.push_str("\n    </trkseg>");
    }
    for _ in 0..missing_trk {
        repaired.push_str("\n  </trk>");
    }
    repaired.push_str("\n</gpx>");
    repaired
}

fn remove_invalid_xml_chars(content: &str) -> String {
    content
        .chars()
        .filter(|&c| {
            matches!(c, '\t' | '\n' | '\r')
                || ('\u{20}'..='\u{d7ff}').contains(&c)
                || ('\u{e000}'..='\u{fffd}').contains(&c)
                || c >= '\u{10000}'
        })
        .collect()
}
