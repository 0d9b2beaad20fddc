//! WKB writing operations.

use std::io::Write;

use anyhow::{Context, Result};
use geo::{LineString, MultiPolygon, Polygon};

/// WKB geometry type for Polygon
const WKB_POLYGON: u32 = 3;
/// WKB geometry type for MultiPolygon
const WKB_MULTIPOLYGON: u32 = 6;
/// WKB byte order: little endian
const WKB_LE: u8 = 1;

/// Write a ring as a point count followed by little-endian x/y pairs.
fn write_ring(out: &mut impl Write, ring: &LineString<f64>) -> Result<()> {
    out.write_all(&(ring.0.len() as u32).to_le_bytes())?;
    for coord in ring.coords() {
        out.write_all(&coord.x.to_le_bytes())?;
        out.write_all(&coord.y.to_le_bytes())?;
    }
    Ok(())
}

fn write_polygon(out: &mut impl Write, poly: &Polygon<f64>) -> Result<()> {
    out.write_all(&[WKB_LE])?;
    out.write_all(&WKB_POLYGON.to_le_bytes())?;

    // 1 exterior + interiors
    let num_rings = (1 + poly.interiors().len()) as u32;
    out.write_all(&num_rings.to_le_bytes())?;

    write_ring(out, poly.exterior())?;
    for interior in poly.interiors() {
        write_ring(out, interior)?;
    }
    Ok(())
}

/// Write a MultiPolygon as little-endian ISO WKB.
///
/// Output is byte-for-byte determined by the coordinate sequence, so it is
/// usable as a canonical form for hashing.
pub(crate) fn write_multipolygon(out: &mut impl Write, mp: &MultiPolygon<f64>) -> Result<()> {
    out.write_all(&[WKB_LE])
        .context("[io::wkb::write] Failed to write byte order")?;
    out.write_all(&WKB_MULTIPOLYGON.to_le_bytes())?;
    out.write_all(&(mp.0.len() as u32).to_le_bytes())?;
    for poly in &mp.0 {
        write_polygon(out, poly)?;
    }
    Ok(())
}
