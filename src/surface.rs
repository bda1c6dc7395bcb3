//! Triangulated surface input (STL).
//!
//! Surfaces are only read far enough to reject bad input before meshing and to
//! report their extent. The meshing port reads the file again on its own.

use std::path::Path;

use log::debug;

use crate::datatypes::Vertex;
use crate::error::{FerrostaticError, Result};

const STL_HEADER_LEN: usize = 80;
const STL_TRIANGLE_LEN: usize = 50;

#[derive(Debug, Clone)]
pub struct Surface {
    pub triangles: Vec<[Vertex; 3]>,
}

impl Surface {
    /// Axis-aligned bounds as (min, max)
    pub fn bounding_box(&self) -> (Vertex, Vertex) {
        let mut min = Vertex::new(f64::MAX, f64::MAX, f64::MAX);
        let mut max = Vertex::new(f64::MIN, f64::MIN, f64::MIN);

        for vertex in self.triangles.iter().flatten() {
            min.x = min.x.min(vertex.x);
            min.y = min.y.min(vertex.y);
            min.z = min.z.min(vertex.z);
            max.x = max.x.max(vertex.x);
            max.y = max.y.max(vertex.y);
            max.z = max.z.max(vertex.z);
        }

        (min, max)
    }
}

/// Checks that `path` names an existing `.stl` file. Runs before any meshing
/// work is started.
pub fn validate_surface_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(FerrostaticError::Input(format!(
            "STL file not found: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(FerrostaticError::Input(format!(
            "STL path is not a file: {}",
            path.display()
        )));
    }

    let is_stl = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("stl"))
        .unwrap_or(false);
    if !is_stl {
        return Err(FerrostaticError::Input(format!(
            "File must be .stl, got: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Reads an ASCII or binary STL file
pub fn read_stl(path: &Path) -> Result<Surface> {
    validate_surface_path(path)?;

    let bytes = std::fs::read(path)?;

    let triangles = if looks_like_ascii(&bytes) {
        parse_ascii(&String::from_utf8_lossy(&bytes))?
    } else {
        parse_binary(&bytes)?
    };

    if triangles.is_empty() {
        return Err(FerrostaticError::Input(format!(
            "STL file contains no triangles: {}",
            path.display()
        )));
    }

    debug!(
        "read {} triangles from {}",
        triangles.len(),
        path.display()
    );

    Ok(Surface { triangles })
}

fn looks_like_ascii(bytes: &[u8]) -> bool {
    // binary files may also start with "solid", so require a facet keyword
    let head = &bytes[..bytes.len().min(512)];
    let head = String::from_utf8_lossy(head);
    head.trim_start().starts_with("solid") && head.contains("facet")
}

fn parse_ascii(contents: &str) -> Result<Vec<[Vertex; 3]>> {
    let mut triangles = Vec::new();
    let mut corners: Vec<Vertex> = Vec::with_capacity(3);

    for (line_no, line) in contents.lines().enumerate() {
        let mut tokens = line.split_whitespace();

        match tokens.next() {
            Some("vertex") => {
                let coords: Vec<f64> = tokens
                    .map(|t| t.parse::<f64>())
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|err| {
                        FerrostaticError::Input(format!(
                            "Non-float vertex coordinate in STL at line {}: {err}",
                            line_no + 1
                        ))
                    })?;
                if coords.len() != 3 {
                    return Err(FerrostaticError::Input(format!(
                        "STL vertex at line {} has {} coordinates",
                        line_no + 1,
                        coords.len()
                    )));
                }
                corners.push(Vertex::new(coords[0], coords[1], coords[2]));
            }
            Some("endloop") => {
                if corners.len() != 3 {
                    return Err(FerrostaticError::Input(format!(
                        "STL facet ending at line {} has {} vertices",
                        line_no + 1,
                        corners.len()
                    )));
                }
                triangles.push([corners[0], corners[1], corners[2]]);
                corners.clear();
            }
            _ => continue,
        }
    }

    Ok(triangles)
}

fn parse_binary(bytes: &[u8]) -> Result<Vec<[Vertex; 3]>> {
    if bytes.len() < STL_HEADER_LEN + 4 {
        return Err(FerrostaticError::Input(
            "STL file is too short to hold a binary header".to_owned(),
        ));
    }

    let mut count_bytes = [0u8; 4];
    count_bytes.copy_from_slice(&bytes[STL_HEADER_LEN..STL_HEADER_LEN + 4]);
    let count = u32::from_le_bytes(count_bytes) as usize;

    let expected = STL_HEADER_LEN + 4 + count * STL_TRIANGLE_LEN;
    if bytes.len() < expected {
        return Err(FerrostaticError::Input(format!(
            "Binary STL declares {count} triangles but holds {} bytes",
            bytes.len()
        )));
    }

    let read_f32 = |offset: usize| {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[offset..offset + 4]);
        f32::from_le_bytes(buf) as f64
    };

    let mut triangles = Vec::with_capacity(count);
    for i in 0..count {
        // skip the 12-byte normal
        let base = STL_HEADER_LEN + 4 + i * STL_TRIANGLE_LEN + 12;
        let corner = |k: usize| {
            let offset = base + 12 * k;
            Vertex::new(read_f32(offset), read_f32(offset + 4), read_f32(offset + 8))
        };
        triangles.push([corner(0), corner(1), corner(2)]);
    }

    Ok(triangles)
}
