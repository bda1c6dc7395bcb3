use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    datatypes::{Element, Mesh, Vertex},
    error::{FerrostaticError, Result},
    function_space::element_geometry,
    surface::{read_stl, validate_surface_path},
};

/// Elements at or below this quality are illegal
pub const ILLEGAL_QUALITY: f64 = 0.0;
/// Elements below this quality are reported as low quality
pub const LOW_QUALITY: f64 = 0.2;
pub const HISTOGRAM_BINS: usize = 10;

/// Turns a closed surface triangulation into a tetrahedral mesh
pub trait MeshingPort {
    /// # Arguments
    /// * `surface` - Path to a validated `.stl` file
    /// * `work_dir` - Directory for scratch files
    fn tetrahedralize(&self, surface: &Path, work_dir: &Path) -> Result<Mesh>;
}

/// Meshing port backed by the gmsh command line
#[derive(Debug, Clone)]
pub struct GmshMesher {
    pub program: String,
    pub element_size: Option<f64>,
}

impl GmshMesher {
    pub fn new(program: &str, element_size: Option<f64>) -> GmshMesher {
        GmshMesher {
            program: program.to_owned(),
            element_size,
        }
    }
}

impl MeshingPort for GmshMesher {
    fn tetrahedralize(&self, surface: &Path, work_dir: &Path) -> Result<Mesh> {
        let stem = surface
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("surface");
        let geo_filepath = work_dir.join(format!("{stem}.geo"));
        let mesh_filepath = work_dir.join(format!("{stem}.msh"));

        let surface = std::fs::canonicalize(surface)?;
        build_geo(&surface, &geo_filepath, self.element_size)?;

        info!("running gmsh on {}...", surface.display());
        let output = std::process::Command::new(&self.program)
            .arg(&geo_filepath)
            .arg("-3")
            .arg("-format")
            .arg("msh4")
            .arg("-o")
            .arg(&mesh_filepath)
            .output();

        remove_scratch_file(&geo_filepath);

        let output = match output {
            Ok(out) => out,
            Err(err) => {
                return Err(FerrostaticError::Mesher(format!(
                    "Gmsh failed to start ({}): {err}",
                    self.program
                )));
            }
        };

        if !output.status.success() {
            remove_scratch_file(&mesh_filepath);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FerrostaticError::Mesher(format!(
                "Gmsh exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let contents = std::fs::read_to_string(&mesh_filepath).map_err(|err| {
            FerrostaticError::Mesher(format!("Unable to open auto-generated mesh file: {err}"))
        })?;
        remove_scratch_file(&mesh_filepath);

        parse_msh(&contents)
    }
}

fn remove_scratch_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        warn!("failed to delete {}: {err}", path.display());
    }
}

/// Writes a .geo script that merges a surface and meshes the enclosed volume
///
/// # Arguments
/// * `surface` - Absolute path of the `.stl` file
/// * `output_file` - The output .geo file
/// * `element_size` - Characteristic element length, if any
fn build_geo(surface: &Path, output_file: &Path, element_size: Option<f64>) -> Result<()> {
    let mut geo_file = std::fs::File::create(output_file)?;
    geo_file.write_all(geo_script(surface, element_size).as_bytes())?;
    Ok(())
}

fn geo_script(surface: &Path, element_size: Option<f64>) -> String {
    let mut script = format!(
        "// Merge surface triangulation\n\
         Geometry.Tolerance = 1e-6;\n\
         Merge \"{}\";\n\
         \n\
         // Close the volume\n\
         Surface Loop(1) = Surface{{:}};\n\
         Volume(1) = {{1}};\n\
         \n\
         // Define Mesh Settings\n\
         Mesh.ElementOrder = 1;\n",
        surface.display().to_string().replace('\\', "/")
    );

    if let Some(size) = element_size {
        script.push_str(&format!(
            "Mesh.CharacteristicLengthMin = {size};\nMesh.CharacteristicLengthMax = {size};\n"
        ));
    }

    script.push_str("Mesh.Optimize = 1;\nMesh.OptimizeNetgen = 1;\n");
    script
}

enum MeshParseState {
    Nodes,
    Elements,
    Limbo,
}

fn parse_numbers<T: std::str::FromStr>(line: &str, what: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|t| {
            t.parse::<T>().map_err(|_| {
                FerrostaticError::Mesher(format!("Unexpected value '{t}' in mesh {what}"))
            })
        })
        .collect()
}

fn next_line<'a>(lines: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<&'a str> {
    lines
        .next()
        .ok_or_else(|| FerrostaticError::Mesher(format!("Mesh file ended inside {what}")))
}

/// Parses the `$Nodes` and `$Elements` sections of a MSH 4.1 ASCII file.
/// Only 4-node tetrahedra are kept; nodes that no tetrahedron uses are dropped.
pub fn parse_msh(contents: &str) -> Result<Mesh> {
    let mut parser_state = MeshParseState::Limbo;
    let mut parsed_section_metadata = false;
    let mut lines = contents.lines();

    let mut node_coords: HashMap<usize, Vertex> = HashMap::new();
    let mut tetrahedra: Vec<[usize; 4]> = Vec::new();

    while let Some(line) = lines.next() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("$End") {
            parser_state = MeshParseState::Limbo;
            continue;
        }

        match parser_state {
            MeshParseState::Limbo => {
                parsed_section_metadata = false;

                if line.starts_with("$MeshFormat") {
                    let format = next_line(&mut lines, "$MeshFormat")?;
                    if !format.trim_start().starts_with('4') {
                        return Err(FerrostaticError::Mesher(format!(
                            "Unsupported mesh format '{}', expected MSH 4",
                            format.trim()
                        )));
                    }
                } else if line.starts_with("$Nodes") {
                    parser_state = MeshParseState::Nodes;
                } else if line.starts_with("$Elements") {
                    parser_state = MeshParseState::Elements;
                }
            }
            MeshParseState::Nodes => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                // entityDim entityTag parametric numNodesInBlock
                let block: Vec<usize> = parse_numbers(line, "node block")?;
                if block.len() < 4 {
                    return Err(FerrostaticError::Mesher(format!(
                        "Malformed node block header '{line}'"
                    )));
                }
                let num_nodes_local = block[3];

                let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
                for _ in 0..num_nodes_local {
                    let tag: Vec<usize> = parse_numbers(next_line(&mut lines, "$Nodes")?, "node tag")?;
                    node_tags.push(tag.first().copied().ok_or_else(|| {
                        FerrostaticError::Mesher("Empty node tag line".to_owned())
                    })?);
                }

                for tag in node_tags {
                    let coords: Vec<f64> =
                        parse_numbers(next_line(&mut lines, "$Nodes")?, "node coordinates")?;
                    if coords.len() < 3 {
                        return Err(FerrostaticError::Mesher(format!(
                            "Node {tag} has {} coordinates",
                            coords.len()
                        )));
                    }
                    node_coords.insert(tag, Vertex::new(coords[0], coords[1], coords[2]));
                }
            }
            MeshParseState::Elements => {
                if !parsed_section_metadata {
                    parsed_section_metadata = true;
                    continue;
                }

                // entityDim entityTag elementType numElementsInBlock
                let block: Vec<usize> = parse_numbers(line, "element block")?;
                if block.len() < 4 {
                    return Err(FerrostaticError::Mesher(format!(
                        "Malformed element block header '{line}'"
                    )));
                }
                let (entity_dim, element_type, num_elements) = (block[0], block[2], block[3]);

                for _ in 0..num_elements {
                    let element_line = next_line(&mut lines, "$Elements")?;
                    if entity_dim != 3 || element_type != 4 {
                        continue;
                    }

                    let metadata: Vec<usize> = parse_numbers(element_line, "element")?;
                    if metadata.len() < 5 {
                        return Err(FerrostaticError::Mesher(format!(
                            "Tetrahedron line '{}' has too few nodes",
                            element_line.trim()
                        )));
                    }
                    tetrahedra.push([metadata[1], metadata[2], metadata[3], metadata[4]]);
                }
            }
        }
    }

    // compact to the nodes used by tetrahedra, in tag order
    let mut used_tags: Vec<usize> = tetrahedra.iter().flatten().copied().collect();
    used_tags.sort_unstable();
    used_tags.dedup();

    let mut index_of_tag: HashMap<usize, usize> = HashMap::with_capacity(used_tags.len());
    let mut vertices: Vec<Vertex> = Vec::with_capacity(used_tags.len());
    for tag in used_tags {
        let vertex = node_coords.get(&tag).ok_or_else(|| {
            FerrostaticError::Mesher(format!("Tetrahedron references missing node {tag}"))
        })?;
        index_of_tag.insert(tag, vertices.len());
        vertices.push(*vertex);
    }

    let elements: Vec<Element> = tetrahedra
        .iter()
        .map(|tet| Element {
            nodes: tet.map(|tag| index_of_tag[&tag]),
        })
        .collect();

    info!(
        "loaded {} vertices and {} tetrahedra",
        vertices.len(),
        elements.len()
    );

    Mesh::new(vertices, elements)
}

/// Static mesh quality summary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub num_elements: usize,
    pub avg_quality: f64,
    pub min_quality: f64,
    pub max_quality: f64,
    pub illegal_elements: usize,
    pub low_quality_elements: usize,
    pub quality_histogram: [usize; HISTOGRAM_BINS],
    pub avg_aspect_ratio: Option<f64>,
    pub max_aspect_ratio: Option<f64>,
}

/// Signed radius ratio 3 r_in / R_circ: 1 for a regular tetrahedron, 0 for a
/// degenerate one, negative when inverted
pub fn element_quality(coords: &[Vertex; 4]) -> f64 {
    let [p0, p1, p2, p3] = coords.map(|v| v.to_vector());
    let (a, b, c) = (p1 - p0, p2 - p0, p3 - p0);
    let six_volume = a.dot(&b.cross(&c));

    if element_geometry(coords).is_none() {
        return 0.0;
    }

    let circum = (b.cross(&c) * a.norm_squared()
        + c.cross(&a) * b.norm_squared()
        + a.cross(&b) * c.norm_squared())
    .norm();
    let circumradius = circum / (2.0 * six_volume.abs());

    let face_area = |u: nalgebra::Vector3<f64>, v: nalgebra::Vector3<f64>, w: nalgebra::Vector3<f64>| {
        0.5 * (v - u).cross(&(w - u)).norm()
    };
    let surface_area =
        face_area(p1, p2, p3) + face_area(p0, p2, p3) + face_area(p0, p1, p3) + face_area(p0, p1, p2);
    let inradius = 0.5 * six_volume.abs() / surface_area;

    (3.0 * inradius / circumradius).copysign(six_volume)
}

/// Longest over shortest edge, infinite for a collapsed edge
pub fn aspect_ratio(coords: &[Vertex; 4]) -> f64 {
    let mut min_edge = f64::MAX;
    let mut max_edge: f64 = 0.0;
    for i in 0..4 {
        for j in (i + 1)..4 {
            let length = coords[i].distance(&coords[j]);
            min_edge = min_edge.min(length);
            max_edge = max_edge.max(length);
        }
    }

    if min_edge <= 1e-12 {
        f64::INFINITY
    } else {
        max_edge / min_edge
    }
}

/// Evaluates quality and aspect ratio of every element
pub fn evaluate_quality(mesh: &Mesh) -> QualityReport {
    let qualities: Vec<f64> = mesh
        .elements()
        .iter()
        .map(|e| element_quality(&mesh.element_vertices(e)))
        .collect();
    let aspects: Vec<f64> = mesh
        .elements()
        .iter()
        .map(|e| aspect_ratio(&mesh.element_vertices(e)))
        .collect();

    let num_elements = qualities.len();
    let mut quality_histogram = [0usize; HISTOGRAM_BINS];
    // rounding can push a perfect element just past 1
    for q in qualities.iter().filter(|q| **q >= 0.0 && q.is_finite()) {
        let bin = ((q.min(1.0) * HISTOGRAM_BINS as f64).floor() as usize).min(HISTOGRAM_BINS - 1);
        quality_histogram[bin] += 1;
    }

    let (avg_quality, min_quality, max_quality) = if num_elements == 0 {
        (0.0, 0.0, 0.0)
    } else {
        (
            qualities.iter().sum::<f64>() / num_elements as f64,
            qualities.iter().copied().fold(f64::INFINITY, f64::min),
            qualities.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        )
    };

    let (avg_aspect_ratio, max_aspect_ratio) = if aspects.is_empty() {
        (None, None)
    } else {
        (
            Some(aspects.iter().sum::<f64>() / aspects.len() as f64),
            Some(aspects.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        )
    };

    QualityReport {
        num_elements,
        avg_quality,
        min_quality,
        max_quality,
        illegal_elements: qualities.iter().filter(|q| **q <= ILLEGAL_QUALITY).count(),
        low_quality_elements: qualities.iter().filter(|q| **q < LOW_QUALITY).count(),
        quality_histogram,
        avg_aspect_ratio,
        max_aspect_ratio,
    }
}

pub fn quality_report_path(output_dir: &Path, base_name: &str) -> PathBuf {
    output_dir.join(format!("{base_name}_mesh_quality.json"))
}

fn write_quality_report(report: &QualityReport, path: &Path) -> Result<()> {
    let contents = serde_json::to_string_pretty(report)
        .map_err(|err| FerrostaticError::Output(format!("cannot serialize quality report: {err}")))?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// A generated mesh and its quality summary
#[derive(Debug, Clone)]
pub struct GeneratedMesh {
    pub mesh: Mesh,
    pub quality: QualityReport,
    /// Where the quality report landed, `None` if writing it failed
    pub quality_file: Option<PathBuf>,
}

/// Validates surface input, drives a meshing port and evaluates the result
pub struct MeshEngineAdapter<'a> {
    port: &'a dyn MeshingPort,
}

impl<'a> MeshEngineAdapter<'a> {
    pub fn new(port: &'a dyn MeshingPort) -> MeshEngineAdapter<'a> {
        MeshEngineAdapter { port }
    }

    /// Meshes `surface` and writes `<base>_mesh_quality.json` into `output_dir`
    pub fn generate(&self, surface: &Path, output_dir: &Path) -> Result<GeneratedMesh> {
        validate_surface_path(surface)?;
        let triangles = read_stl(surface)?.triangles.len();
        debug!("surface has {triangles} triangles");

        let mesh = self
            .port
            .tetrahedralize(surface, output_dir)
            .map_err(|err| FerrostaticError::MeshGenerationFailed(Box::new(err)))?;

        let quality = evaluate_quality(&mesh);
        info!(
            "mesh quality: {} elements, avg {:.3}, min {:.3}, {} illegal, {} low quality",
            quality.num_elements,
            quality.avg_quality,
            quality.min_quality,
            quality.illegal_elements,
            quality.low_quality_elements
        );

        let base_name = surface
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("surface");
        let path = quality_report_path(output_dir, base_name);
        let quality_file = match write_quality_report(&quality, &path) {
            Ok(()) => Some(path),
            Err(err) => {
                warn!("failed to write mesh quality report {}: {err}", path.display());
                None
            }
        };

        Ok(GeneratedMesh {
            mesh,
            quality,
            quality_file,
        })
    }
}
