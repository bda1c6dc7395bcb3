use std::collections::HashMap;
use std::fmt::Display;

use nalgebra::Vector3;
use serde::Serialize;

use crate::error::{FerrostaticError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64, z: f64) -> Vertex {
        Vertex { x, y, z }
    }

    pub fn from_array(coords: [f64; 3]) -> Vertex {
        Vertex {
            x: coords[0],
            y: coords[1],
            z: coords[2],
        }
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn coordinate(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn distance(&self, other: &Vertex) -> f64 {
        (self.to_vector() - other.to_vector()).norm()
    }

    pub fn midpoint(&self, other: &Vertex) -> Vertex {
        Vertex {
            x: 0.5 * (self.x + other.x),
            y: 0.5 * (self.y + other.y),
            z: 0.5 * (self.z + other.z),
        }
    }
}

/// Linear tetrahedron, indices into `Mesh::vertices`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub nodes: [usize; 4],
}

/// Boundary triangle, indices into `Mesh::vertices`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Facet {
    pub nodes: [usize; 3],
    pub element: usize,
}

/// Local vertex triples of the four faces of a tetrahedron
pub const TET_FACES: [[usize; 3]; 4] = [[1, 2, 3], [0, 2, 3], [0, 1, 3], [0, 1, 2]];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn parse(value: &str) -> Option<Axis> {
        match value.trim().to_uppercase().as_str() {
            "X" => Some(Axis::X),
            "Y" => Some(Axis::Y),
            "Z" => Some(Axis::Z),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        write!(f, "{name}")
    }
}

/// Which side of the selected plane is held fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HalfSpaceDirection {
    #[serde(rename = "<")]
    Below,
    #[serde(rename = ">")]
    Above,
}

impl HalfSpaceDirection {
    pub fn parse(value: &str) -> Option<HalfSpaceDirection> {
        match value.trim() {
            "<" => Some(HalfSpaceDirection::Below),
            ">" => Some(HalfSpaceDirection::Above),
            _ => None,
        }
    }
}

impl Display for HalfSpaceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HalfSpaceDirection::Below => write!(f, "<"),
            HalfSpaceDirection::Above => write!(f, ">"),
        }
    }
}

/// Boundary selection as it arrives from the selection layer. Any field may
/// be missing; the analysis decides what that means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BoundarySpec {
    #[serde(rename = "selected_axis")]
    pub axis: Option<Axis>,
    #[serde(rename = "selected_boundary_point")]
    pub value: Option<f64>,
    #[serde(rename = "boundary_direction")]
    pub direction: Option<HalfSpaceDirection>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLoad {
    pub point: Vertex,
    pub magnitude: f64,
    pub direction: [f64; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct AreaLoadSpec {
    /// Selected surface triangles, each given by its three vertex coordinates
    pub facets: Vec<[Vertex; 3]>,
    /// Total force spread over the selected area
    pub magnitude: f64,
    pub direction: [f64; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadSpec {
    Area(AreaLoadSpec),
    Point(Vec<PointLoad>),
}

impl LoadSpec {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            LoadSpec::Area(_) => AnalysisKind::AreaLoad,
            LoadSpec::Point(_) => AnalysisKind::PointLoad,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    PointLoad,
    AreaLoad,
}

impl AnalysisKind {
    /// Tag used in output folder and report names
    pub fn tag(&self) -> &'static str {
        match self {
            AnalysisKind::PointLoad => "point_load",
            AnalysisKind::AreaLoad => "area_load",
        }
    }
}

/// Volumetric tetrahedral mesh. Immutable once built.
#[derive(Debug, Clone)]
pub struct Mesh {
    vertices: Vec<Vertex>,
    elements: Vec<Element>,
    facets: Vec<Facet>,
}

impl Mesh {
    /// Builds a mesh and derives its boundary facets (faces that belong to
    /// exactly one tetrahedron)
    pub fn new(vertices: Vec<Vertex>, elements: Vec<Element>) -> Result<Mesh> {
        if vertices.is_empty() || elements.is_empty() {
            return Err(FerrostaticError::Mesher(format!(
                "mesh has {} vertices and {} elements",
                vertices.len(),
                elements.len()
            )));
        }

        for (i, element) in elements.iter().enumerate() {
            if let Some(bad) = element.nodes.iter().find(|n| **n >= vertices.len()) {
                return Err(FerrostaticError::Mesher(format!(
                    "element {i} references vertex {bad}, but the mesh has {} vertices",
                    vertices.len()
                )));
            }
        }

        let facets = boundary_facets(&elements);

        Ok(Mesh {
            vertices,
            elements,
            facets,
        })
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    pub fn element_vertices(&self, element: &Element) -> [Vertex; 4] {
        element.nodes.map(|i| self.vertices[i])
    }

    pub fn facet_vertices(&self, facet: &Facet) -> [Vertex; 3] {
        facet.nodes.map(|i| self.vertices[i])
    }

    pub fn facet_area(&self, facet: &Facet) -> f64 {
        let [a, b, c] = self.facet_vertices(facet).map(|v| v.to_vector());
        0.5 * (b - a).cross(&(c - a)).norm()
    }
}

fn boundary_facets(elements: &[Element]) -> Vec<Facet> {
    let mut face_count: HashMap<[usize; 3], usize> = HashMap::new();

    for element in elements {
        for face in TET_FACES {
            let mut key = face.map(|i| element.nodes[i]);
            key.sort_unstable();
            *face_count.entry(key).or_insert(0) += 1;
        }
    }

    let mut facets = Vec::new();
    for (element_idx, element) in elements.iter().enumerate() {
        for face in TET_FACES {
            let nodes = face.map(|i| element.nodes[i]);
            let mut key = nodes;
            key.sort_unstable();
            if face_count.get(&key) == Some(&1) {
                facets.push(Facet {
                    nodes,
                    element: element_idx,
                });
            }
        }
    }

    facets
}
