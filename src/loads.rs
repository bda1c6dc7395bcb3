//! Load resolution: area tractions on selected facets and point forces on
//! mesh vertices.

use std::collections::HashSet;

use log::{debug, info, warn};
use nalgebra::Vector3;

use crate::boundary::BoundaryCondition;
use crate::datatypes::{AreaLoadSpec, Mesh, PointLoad, Vertex};
use crate::error::{FerrostaticError, Result};
use crate::function_space::{FunctionSpace, DOF_PER_NODE};

/// A point load must land closer than this to a mesh vertex
pub const POINT_MATCH_TOLERANCE: f64 = 1e-6;

const FACET_KEY_SCALE: f64 = 1e6;

type FacetKey = [[i64; 3]; 3];

/// Vertex coordinates rounded to 6 decimals (ties to even), sorted so the
/// key does not depend on vertex order
pub fn facet_key(vertices: &[Vertex; 3]) -> FacetKey {
    let mut key = vertices.map(|v| {
        v.to_array()
            .map(|c| (c * FACET_KEY_SCALE).round_ties_even() as i64)
    });
    key.sort_unstable();
    key
}

/// Unit vector along `direction`, `None` for a zero vector
pub fn unit_direction(direction: [f64; 3]) -> Option<Vector3<f64>> {
    let d = Vector3::from(direction);
    let norm = d.norm();
    if norm > 0.0 && norm.is_finite() {
        Some(d / norm)
    } else {
        None
    }
}

/// Indices of the mesh boundary facets that match one of `targets`
pub fn mark_load_facets(mesh: &Mesh, targets: &[[Vertex; 3]]) -> Vec<usize> {
    let wanted: HashSet<FacetKey> = targets.iter().map(facet_key).collect();

    mesh.facets()
        .iter()
        .enumerate()
        .filter(|(_, facet)| wanted.contains(&facet_key(&mesh.facet_vertices(facet))))
        .map(|(i, _)| i)
        .collect()
}

#[derive(Debug, Clone)]
pub struct AreaLoad {
    pub facets: Vec<usize>,
    pub total_area: f64,
    /// Force per unit area, uniform over the marked facets
    pub traction: Vector3<f64>,
    pub magnitude: f64,
    pub direction: Vector3<f64>,
    pub input_direction: [f64; 3],
}

/// Spreads the total force of `spec` uniformly over the matched facets
pub fn build_area_load(mesh: &Mesh, spec: &AreaLoadSpec) -> Result<AreaLoad> {
    let facets = mark_load_facets(mesh, &spec.facets);

    if facets.len() < spec.facets.len() {
        warn!(
            "{} of {} selected facets did not match the mesh boundary",
            spec.facets.len() - facets.len(),
            spec.facets.len()
        );
    }

    let total_area: f64 = facets
        .iter()
        .map(|&i| mesh.facet_area(&mesh.facets()[i]))
        .sum();
    if total_area <= 0.0 {
        return Err(FerrostaticError::Input(
            "selected facets have zero total area on the mesh".to_owned(),
        ));
    }

    let direction = unit_direction(spec.direction).ok_or_else(|| {
        FerrostaticError::Input("force direction vector has zero length".to_owned())
    })?;

    let traction = direction * (spec.magnitude / total_area);

    info!(
        "area load: {} facets, area {:.6e}, traction ({:.6e}, {:.6e}, {:.6e})",
        facets.len(),
        total_area,
        traction.x,
        traction.y,
        traction.z
    );

    Ok(AreaLoad {
        facets,
        total_area,
        traction,
        magnitude: spec.magnitude,
        direction,
        input_direction: spec.direction,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedPointLoad {
    pub load: PointLoad,
    pub vertex: usize,
    pub node: usize,
    pub force: Vector3<f64>,
}

/// Closest mesh vertex and its distance
pub fn nearest_vertex(mesh: &Mesh, point: &Vertex) -> Option<(usize, f64)> {
    mesh.vertices()
        .iter()
        .enumerate()
        .map(|(i, v)| (i, v.distance(point)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Snaps each point load to a mesh vertex. Loads that miss the mesh or have
/// no direction are skipped with a warning.
pub fn resolve_point_loads(
    mesh: &Mesh,
    space: &FunctionSpace,
    loads: &[PointLoad],
) -> Vec<ResolvedPointLoad> {
    let mut resolved = Vec::with_capacity(loads.len());

    for load in loads {
        let direction = match unit_direction(load.direction) {
            Some(d) => d,
            None => {
                warn!("point load at {:?} has a zero direction, skipping", load.point);
                continue;
            }
        };

        let vertex = match nearest_vertex(mesh, &load.point) {
            Some((vertex, distance)) if distance < POINT_MATCH_TOLERANCE => vertex,
            Some((_, distance)) => {
                warn!(
                    "no mesh vertex within {:e} of point load at {:?} (closest is {:e} away), skipping",
                    POINT_MATCH_TOLERANCE, load.point, distance
                );
                continue;
            }
            None => continue,
        };

        resolved.push(ResolvedPointLoad {
            load: *load,
            vertex,
            node: space.vertex_node(vertex),
            force: direction * load.magnitude,
        });
    }

    info!("point loads: {} of {} resolved", resolved.len(), loads.len());

    resolved
}

/// Adds the nodal forces to the assembled right-hand side. Components on
/// fixed DOFs stay untouched so the boundary values remain exact.
pub fn apply_point_loads(
    rhs: &mut [f64],
    space: &FunctionSpace,
    loads: &[ResolvedPointLoad],
    condition: &BoundaryCondition,
) {
    for load in loads {
        for c in 0..DOF_PER_NODE {
            let dof = space.dof(load.node, c);
            if load.force[c] == 0.0 {
                continue;
            }
            if condition.is_fixed(dof) {
                warn!(
                    "point load component {} at {:?} acts on a fixed DOF, ignoring it",
                    c, load.load.point
                );
                continue;
            }
            rhs[dof] += load.force[c];
            debug!("rhs[{dof}] += {:.6e}", load.force[c]);
        }
    }
}

/// Resolved load of an analysis
#[derive(Debug, Clone)]
pub enum Load {
    Area(AreaLoad),
    Point(Vec<ResolvedPointLoad>),
}
