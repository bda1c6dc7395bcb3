//! Physical sanity checks on a solved analysis.
//!
//! For a converged linear solve the stored strain energy equals half the work
//! done by the external loads. The report records both, their relative
//! mismatch, displacement extrema and the inputs that produced them.

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::assembly::{checked_geometry, compute_strain};
use crate::datatypes::{BoundarySpec, LoadSpec, Mesh, PointLoad};
use crate::error::{FerrostaticError, Result};
use crate::function_space::{
    tet_quadrature, triangle_quadrature, triangle_shape_functions, FunctionSpace, DOF_PER_NODE,
};
use crate::loads::{unit_direction, Load, ResolvedPointLoad};
use crate::material::Material;
use crate::post_processor::PostprocessedFields;
use crate::solver::{Solution, SolverKind};

#[derive(Debug, Clone, Serialize)]
pub struct SolverInfo {
    #[serde(rename = "type")]
    pub kind: SolverKind,
    pub preconditioner: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AreaForceRecord {
    pub facet_vertices: Vec<[[f64; 3]; 3]>,
    pub force_magnitude: f64,
    pub force_direction: [f64; 3],
    pub input_direction: [f64; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct PointForceRecord {
    pub applied_point: [f64; 3],
    pub force_magnitude: f64,
    pub force_direction: [f64; 3],
    pub input_direction: [f64; 3],
    /// False when the load matched no mesh vertex and was left out of the solve
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub file: String,
    pub solver: SolverInfo,
    pub num_dofs: usize,
    pub energy_total_strain: f64,
    pub external_work: f64,
    pub energy_error: f64,
    pub max_displacement: f64,
    pub min_displacement: f64,
    pub max_von_mises: f64,
    pub material: String,
    pub boundary_conditions: BoundarySpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_forces: Option<AreaForceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_forces: Option<Vec<PointForceRecord>>,
    pub solver_log: Vec<String>,
}

/// Inputs echoed into the report
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub file: &'a str,
    pub material: &'a Material,
    pub boundary: &'a BoundarySpec,
    /// Loads as given in the input, before resolution against the mesh
    pub load: &'a LoadSpec,
}

/// U = ½ ∫ σ(u) : ε(u) dV
pub fn strain_energy(
    mesh: &Mesh,
    space: &FunctionSpace,
    material: &Material,
    displacement: &[f64],
) -> Result<f64> {
    let stress_strain_mat = material.stress_strain_matrix();
    let mut energy = 0.0;

    for element_idx in 0..mesh.elements().len() {
        let geometry = checked_geometry(mesh, element_idx)?;
        for (l, weight) in tet_quadrature() {
            let strain = compute_strain(space, element_idx, &geometry, &l, displacement);
            energy += weight * geometry.volume * strain.dot(&(stress_strain_mat * strain));
        }
    }

    Ok(0.5 * energy)
}

/// Work of the applied loads on the displacement field
pub fn external_work(mesh: &Mesh, space: &FunctionSpace, load: &Load, displacement: &[f64]) -> f64 {
    match load {
        Load::Area(area) => {
            let mut work = 0.0;
            for &facet_idx in &area.facets {
                let facet_area = mesh.facet_area(&mesh.facets()[facet_idx]);
                let nodes = space.facet_nodes(facet_idx);

                for (l, weight) in triangle_quadrature() {
                    let shape = triangle_shape_functions(space.degree(), &l);
                    for (n, &node) in shape.iter().zip(nodes) {
                        for c in 0..DOF_PER_NODE {
                            work += weight
                                * facet_area
                                * n
                                * area.traction[c]
                                * displacement[space.dof(node, c)];
                        }
                    }
                }
            }
            work
        }
        Load::Point(points) => points
            .iter()
            .filter_map(|p| match space.evaluate(mesh, displacement, &p.load.point) {
                Some(u) => Some(p.force.dot(&u)),
                None => {
                    warn!(
                        "point load at {:?} lies outside the mesh, excluded from external work",
                        p.load.point
                    );
                    None
                }
            })
            .sum(),
    }
}

/// |U − ½W| / max(1, |U|)
pub fn energy_balance_error(strain_energy: f64, external_work: f64) -> f64 {
    (strain_energy - 0.5 * external_work).abs() / strain_energy.abs().max(1.0)
}

/// Every input point load, marked by whether it reached the mesh
fn point_force_records(inputs: &[PointLoad], resolved: &[ResolvedPointLoad]) -> Vec<PointForceRecord> {
    inputs
        .iter()
        .map(|input| PointForceRecord {
            applied_point: input.point.to_array(),
            force_magnitude: input.magnitude,
            force_direction: unit_direction(input.direction)
                .map(|d| d.into())
                .unwrap_or([0.0; 3]),
            input_direction: input.direction,
            resolved: resolved.iter().any(|p| p.load == *input),
        })
        .collect()
}

fn force_records(
    mesh: &Mesh,
    load: &Load,
    spec: &LoadSpec,
) -> (Option<AreaForceRecord>, Option<Vec<PointForceRecord>>) {
    match load {
        Load::Area(area) => {
            let facet_vertices = area
                .facets
                .iter()
                .map(|&i| {
                    let [a, b, c] = mesh.facet_vertices(&mesh.facets()[i]);
                    [a.to_array(), b.to_array(), c.to_array()]
                })
                .collect();
            let record = AreaForceRecord {
                facet_vertices,
                force_magnitude: area.magnitude,
                force_direction: area.direction.into(),
                input_direction: area.input_direction,
            };
            (Some(record), None)
        }
        Load::Point(points) => {
            let records = match spec {
                LoadSpec::Point(inputs) => point_force_records(inputs, points),
                LoadSpec::Area(_) => {
                    let inputs: Vec<PointLoad> = points.iter().map(|p| p.load).collect();
                    point_force_records(&inputs, points)
                }
            };
            (None, Some(records))
        }
    }
}

/// Computes the energy balance and collects the report
pub fn validate(
    mesh: &Mesh,
    space: &FunctionSpace,
    load: &Load,
    solution: &Solution,
    fields: &PostprocessedFields,
    context: &ReportContext,
) -> Result<ValidationReport> {
    let u = &solution.displacement;

    let energy = strain_energy(mesh, space, context.material, u)?;
    let work = external_work(mesh, space, load, u);
    let energy_error = energy_balance_error(energy, work);

    info!(
        "strain energy {:.6e}, external work {:.6e}, relative energy error {:.3e}",
        energy, work, energy_error
    );

    let max_displacement = u.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min_displacement = u.iter().copied().fold(f64::INFINITY, f64::min);
    let (area_forces, point_forces) = force_records(mesh, load, context.load);

    Ok(ValidationReport {
        file: context.file.to_owned(),
        solver: SolverInfo {
            kind: solution.report.kind,
            preconditioner: solution.report.kind.preconditioner(),
        },
        num_dofs: space.num_dofs(),
        energy_total_strain: energy,
        external_work: work,
        energy_error,
        max_displacement,
        min_displacement,
        max_von_mises: fields.max_von_mises(),
        material: context.material.name.to_owned(),
        boundary_conditions: *context.boundary,
        area_forces,
        point_forces,
        solver_log: solution.report.log.clone(),
    })
}

pub fn validation_report_path(output_dir: &Path, base_name: &str, tag: &str) -> PathBuf {
    output_dir.join(format!("{base_name}_{tag}_validation.json"))
}

/// Writes the report as pretty JSON
pub fn write_validation_report(report: &ValidationReport, path: &Path) -> Result<()> {
    let contents = serde_json::to_string_pretty(report).map_err(|err| {
        FerrostaticError::Output(format!("cannot serialize validation report: {err}"))
    })?;
    std::fs::write(path, contents)?;
    info!("wrote validation report to {}", path.display());
    Ok(())
}
