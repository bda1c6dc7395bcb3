use indicatif::ProgressBar;
use log::{debug, info};
use nalgebra::{Matrix3, SMatrix, Vector3, Vector6};
use nalgebra_sparse::csr::CsrMatrix;

use crate::{
    amg::AmgPreconditioner,
    assembly::{checked_geometry, compute_strain},
    config::SolverSettings,
    datatypes::Mesh,
    error::Result,
    function_space::{tet_quadrature, FunctionSpace},
    material::Material,
    solver::run_conjugate_gradient,
    sparse::TripletMatrix,
};

/// Number of projected scalar components: 6 stress, 6 strain, von Mises
const PROJECTED_COMPONENTS: usize = 13;

/// Nodal result fields at the mesh vertices
#[derive(Debug, Clone)]
pub struct PostprocessedFields {
    pub displacement: Vec<Vector3<f64>>,
    /// Von Mises stress, scaled to MPa, never negative
    pub von_mises: Vec<f64>,
    /// Cauchy stress, scaled to MPa
    pub stress: Vec<Matrix3<f64>>,
    pub strain: Vec<Matrix3<f64>>,
    /// Factor applied to stress and von Mises
    pub scale_factor: f64,
}

impl PostprocessedFields {
    pub fn max_von_mises(&self) -> f64 {
        self.von_mises.iter().copied().fold(0.0, f64::max)
    }
}

/// Calculates the von Mises stress sqrt(3/2 s:s) of a Voigt stress
/// `[xx, yy, zz, xy, yz, xz]`
pub fn compute_von_mises(stress: &Vector6<f64>) -> f64 {
    let (sx, sy, sz) = (stress[0], stress[1], stress[2]);
    let shear = stress[3].powi(2) + stress[4].powi(2) + stress[5].powi(2);

    (0.5 * ((sx - sy).powi(2) + (sy - sz).powi(2) + (sz - sx).powi(2)) + 3.0 * shear).sqrt()
}

/// Symmetric tensor from Voigt components. `shear_factor` is 1 for stresses
/// and 0.5 for engineering shear strains.
pub fn voigt_to_tensor(voigt: &Vector6<f64>, shear_factor: f64) -> Matrix3<f64> {
    let xy = shear_factor * voigt[3];
    let yz = shear_factor * voigt[4];
    let xz = shear_factor * voigt[5];

    Matrix3::new(
        voigt[0], xy, xz, //
        xy, voigt[1], yz, //
        xz, yz, voigt[2],
    )
}

/// Consistent P1 mass matrix over the mesh vertices
pub fn assemble_mass_matrix(mesh: &Mesh) -> Result<CsrMatrix<f64>> {
    let n = mesh.vertices().len();
    let mut triplets = TripletMatrix::with_capacity(n, n, 16 * mesh.elements().len());

    for (element_idx, element) in mesh.elements().iter().enumerate() {
        let geometry = checked_geometry(mesh, element_idx)?;
        for (i, &row) in element.nodes.iter().enumerate() {
            for (j, &col) in element.nodes.iter().enumerate() {
                let factor = if i == j { 2.0 } else { 1.0 };
                triplets.add(row, col, factor * geometry.volume / 20.0);
            }
        }
    }

    triplets.to_csr()
}

/// Recovers stress, strain and von Mises fields from a displacement solution.
///
/// Quadrature-point values are L2-projected onto P1 vertex fields, negative
/// projected von Mises values are clamped, and stresses are rescaled by the
/// unit suffix of the material.
pub fn postprocess(
    mesh: &Mesh,
    space: &FunctionSpace,
    material: &Material,
    displacement: &[f64],
    settings: &SolverSettings,
) -> Result<PostprocessedFields> {
    let n_vertices = mesh.vertices().len();
    let stress_strain_mat: SMatrix<f64, 6, 6> = material.stress_strain_matrix();

    info!("projecting stress and strain onto {n_vertices} vertices...");

    // right-hand sides ∫ f L_i dV per component
    let mut rhs = vec![vec![0.0; n_vertices]; PROJECTED_COMPONENTS];
    let bar = ProgressBar::new(mesh.elements().len() as u64);
    for (element_idx, element) in mesh.elements().iter().enumerate() {
        bar.inc(1);
        let geometry = checked_geometry(mesh, element_idx)?;

        for (l, weight) in tet_quadrature() {
            let strain = compute_strain(space, element_idx, &geometry, &l, displacement);
            let stress = stress_strain_mat * strain;
            let von_mises = compute_von_mises(&stress);

            let mut values = [0.0; PROJECTED_COMPONENTS];
            values[..6].copy_from_slice(stress.as_slice());
            values[6..12].copy_from_slice(strain.as_slice());
            values[12] = von_mises;

            for (local, &vertex) in element.nodes.iter().enumerate() {
                let w = weight * geometry.volume * l[local];
                for (component, value) in values.iter().enumerate() {
                    rhs[component][vertex] += w * value;
                }
            }
        }
    }
    bar.finish_and_clear();

    let mass = assemble_mass_matrix(mesh)?;
    let preconditioner = AmgPreconditioner::new(&mass, 1)?;
    let projection_settings = SolverSettings {
        absolute_tolerance: 0.0,
        relative_tolerance: 1e-10,
        monitor_convergence: false,
        ..*settings
    };

    let mut projected: Vec<Vec<f64>> = Vec::with_capacity(PROJECTED_COMPONENTS);
    for (component, b) in rhs.iter().enumerate() {
        let outcome = run_conjugate_gradient(&mass, b, &preconditioner, &projection_settings)?;
        debug!(
            "projected component {} in {} iterations",
            component, outcome.iterations
        );
        projected.push(outcome.x);
    }

    let scale_factor = material.stress_scale();
    let component_at = |range: std::ops::Range<usize>, vertex: usize| {
        Vector6::from_iterator(range.map(|c| projected[c][vertex]))
    };

    let stress: Vec<Matrix3<f64>> = (0..n_vertices)
        .map(|v| voigt_to_tensor(&component_at(0..6, v), 1.0) * scale_factor)
        .collect();
    let strain: Vec<Matrix3<f64>> = (0..n_vertices)
        .map(|v| voigt_to_tensor(&component_at(6..12, v), 0.5))
        .collect();
    let von_mises: Vec<f64> = projected[12]
        .iter()
        .map(|vm| vm.max(0.0) * scale_factor)
        .collect();

    let displacement = (0..n_vertices)
        .map(|v| space.vertex_value(displacement, v))
        .collect();

    let fields = PostprocessedFields {
        displacement,
        von_mises,
        stress,
        strain,
        scale_factor,
    };

    info!(
        "max von Mises stress {:.6e} (scale factor {})",
        fields.max_von_mises(),
        scale_factor
    );

    Ok(fields)
}
