//! Weak-form assembly for small-strain linear elasticity.
//!
//! a(u, v) = ∫ σ(u) : ε(v) dV is integrated element by element as
//! Σ_q w_q |V| Bᵀ D B, and the traction functional L(v) = ∫ t · v dA over the
//! loaded facets. Dirichlet DOFs are eliminated while scattering: their rows
//! and columns are dropped, a unit diagonal is placed and the right-hand side
//! is zero.

use indicatif::ProgressBar;
use log::{debug, info};
use nalgebra::{DMatrix, SMatrix, Vector3, Vector6};
use nalgebra_sparse::csr::CsrMatrix;

use crate::boundary::BoundaryCondition;
use crate::datatypes::Mesh;
use crate::error::{FerrostaticError, Result};
use crate::function_space::{
    element_geometry, tet_quadrature, tet_shape_gradients, triangle_quadrature,
    triangle_shape_functions, ElementGeometry, FunctionSpace, DOF_PER_NODE,
};
use crate::loads::AreaLoad;
use crate::material::Material;
use crate::sparse::TripletMatrix;

/// Assembled system after boundary elimination. Consumed by one solve.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    pub matrix: CsrMatrix<f64>,
    pub rhs: Vec<f64>,
    pub fixed: Vec<bool>,
}

impl LinearSystem {
    pub fn num_dofs(&self) -> usize {
        self.rhs.len()
    }
}

/// Geometry of element `element_idx`, or an assembly error if it is degenerate
pub fn checked_geometry(mesh: &Mesh, element_idx: usize) -> Result<ElementGeometry> {
    let element = &mesh.elements()[element_idx];
    element_geometry(&mesh.element_vertices(element)).ok_or_else(|| {
        FerrostaticError::Assembly(format!(
            "element {} with vertices {:?} is degenerate",
            element_idx, element.nodes
        ))
    })
}

/// Calculates the strain-displacement matrix from shape function gradients
///
/// # Arguments
/// * `grads` - Cartesian gradient of each local shape function
///
/// # Returns
/// A 6 x 3n matrix mapping nodal displacements to Voigt strains
/// `[xx, yy, zz, xy, yz, xz]` (engineering shear)
pub fn compute_strain_displacement_matrix(grads: &[Vector3<f64>]) -> DMatrix<f64> {
    let mut b = DMatrix::zeros(6, DOF_PER_NODE * grads.len());

    for (a, g) in grads.iter().enumerate() {
        let col = DOF_PER_NODE * a;
        b[(0, col)] = g.x;
        b[(1, col + 1)] = g.y;
        b[(2, col + 2)] = g.z;

        b[(3, col)] = g.y;
        b[(3, col + 1)] = g.x;

        b[(4, col + 1)] = g.z;
        b[(4, col + 2)] = g.y;

        b[(5, col)] = g.z;
        b[(5, col + 2)] = g.x;
    }

    b
}

/// Computes the stiffness matrix of one element
///
/// # Returns
/// A dense 3n x 3n matrix in node-major local DOF order
pub fn compute_element_stiffness_matrix(
    space: &FunctionSpace,
    geometry: &ElementGeometry,
    stress_strain_mat: &SMatrix<f64, 6, 6>,
) -> DMatrix<f64> {
    let d = DMatrix::from_column_slice(6, 6, stress_strain_mat.as_slice());
    let n = DOF_PER_NODE * if space.degree() == 1 { 4 } else { 10 };
    let mut stiffness = DMatrix::zeros(n, n);

    for (l, weight) in tet_quadrature() {
        let grads = tet_shape_gradients(space.degree(), &l, &geometry.grad_bary);
        let b = compute_strain_displacement_matrix(&grads);
        stiffness += (b.transpose() * &d * &b) * (weight * geometry.volume);
    }

    stiffness
}

/// Voigt strain of the displacement field `u` inside an element
pub fn compute_strain(
    space: &FunctionSpace,
    element_idx: usize,
    geometry: &ElementGeometry,
    l: &[f64; 4],
    u: &[f64],
) -> Vector6<f64> {
    let grads = tet_shape_gradients(space.degree(), l, &geometry.grad_bary);
    let mut strain = Vector6::zeros();

    for (g, &node) in grads.iter().zip(space.cell_nodes(element_idx)) {
        let ux = u[space.dof(node, 0)];
        let uy = u[space.dof(node, 1)];
        let uz = u[space.dof(node, 2)];

        strain[0] += g.x * ux;
        strain[1] += g.y * uy;
        strain[2] += g.z * uz;
        strain[3] += g.y * ux + g.x * uy;
        strain[4] += g.z * uy + g.y * uz;
        strain[5] += g.z * ux + g.x * uz;
    }

    strain
}

/// Consistent nodal forces of a uniform traction on one facet
pub fn compute_facet_load_vector(
    mesh: &Mesh,
    space: &FunctionSpace,
    facet_idx: usize,
    traction: &Vector3<f64>,
) -> Vec<f64> {
    let area = mesh.facet_area(&mesh.facets()[facet_idx]);
    let n_nodes = space.facet_nodes(facet_idx).len();
    let mut forces = vec![0.0; DOF_PER_NODE * n_nodes];

    for (l, weight) in triangle_quadrature() {
        let shape = triangle_shape_functions(space.degree(), &l);
        for (a, n) in shape.iter().enumerate() {
            for c in 0..DOF_PER_NODE {
                forces[DOF_PER_NODE * a + c] += weight * area * n * traction[c];
            }
        }
    }

    forces
}

/// Builds the global stiffness matrix and load vector with the Dirichlet
/// DOFs of `condition` eliminated
pub fn assemble_system(
    mesh: &Mesh,
    space: &FunctionSpace,
    material: &Material,
    condition: &BoundaryCondition,
    area_load: Option<&AreaLoad>,
) -> Result<LinearSystem> {
    let n_dofs = space.num_dofs();
    let fixed = &condition.fixed_dofs;
    let stress_strain_mat = material.stress_strain_matrix();

    let local = DOF_PER_NODE * if space.degree() == 1 { 4 } else { 10 };
    let mut triplets =
        TripletMatrix::with_capacity(n_dofs, n_dofs, mesh.elements().len() * local * local);

    info!("assembling {} element stiffness matrices...", mesh.elements().len());
    let bar = ProgressBar::new(mesh.elements().len() as u64);
    for element_idx in 0..mesh.elements().len() {
        bar.inc(1);

        let geometry = checked_geometry(mesh, element_idx)?;
        let mut stiffness = compute_element_stiffness_matrix(space, &geometry, &stress_strain_mat);
        let dofs = space.cell_dofs(element_idx);

        // fixed rows and columns are dropped; zeros are not stored
        for (i, &dof) in dofs.iter().enumerate() {
            if fixed[dof] {
                stiffness.row_mut(i).fill(0.0);
                stiffness.column_mut(i).fill(0.0);
            }
        }
        triplets.add_submatrix(&dofs, &stiffness);
    }
    bar.finish_and_clear();

    for (dof, _) in fixed.iter().enumerate().filter(|(_, f)| **f) {
        triplets.add(dof, dof, 1.0);
    }

    let mut rhs = vec![0.0; n_dofs];
    if let Some(load) = area_load {
        for &facet_idx in &load.facets {
            let forces = compute_facet_load_vector(mesh, space, facet_idx, &load.traction);
            for (a, &node) in space.facet_nodes(facet_idx).iter().enumerate() {
                for c in 0..DOF_PER_NODE {
                    let dof = space.dof(node, c);
                    if !fixed[dof] {
                        rhs[dof] += forces[DOF_PER_NODE * a + c];
                    }
                }
            }
        }
    }

    debug!("{} stiffness triplets before compression", triplets.nnz());
    let matrix = triplets.to_csr()?;

    info!(
        "assembled {} x {} system with {} non-zeros",
        n_dofs,
        n_dofs,
        matrix.nnz()
    );

    Ok(LinearSystem {
        matrix,
        rhs,
        fixed: fixed.clone(),
    })
}
