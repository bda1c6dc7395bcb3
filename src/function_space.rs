//! Vector Lagrange function space over a tetrahedral mesh.
//!
//! Degree 1 places displacement nodes on the mesh vertices. Degree 2 adds one
//! node per edge midpoint (10-node tetrahedra, 6-node facets). Each node
//! carries three displacement DOFs, numbered `3 * node + component`.
//!
//! Nodes are renumbered with reverse Cuthill–McKee so the stiffness matrix
//! stays banded for the direct factorization.
//!
//! Local node order for quadratic cells:
//!   vertices 0..3, then edges 0-1, 1-2, 2-0, 0-3, 1-3, 2-3
//! and for quadratic facets:
//!   vertices 0..2, then edges 0-1, 1-2, 2-0

use std::collections::{HashMap, VecDeque};

use log::info;
use nalgebra::{Matrix3, Vector3};

use crate::datatypes::{Mesh, Vertex};
use crate::error::{FerrostaticError, Result};

pub const DOF_PER_NODE: usize = 3;

pub const TET_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]];
pub const TRIANGLE_EDGES: [[usize; 2]; 3] = [[0, 1], [1, 2], [2, 0]];

/// 4-point tetrahedral rule, exact for quadratic integrands. Weights sum to
/// one and are multiplied by the element volume.
pub fn tet_quadrature() -> [([f64; 4], f64); 4] {
    let a = 0.585_410_196_624_968_5;
    let b = 0.138_196_601_125_010_5;
    [
        ([a, b, b, b], 0.25),
        ([b, a, b, b], 0.25),
        ([b, b, a, b], 0.25),
        ([b, b, b, a], 0.25),
    ]
}

/// 3-point triangle rule, exact for quadratic integrands. Weights sum to one
/// and are multiplied by the facet area.
pub fn triangle_quadrature() -> [([f64; 3], f64); 3] {
    let a = 2.0 / 3.0;
    let b = 1.0 / 6.0;
    [
        ([a, b, b], 1.0 / 3.0),
        ([b, a, b], 1.0 / 3.0),
        ([b, b, a], 1.0 / 3.0),
    ]
}

/// Volume and barycentric coordinate gradients of a straight tetrahedron
#[derive(Debug, Clone, Copy)]
pub struct ElementGeometry {
    pub volume: f64,
    pub grad_bary: [Vector3<f64>; 4],
}

fn jacobian(coords: &[Vertex; 4]) -> Matrix3<f64> {
    let v0 = coords[0].to_vector();
    Matrix3::from_columns(&[
        coords[1].to_vector() - v0,
        coords[2].to_vector() - v0,
        coords[3].to_vector() - v0,
    ])
}

/// Computes the element volume and `∇L_i`. Returns `None` for degenerate
/// elements.
pub fn element_geometry(coords: &[Vertex; 4]) -> Option<ElementGeometry> {
    let j = jacobian(coords);
    let det = j.determinant();

    let scale = coords
        .iter()
        .map(|v| v.distance(&coords[0]))
        .fold(0.0, f64::max);
    if det.abs() <= 1e-14 * scale.powi(3) {
        return None;
    }

    // rows of J^-1 are the gradients of L1, L2, L3
    let j_inv = j.try_inverse()?;
    let g1: Vector3<f64> = j_inv.row(0).transpose();
    let g2: Vector3<f64> = j_inv.row(1).transpose();
    let g3: Vector3<f64> = j_inv.row(2).transpose();
    let g0 = -(g1 + g2 + g3);

    Some(ElementGeometry {
        volume: det.abs() / 6.0,
        grad_bary: [g0, g1, g2, g3],
    })
}

/// Barycentric coordinates of `point` in the tetrahedron
pub fn barycentric_coordinates(coords: &[Vertex; 4], point: &Vertex) -> Option<[f64; 4]> {
    let j_inv = jacobian(coords).try_inverse()?;
    let local = j_inv * (point.to_vector() - coords[0].to_vector());
    Some([1.0 - local.sum(), local[0], local[1], local[2]])
}

/// Tetrahedral shape functions at barycentric coordinates `l`
pub fn tet_shape_functions(degree: usize, l: &[f64; 4]) -> Vec<f64> {
    if degree == 1 {
        return l.to_vec();
    }

    let mut values: Vec<f64> = l.iter().map(|li| li * (2.0 * li - 1.0)).collect();
    for [i, j] in TET_EDGES {
        values.push(4.0 * l[i] * l[j]);
    }
    values
}

/// Cartesian gradients of the tetrahedral shape functions
pub fn tet_shape_gradients(
    degree: usize,
    l: &[f64; 4],
    grad_bary: &[Vector3<f64>; 4],
) -> Vec<Vector3<f64>> {
    if degree == 1 {
        return grad_bary.to_vec();
    }

    let mut grads: Vec<Vector3<f64>> = (0..4)
        .map(|i| grad_bary[i] * (4.0 * l[i] - 1.0))
        .collect();
    for [i, j] in TET_EDGES {
        grads.push((grad_bary[i] * l[j] + grad_bary[j] * l[i]) * 4.0);
    }
    grads
}

/// Triangle shape functions at barycentric coordinates `l`
pub fn triangle_shape_functions(degree: usize, l: &[f64; 3]) -> Vec<f64> {
    if degree == 1 {
        return l.to_vec();
    }

    let mut values: Vec<f64> = l.iter().map(|li| li * (2.0 * li - 1.0)).collect();
    for [i, j] in TRIANGLE_EDGES {
        values.push(4.0 * l[i] * l[j]);
    }
    values
}

#[derive(Debug, Clone)]
pub struct FunctionSpace {
    degree: usize,
    nodes: Vec<Vertex>,
    cell_nodes: Vec<Vec<usize>>,
    facet_nodes: Vec<Vec<usize>>,
    vertex_nodes: Vec<usize>,
}

impl FunctionSpace {
    /// Lays out the displacement DOFs of a degree 1 or 2 vector field
    pub fn build(mesh: &Mesh, degree: usize) -> Result<FunctionSpace> {
        if degree != 1 && degree != 2 {
            return Err(FerrostaticError::Input(format!(
                "Lagrange degree must be 1 or 2, got {degree}"
            )));
        }

        let vertices = mesh.vertices();
        let mut nodes: Vec<Vertex> = vertices.to_vec();
        let mut edge_nodes: HashMap<[usize; 2], usize> = HashMap::new();

        let mut edge_node = |a: usize, b: usize, nodes: &mut Vec<Vertex>| -> usize {
            let key = if a < b { [a, b] } else { [b, a] };
            *edge_nodes.entry(key).or_insert_with(|| {
                nodes.push(vertices[a].midpoint(&vertices[b]));
                nodes.len() - 1
            })
        };

        let mut cell_nodes: Vec<Vec<usize>> = Vec::with_capacity(mesh.elements().len());
        for element in mesh.elements() {
            let mut cell = element.nodes.to_vec();
            if degree == 2 {
                for [i, j] in TET_EDGES {
                    cell.push(edge_node(element.nodes[i], element.nodes[j], &mut nodes));
                }
            }
            cell_nodes.push(cell);
        }

        let mut facet_nodes: Vec<Vec<usize>> = Vec::with_capacity(mesh.facets().len());
        for facet in mesh.facets() {
            let mut nodes_on_facet = facet.nodes.to_vec();
            if degree == 2 {
                for [i, j] in TRIANGLE_EDGES {
                    nodes_on_facet.push(edge_node(facet.nodes[i], facet.nodes[j], &mut nodes));
                }
            }
            facet_nodes.push(nodes_on_facet);
        }

        let new_index = reverse_cuthill_mckee(nodes.len(), &cell_nodes);

        let mut renumbered = nodes.clone();
        for (old, node) in nodes.iter().enumerate() {
            renumbered[new_index[old]] = *node;
        }
        for cell in cell_nodes.iter_mut().chain(facet_nodes.iter_mut()) {
            for node in cell.iter_mut() {
                *node = new_index[*node];
            }
        }
        let vertex_nodes = (0..vertices.len()).map(|v| new_index[v]).collect();

        let space = FunctionSpace {
            degree,
            nodes: renumbered,
            cell_nodes,
            facet_nodes,
            vertex_nodes,
        };

        info!(
            "function space: P{} vector Lagrange, {} nodes, {} DOFs",
            degree,
            space.num_nodes(),
            space.num_dofs()
        );

        Ok(space)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_dofs(&self) -> usize {
        DOF_PER_NODE * self.nodes.len()
    }

    pub fn dof(&self, node: usize, component: usize) -> usize {
        DOF_PER_NODE * node + component
    }

    pub fn node(&self, node: usize) -> &Vertex {
        &self.nodes[node]
    }

    pub fn cell_nodes(&self, element: usize) -> &[usize] {
        &self.cell_nodes[element]
    }

    pub fn facet_nodes(&self, facet: usize) -> &[usize] {
        &self.facet_nodes[facet]
    }

    /// DOF node that sits on mesh vertex `vertex`
    pub fn vertex_node(&self, vertex: usize) -> usize {
        self.vertex_nodes[vertex]
    }

    /// Global DOFs of a cell, ordered node-major
    pub fn cell_dofs(&self, element: usize) -> Vec<usize> {
        self.cell_nodes[element]
            .iter()
            .flat_map(|&n| (0..DOF_PER_NODE).map(move |c| DOF_PER_NODE * n + c))
            .collect()
    }

    /// Nodal displacement at mesh vertex `vertex`
    pub fn vertex_value(&self, values: &[f64], vertex: usize) -> Vector3<f64> {
        let node = self.vertex_nodes[vertex];
        Vector3::new(
            values[self.dof(node, 0)],
            values[self.dof(node, 1)],
            values[self.dof(node, 2)],
        )
    }

    /// Interpolates a vector field at an arbitrary point. Returns `None` when
    /// the point lies outside every element.
    pub fn evaluate(&self, mesh: &Mesh, values: &[f64], point: &Vertex) -> Option<Vector3<f64>> {
        for (element_idx, element) in mesh.elements().iter().enumerate() {
            let coords = mesh.element_vertices(element);
            let l = match barycentric_coordinates(&coords, point) {
                Some(l) => l,
                None => continue,
            };
            if l.iter().any(|li| *li < -1e-9) {
                continue;
            }

            let shape = tet_shape_functions(self.degree, &l);
            let mut value = Vector3::zeros();
            for (local, &node) in self.cell_nodes[element_idx].iter().enumerate() {
                for c in 0..DOF_PER_NODE {
                    value[c] += shape[local] * values[self.dof(node, c)];
                }
            }
            return Some(value);
        }

        None
    }
}

/// Returns the new index of every node
fn reverse_cuthill_mckee(num_nodes: usize, cells: &[Vec<usize>]) -> Vec<usize> {
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); num_nodes];
    for cell in cells {
        for &a in cell {
            for &b in cell {
                if a != b {
                    adjacency[a].push(b);
                }
            }
        }
    }
    for neighbors in adjacency.iter_mut() {
        neighbors.sort_unstable();
        neighbors.dedup();
    }

    let mut by_degree: Vec<usize> = (0..num_nodes).collect();
    by_degree.sort_by_key(|&n| adjacency[n].len());

    let mut visited = vec![false; num_nodes];
    let mut order: Vec<usize> = Vec::with_capacity(num_nodes);

    for &start in &by_degree {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            order.push(node);

            let mut next: Vec<usize> = adjacency[node]
                .iter()
                .copied()
                .filter(|&m| !visited[m])
                .collect();
            next.sort_by_key(|&m| adjacency[m].len());
            for m in next {
                visited[m] = true;
                queue.push_back(m);
            }
        }
    }

    order.reverse();

    let mut new_index = vec![0; num_nodes];
    for (new, &old) in order.iter().enumerate() {
        new_index[old] = new;
    }
    new_index
}
