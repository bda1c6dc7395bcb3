//! Dirichlet boundary marking.
//!
//! A boundary facet is fixed when all three of its vertices satisfy the
//! predicate. Every DOF node of a fixed facet (edge midpoints included for
//! quadratic spaces) is clamped to zero displacement in all components.

use log::{info, warn};

use crate::datatypes::{AnalysisKind, Axis, BoundarySpec, HalfSpaceDirection, Mesh, Vertex};
use crate::error::{FerrostaticError, Result};
use crate::function_space::{FunctionSpace, DOF_PER_NODE};

/// Distance from the plane within which a vertex counts as lying on it
pub const PLANE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryPredicate {
    /// |coord[axis] − value| ≤ tolerance
    ExactPlane {
        axis: Axis,
        value: f64,
        tolerance: f64,
    },
    /// coord[axis] ≤ value for `Below`, coord[axis] ≥ value for `Above`
    HalfSpace {
        axis: Axis,
        value: f64,
        direction: HalfSpaceDirection,
    },
}

impl BoundaryPredicate {
    pub fn contains(&self, vertex: &Vertex) -> bool {
        match *self {
            BoundaryPredicate::ExactPlane {
                axis,
                value,
                tolerance,
            } => (vertex.coordinate(axis) - value).abs() <= tolerance,
            BoundaryPredicate::HalfSpace {
                axis,
                value,
                direction,
            } => match direction {
                HalfSpaceDirection::Below => vertex.coordinate(axis) <= value,
                HalfSpaceDirection::Above => vertex.coordinate(axis) >= value,
            },
        }
    }
}

/// Chooses the predicate for an analysis.
///
/// Area analyses clamp the exact plane `coord[axis] = value` and ignore the
/// direction flag. Point analyses clamp a half-space and run unconstrained
/// when any of the three fields is missing.
pub fn predicate_for(kind: AnalysisKind, spec: &BoundarySpec) -> Result<Option<BoundaryPredicate>> {
    match kind {
        AnalysisKind::AreaLoad => {
            let (axis, value) = match (spec.axis, spec.value) {
                (Some(axis), Some(value)) => (axis, value),
                _ => {
                    return Err(FerrostaticError::Input(
                        "area load analysis needs a boundary axis and value".to_owned(),
                    ))
                }
            };
            Ok(Some(BoundaryPredicate::ExactPlane {
                axis,
                value,
                tolerance: PLANE_TOLERANCE,
            }))
        }
        AnalysisKind::PointLoad => match (spec.axis, spec.value, spec.direction) {
            (Some(axis), Some(value), Some(direction)) => Ok(Some(BoundaryPredicate::HalfSpace {
                axis,
                value,
                direction,
            })),
            _ => {
                warn!("boundary selection is incomplete, no boundary condition will be applied");
                Ok(None)
            }
        },
    }
}

#[derive(Debug, Clone)]
pub struct BoundaryCondition {
    pub predicate: Option<BoundaryPredicate>,
    pub fixed_facets: usize,
    /// One flag per global DOF
    pub fixed_dofs: Vec<bool>,
}

impl BoundaryCondition {
    pub fn is_fixed(&self, dof: usize) -> bool {
        self.fixed_dofs[dof]
    }

    pub fn num_fixed_dofs(&self) -> usize {
        self.fixed_dofs.iter().filter(|f| **f).count()
    }
}

/// Marks the fixed DOFs of every boundary facet accepted by `predicate`
pub fn mark_dirichlet(
    mesh: &Mesh,
    space: &FunctionSpace,
    predicate: Option<BoundaryPredicate>,
) -> BoundaryCondition {
    let mut fixed_dofs = vec![false; space.num_dofs()];
    let mut fixed_facets = 0;

    if let Some(predicate) = predicate {
        for (facet_idx, facet) in mesh.facets().iter().enumerate() {
            let on_boundary = mesh
                .facet_vertices(facet)
                .iter()
                .all(|v| predicate.contains(v));
            if !on_boundary {
                continue;
            }

            fixed_facets += 1;
            for &node in space.facet_nodes(facet_idx) {
                for c in 0..DOF_PER_NODE {
                    fixed_dofs[space.dof(node, c)] = true;
                }
            }
        }

        if fixed_facets == 0 {
            warn!("boundary predicate {predicate:?} matched no facets, the body is unconstrained");
        }
    }

    let condition = BoundaryCondition {
        predicate,
        fixed_facets,
        fixed_dofs,
    };

    info!(
        "boundary: {} facets fixed, {} DOFs constrained",
        condition.fixed_facets,
        condition.num_fixed_dofs()
    );

    condition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::Element;

    fn unit_tet_mesh() -> Mesh {
        Mesh::new(
            vec![
                Vertex::new(0.0, 0.0, 0.0),
                Vertex::new(1.0, 0.0, 0.0),
                Vertex::new(0.0, 1.0, 0.0),
                Vertex::new(0.0, 0.0, 1.0),
            ],
            vec![Element {
                nodes: [0, 1, 2, 3],
            }],
        )
        .unwrap()
    }

    #[test]
    fn exact_plane_tolerance() {
        let predicate = BoundaryPredicate::ExactPlane {
            axis: Axis::Z,
            value: 0.0,
            tolerance: PLANE_TOLERANCE,
        };
        assert!(predicate.contains(&Vertex::new(3.0, 4.0, 5e-7)));
        assert!(!predicate.contains(&Vertex::new(3.0, 4.0, 2e-6)));
    }

    #[test]
    fn half_space_sides() {
        let below = BoundaryPredicate::HalfSpace {
            axis: Axis::X,
            value: 0.5,
            direction: HalfSpaceDirection::Below,
        };
        let above = BoundaryPredicate::HalfSpace {
            axis: Axis::X,
            value: 0.5,
            direction: HalfSpaceDirection::Above,
        };
        let on_plane = Vertex::new(0.5, 0.0, 0.0);
        assert!(below.contains(&on_plane) && above.contains(&on_plane));
        assert!(below.contains(&Vertex::new(-1.0, 0.0, 0.0)));
        assert!(!above.contains(&Vertex::new(-1.0, 0.0, 0.0)));
    }

    #[test]
    fn fixes_all_nodes_of_matching_facets() {
        let mesh = unit_tet_mesh();
        let space = FunctionSpace::build(&mesh, 2).unwrap();

        let predicate = BoundaryPredicate::ExactPlane {
            axis: Axis::Z,
            value: 0.0,
            tolerance: PLANE_TOLERANCE,
        };
        let condition = mark_dirichlet(&mesh, &space, Some(predicate));

        // z = 0 face: 3 vertices + 3 edge midpoints
        assert_eq!(condition.fixed_facets, 1);
        assert_eq!(condition.num_fixed_dofs(), 18);
        let apex = space.vertex_node(3);
        assert!(!condition.is_fixed(space.dof(apex, 0)));
    }

    #[test]
    fn area_analysis_requires_axis_and_value() {
        let incomplete = BoundarySpec {
            axis: Some(Axis::X),
            value: None,
            direction: None,
        };
        assert!(predicate_for(AnalysisKind::AreaLoad, &incomplete).is_err());
        assert_eq!(predicate_for(AnalysisKind::PointLoad, &incomplete).unwrap(), None);

        let complete = BoundarySpec {
            axis: Some(Axis::X),
            value: Some(0.0),
            direction: Some(HalfSpaceDirection::Below),
        };
        assert!(matches!(
            predicate_for(AnalysisKind::AreaLoad, &complete).unwrap(),
            Some(BoundaryPredicate::ExactPlane { .. })
        ));
        assert!(matches!(
            predicate_for(AnalysisKind::PointLoad, &complete).unwrap(),
            Some(BoundaryPredicate::HalfSpace { .. })
        ));
    }

    #[test]
    fn no_predicate_leaves_body_free() {
        let mesh = unit_tet_mesh();
        let space = FunctionSpace::build(&mesh, 1).unwrap();
        let condition = mark_dirichlet(&mesh, &space, None);
        assert_eq!(condition.num_fixed_dofs(), 0);
    }
}
