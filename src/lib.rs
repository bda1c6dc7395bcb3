//! Small-strain linear elasticity on tetrahedral meshes of STL parts.
//!
//! An analysis meshes the surface through a [`mesher::MeshingPort`], solves
//! the displacement field with quadratic Lagrange elements and writes stress,
//! strain and displacement to an XDMF field file next to a validation report.

pub mod amg;
pub mod assembly;
pub mod boundary;
pub mod config;
pub mod datatypes;
pub mod error;
pub mod field_file;
pub mod function_space;
pub mod loads;
pub mod material;
pub mod mesher;
pub mod pipeline;
pub mod post_processor;
pub mod session;
pub mod solver;
pub mod sparse;
pub mod surface;
pub mod validator;
pub mod visualization;
