use thiserror::Error;

use crate::session::Stage;

pub type Result<T> = std::result::Result<T, FerrostaticError>;

#[derive(Debug, Error)]
pub enum FerrostaticError {
    /// Rejected user input (files, selections, loads)
    #[error("Input error: {0}")]
    Input(String),

    #[error("Input error: unsupported material '{0}'")]
    UnknownMaterial(String),

    /// A pipeline step was invoked before its predecessor completed
    #[error("Precondition error: {step} requires stage {required}, but the session is at {current}")]
    Precondition {
        step: &'static str,
        required: Stage,
        current: Stage,
    },

    /// Raised by a meshing port. The adapter wraps these into
    /// `MeshGenerationFailed`.
    #[error("Mesher error: {0}")]
    Mesher(String),

    #[error("Mesh generation failed: {0}")]
    MeshGenerationFailed(#[source] Box<FerrostaticError>),

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Solver error: {0}")]
    Solve(String),

    #[error("Output error: {0}")]
    Output(String),

    #[error("Field file error: {0}")]
    FieldFile(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn mesh_failure_keeps_root_cause() {
        let err = FerrostaticError::MeshGenerationFailed(Box::new(FerrostaticError::Mesher(
            "gmsh exited with status 1".to_owned(),
        )));

        assert!(err.to_string().contains("gmsh exited with status 1"));
        let source = err.source().expect("wrapped cause");
        assert_eq!(source.to_string(), "Mesher error: gmsh exited with status 1");
    }

    #[test]
    fn precondition_names_missing_stage() {
        let err = FerrostaticError::Precondition {
            step: "solve",
            required: Stage::Assembled,
            current: Stage::BoundaryReady,
        };
        let message = err.to_string();
        assert!(message.contains("Assembled"));
        assert!(message.contains("BoundaryReady"));
    }
}
