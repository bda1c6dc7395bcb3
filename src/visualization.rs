use std::path::{Path, PathBuf};
use std::process::Command;

use log::{info, warn};

use crate::error::{FerrostaticError, Result};
use crate::field_file::{FieldFile, VON_MISES};

/// Hands a written field file to something that can display it
pub trait VisualizationPort {
    fn show(&self, request: &VisualizationRequest) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationRequest {
    pub field_file: PathBuf,
    /// Array to color the mesh by
    pub color_by: String,
}

impl VisualizationRequest {
    /// Builds a request after checking that `color_by` names an array of the
    /// field file. Defaults to the von Mises stress.
    pub fn new(field_file: &Path, color_by: Option<&str>) -> Result<VisualizationRequest> {
        let file = FieldFile::open(field_file)?;
        let color_by = color_by.unwrap_or(VON_MISES);

        if file.array(color_by).is_none() {
            return Err(FerrostaticError::Input(format!(
                "field file {} has no array '{}', available: {}",
                field_file.display(),
                color_by,
                file.array_names().join(", ")
            )));
        }

        Ok(VisualizationRequest {
            field_file: field_file.to_path_buf(),
            color_by: color_by.to_owned(),
        })
    }
}

/// Runs an external viewer as `<program> <file> <array>`
pub struct ExternalViewer {
    pub program: String,
}

impl ExternalViewer {
    pub fn new(program: &str) -> ExternalViewer {
        ExternalViewer {
            program: program.to_owned(),
        }
    }
}

impl VisualizationPort for ExternalViewer {
    fn show(&self, request: &VisualizationRequest) -> Result<()> {
        info!(
            "opening {} in {} colored by {}",
            request.field_file.display(),
            self.program,
            request.color_by
        );

        let status = Command::new(&self.program)
            .arg(&request.field_file)
            .arg(&request.color_by)
            .status()
            .map_err(|err| {
                FerrostaticError::Output(format!("failed to launch viewer '{}': {err}", self.program))
            })?;

        if !status.success() {
            warn!("viewer '{}' exited with {}", self.program, status);
            return Err(FerrostaticError::Output(format!(
                "viewer '{}' exited with {}",
                self.program, status
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Element, Mesh, Vertex};
    use crate::field_file::{write_field_file, STRESS_TENSOR};
    use crate::post_processor::PostprocessedFields;
    use nalgebra::{Matrix3, Vector3};
    use std::cell::RefCell;

    struct RecordingViewer {
        shown: RefCell<Vec<VisualizationRequest>>,
    }

    impl VisualizationPort for RecordingViewer {
        fn show(&self, request: &VisualizationRequest) -> Result<()> {
            self.shown.borrow_mut().push(request.clone());
            Ok(())
        }
    }

    fn written_field_file(name: &str) -> PathBuf {
        let mesh = Mesh::new(
            vec![
                Vertex::new(0.0, 0.0, 0.0),
                Vertex::new(1.0, 0.0, 0.0),
                Vertex::new(0.0, 1.0, 0.0),
                Vertex::new(0.0, 0.0, 1.0),
            ],
            vec![Element { nodes: [0, 1, 2, 3] }],
        )
        .unwrap();
        let fields = PostprocessedFields {
            displacement: vec![Vector3::zeros(); 4],
            von_mises: vec![1.0; 4],
            stress: vec![Matrix3::identity(); 4],
            strain: vec![Matrix3::zeros(); 4],
            scale_factor: 1.0,
        };

        let dir = std::env::temp_dir().join(format!("ferrostatic_view_{}_{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("part.xdmf");
        write_field_file(&path, &mesh, &fields).unwrap();
        path
    }

    #[test]
    fn request_defaults_to_von_mises() {
        let path = written_field_file("default");
        let request = VisualizationRequest::new(&path, None).unwrap();
        assert_eq!(request.color_by, VON_MISES);

        let viewer = RecordingViewer {
            shown: RefCell::new(Vec::new()),
        };
        viewer.show(&request).unwrap();
        assert_eq!(viewer.shown.borrow().len(), 1);

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn request_accepts_existing_array() {
        let path = written_field_file("tensor");
        let request = VisualizationRequest::new(&path, Some(STRESS_TENSOR)).unwrap();
        assert_eq!(request.color_by, STRESS_TENSOR);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn request_rejects_unknown_array() {
        let path = written_field_file("unknown");
        let err = VisualizationRequest::new(&path, Some("Temperature")).unwrap_err();
        assert!(err.to_string().contains("Temperature"));
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn missing_viewer_program_fails() {
        let viewer = ExternalViewer::new("ferrostatic-no-such-viewer");
        let request = VisualizationRequest {
            field_file: PathBuf::from("part.xdmf"),
            color_by: VON_MISES.to_owned(),
        };
        assert!(matches!(viewer.show(&request), Err(FerrostaticError::Output(_))));
    }
}
