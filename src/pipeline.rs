use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{error, info, warn};

use crate::config::AnalysisInput;
use crate::datatypes::AnalysisKind;
use crate::error::{FerrostaticError, Result};
use crate::field_file::field_file_path;
use crate::material::Material;
use crate::mesher::{MeshingPort, QualityReport};
use crate::session::AnalysisSession;
use crate::solver::SolveReport;
use crate::surface::{read_stl, validate_surface_path};
use crate::validator::{validation_report_path, write_validation_report, ValidationReport};

/// Everything a finished analysis produced
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub output_dir: PathBuf,
    pub field_file: PathBuf,
    pub quality_file: Option<PathBuf>,
    pub validation_file: Option<PathBuf>,
    pub quality: QualityReport,
    pub validation: ValidationReport,
    pub solve: SolveReport,
    /// Non-fatal problems, such as report files that could not be written
    pub warnings: Vec<String>,
}

/// `<base>_<tag>_<YYYY-MM-DD_HH-MM-SS>`
pub fn output_dir_name(base_name: &str, kind: AnalysisKind, timestamp: &DateTime<Local>) -> String {
    format!(
        "{}_{}_{}",
        base_name,
        kind.tag(),
        timestamp.format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Creates a fresh output directory, suffixing `_<n>` when one with the same
/// timestamp already exists
fn create_output_dir(root: &Path, name: &str) -> Result<PathBuf> {
    let mut dir = root.join(name);
    let mut suffix = 1;
    while dir.exists() {
        dir = root.join(format!("{name}_{suffix}"));
        suffix += 1;
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn surface_base_name(surface: &Path) -> Result<String> {
    surface
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_owned())
        .ok_or_else(|| {
            FerrostaticError::Input(format!("cannot derive a name from {}", surface.display()))
        })
}

/// Runs a full analysis into a new timestamped folder under `output_root`
/// (the surface's own directory when `None`). A failed analysis leaves no
/// folder behind.
pub fn run_analysis(
    input: &AnalysisInput,
    surface: &Path,
    mesher: &dyn MeshingPort,
    output_root: Option<&Path>,
) -> Result<AnalysisOutcome> {
    // reject bad inputs before anything touches the disk
    validate_surface_path(surface)?;
    read_stl(surface)?;
    Material::from_name(&input.material)?;

    let base_name = surface_base_name(surface)?;
    let kind = input.load.kind();
    let root = match output_root {
        Some(root) => root.to_path_buf(),
        None => surface
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let dir = create_output_dir(&root, &output_dir_name(&base_name, kind, &Local::now()))?;
    info!("writing results to {}", dir.display());

    match run_in_dir(input, surface, mesher, &dir, &base_name, kind) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            error!("analysis failed: {err}");
            if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                warn!("failed to remove output folder {}: {cleanup}", dir.display());
            }
            Err(err)
        }
    }
}

fn run_in_dir(
    input: &AnalysisInput,
    surface: &Path,
    mesher: &dyn MeshingPort,
    dir: &Path,
    base_name: &str,
    kind: AnalysisKind,
) -> Result<AnalysisOutcome> {
    let mut warnings = Vec::new();
    let mut session = AnalysisSession::new(mesher, input.solver);

    let generated = session.generate_mesh(surface, dir)?;
    let quality = generated.quality.clone();
    let quality_file = generated.quality_file.clone();
    if quality_file.is_none() {
        warnings.push("mesh quality report could not be written".to_owned());
    }

    session.build_function_space()?;
    session.select_material(&input.material)?;
    session.mark_boundary(kind, &input.boundary)?;
    session.define_problem(&input.load)?;
    session.assemble()?;
    let solve = session.solve()?.report.clone();
    session.postprocess()?;

    let file_name = surface
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(base_name);
    let validation = session.validate(file_name)?.clone();

    let path = validation_report_path(dir, base_name, kind.tag());
    let validation_file = match write_validation_report(&validation, &path) {
        Ok(()) => Some(path),
        Err(err) => {
            warn!("failed to write validation report {}: {err}", path.display());
            warnings.push(format!("validation report could not be written: {err}"));
            None
        }
    };

    let field_file = field_file_path(dir, base_name);
    session.write_fields(&field_file)?;

    Ok(AnalysisOutcome {
        output_dir: dir.to_path_buf(),
        field_file,
        quality_file,
        validation_file,
        quality,
        validation,
        solve,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn output_folder_is_named_by_surface_kind_and_time() {
        let timestamp = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            output_dir_name("bracket", AnalysisKind::AreaLoad, &timestamp),
            "bracket_area_load_2024-03-09_07-05-01"
        );
        assert_eq!(
            output_dir_name("beam", AnalysisKind::PointLoad, &timestamp),
            "beam_point_load_2024-03-09_07-05-01"
        );
    }

    #[test]
    fn existing_folder_gets_a_suffix() {
        let root = std::env::temp_dir().join(format!("ferrostatic_pipeline_{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();

        let first = create_output_dir(&root, "run").unwrap();
        let second = create_output_dir(&root, "run").unwrap();
        assert_eq!(first, root.join("run"));
        assert_eq!(second, root.join("run_1"));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
