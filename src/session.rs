//! Stage-ordered analysis session.
//!
//! A session owns every intermediate product of one analysis and only lets
//! each step run once its predecessor finished. The numerical work lives in
//! the stage functions of the other modules; the session sequences them.

use std::fmt::Display;
use std::path::Path;

use log::{info, warn};

use crate::assembly::{assemble_system, LinearSystem};
use crate::boundary::{mark_dirichlet, predicate_for, BoundaryCondition};
use crate::config::SolverSettings;
use crate::datatypes::{AnalysisKind, BoundarySpec, LoadSpec, Mesh};
use crate::error::{FerrostaticError, Result};
use crate::field_file::write_field_file;
use crate::function_space::FunctionSpace;
use crate::loads::{apply_point_loads, build_area_load, resolve_point_loads, Load};
use crate::material::Material;
use crate::mesher::{GeneratedMesh, MeshEngineAdapter, MeshingPort};
use crate::post_processor::{postprocess, PostprocessedFields};
use crate::solver::{solve_system, Solution};
use crate::validator::{validate, ReportContext, ValidationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Uninitialized,
    MeshReady,
    SpaceReady,
    MaterialReady,
    BoundaryReady,
    ProblemDefined,
    Assembled,
    Solved,
    Postprocessed,
    Written,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

fn precondition(step: &'static str, required: Stage, current: Stage) -> FerrostaticError {
    FerrostaticError::Precondition {
        step,
        required,
        current,
    }
}

pub struct AnalysisSession<'a> {
    mesher: &'a dyn MeshingPort,
    settings: SolverSettings,
    stage: Stage,
    generated: Option<GeneratedMesh>,
    space: Option<FunctionSpace>,
    material: Option<Material>,
    kind: Option<AnalysisKind>,
    boundary_spec: Option<BoundarySpec>,
    boundary: Option<BoundaryCondition>,
    load_spec: Option<LoadSpec>,
    load: Option<Load>,
    system: Option<LinearSystem>,
    solution: Option<Solution>,
    fields: Option<PostprocessedFields>,
    report: Option<ValidationReport>,
}

impl<'a> AnalysisSession<'a> {
    pub fn new(mesher: &'a dyn MeshingPort, settings: SolverSettings) -> AnalysisSession<'a> {
        AnalysisSession {
            mesher,
            settings,
            stage: Stage::Uninitialized,
            generated: None,
            space: None,
            material: None,
            kind: None,
            boundary_spec: None,
            boundary: None,
            load_spec: None,
            load: None,
            system: None,
            solution: None,
            fields: None,
            report: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn require(&self, step: &'static str, required: Stage) -> Result<()> {
        if self.stage != required {
            return Err(precondition(step, required, self.stage));
        }
        Ok(())
    }

    fn advance(&mut self, stage: Stage) {
        info!("session stage {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    pub fn generated_mesh(&self) -> Option<&GeneratedMesh> {
        self.generated.as_ref()
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        self.generated.as_ref().map(|g| &g.mesh)
    }

    pub fn function_space(&self) -> Option<&FunctionSpace> {
        self.space.as_ref()
    }

    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    pub fn boundary_condition(&self) -> Option<&BoundaryCondition> {
        self.boundary.as_ref()
    }

    pub fn load(&self) -> Option<&Load> {
        self.load.as_ref()
    }

    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    pub fn fields(&self) -> Option<&PostprocessedFields> {
        self.fields.as_ref()
    }

    pub fn validation_report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }

    /// Meshes the surface through the meshing port
    pub fn generate_mesh(&mut self, surface: &Path, output_dir: &Path) -> Result<&GeneratedMesh> {
        self.require("generate_mesh", Stage::Uninitialized)?;

        let generated = MeshEngineAdapter::new(self.mesher).generate(surface, output_dir)?;
        self.advance(Stage::MeshReady);
        Ok(&*self.generated.insert(generated))
    }

    pub fn build_function_space(&mut self) -> Result<&FunctionSpace> {
        self.require("build_function_space", Stage::MeshReady)?;
        let stage = self.stage;
        let mesh = self
            .mesh()
            .ok_or_else(|| precondition("build_function_space", Stage::MeshReady, stage))?;

        let space = FunctionSpace::build(mesh, self.settings.degree)?;
        info!(
            "P{} function space with {} nodes, {} DOFs",
            space.degree(),
            space.num_nodes(),
            space.num_dofs()
        );
        self.advance(Stage::SpaceReady);
        Ok(&*self.space.insert(space))
    }

    pub fn select_material(&mut self, name: &str) -> Result<&Material> {
        self.require("select_material", Stage::SpaceReady)?;

        let material = Material::from_name(name)?;
        info!(
            "material {}: E = {:e}, nu = {}, mu = {:e}, lambda = {:e}",
            material.name,
            material.youngs_modulus,
            material.poisson_ratio,
            material.mu(),
            material.lambda()
        );
        self.advance(Stage::MaterialReady);
        Ok(&*self.material.insert(material))
    }

    /// Fixes the boundary with the strategy of the analysis kind
    pub fn mark_boundary(
        &mut self,
        kind: AnalysisKind,
        spec: &BoundarySpec,
    ) -> Result<&BoundaryCondition> {
        self.require("mark_boundary", Stage::MaterialReady)?;
        let stage = self.stage;
        let mesh = self
            .mesh()
            .ok_or_else(|| precondition("mark_boundary", Stage::MeshReady, stage))?;
        let space = self
            .space
            .as_ref()
            .ok_or_else(|| precondition("mark_boundary", Stage::SpaceReady, stage))?;

        let predicate = predicate_for(kind, spec)?;
        let condition = mark_dirichlet(mesh, space, predicate);
        if condition.fixed_facets == 0 {
            warn!("no boundary facets are fixed, the problem is unconstrained");
        }

        self.kind = Some(kind);
        self.boundary_spec = Some(*spec);
        self.advance(Stage::BoundaryReady);
        Ok(&*self.boundary.insert(condition))
    }

    /// Resolves the loads against the mesh
    pub fn define_problem(&mut self, load: &LoadSpec) -> Result<&Load> {
        self.require("define_problem", Stage::BoundaryReady)?;
        if self.kind != Some(load.kind()) {
            return Err(FerrostaticError::Input(format!(
                "boundary was marked for {:?} but the load is {:?}",
                self.kind,
                load.kind()
            )));
        }

        let stage = self.stage;
        let mesh = self
            .mesh()
            .ok_or_else(|| precondition("define_problem", Stage::MeshReady, stage))?;
        let space = self
            .space
            .as_ref()
            .ok_or_else(|| precondition("define_problem", Stage::SpaceReady, stage))?;

        let resolved = match load {
            LoadSpec::Area(spec) => Load::Area(build_area_load(mesh, spec)?),
            LoadSpec::Point(points) => {
                let resolved = resolve_point_loads(mesh, space, points);
                if resolved.is_empty() {
                    warn!("no point load matched a mesh vertex, the load vector is zero");
                }
                Load::Point(resolved)
            }
        };

        self.load_spec = Some(load.clone());
        self.advance(Stage::ProblemDefined);
        Ok(&*self.load.insert(resolved))
    }

    pub fn assemble(&mut self) -> Result<&LinearSystem> {
        self.require("assemble", Stage::ProblemDefined)?;
        let stage = self.stage;
        let missing = || precondition("assemble", Stage::ProblemDefined, stage);

        let mesh = self.mesh().ok_or_else(missing)?;
        let space = self.space.as_ref().ok_or_else(missing)?;
        let material = self.material.as_ref().ok_or_else(missing)?;
        let condition = self.boundary.as_ref().ok_or_else(missing)?;
        let load = self.load.as_ref().ok_or_else(missing)?;

        let system = match load {
            Load::Area(area) => assemble_system(mesh, space, material, condition, Some(area))?,
            Load::Point(points) => {
                let mut system = assemble_system(mesh, space, material, condition, None)?;
                apply_point_loads(&mut system.rhs, space, points, condition);
                system
            }
        };

        self.advance(Stage::Assembled);
        Ok(&*self.system.insert(system))
    }

    /// Solves the assembled system. The system is consumed.
    pub fn solve(&mut self) -> Result<&Solution> {
        self.require("solve", Stage::Assembled)?;
        let system = self
            .system
            .take()
            .ok_or_else(|| precondition("solve", Stage::Assembled, self.stage))?;

        let solution = solve_system(system, &self.settings)?;
        self.advance(Stage::Solved);
        Ok(&*self.solution.insert(solution))
    }

    pub fn postprocess(&mut self) -> Result<&PostprocessedFields> {
        self.require("postprocess", Stage::Solved)?;
        let stage = self.stage;
        let missing = || precondition("postprocess", Stage::Solved, stage);

        let mesh = self.mesh().ok_or_else(missing)?;
        let space = self.space.as_ref().ok_or_else(missing)?;
        let material = self.material.as_ref().ok_or_else(missing)?;
        let solution = self.solution.as_ref().ok_or_else(missing)?;

        let fields = postprocess(mesh, space, material, &solution.displacement, &self.settings)?;
        self.advance(Stage::Postprocessed);
        Ok(&*self.fields.insert(fields))
    }

    /// Builds the validation report. Does not advance the stage.
    pub fn validate(&mut self, file: &str) -> Result<&ValidationReport> {
        self.require("validate", Stage::Postprocessed)?;
        let stage = self.stage;
        let missing = || precondition("validate", Stage::Postprocessed, stage);

        let mesh = self.mesh().ok_or_else(missing)?;
        let space = self.space.as_ref().ok_or_else(missing)?;
        let material = self.material.as_ref().ok_or_else(missing)?;
        let boundary = self.boundary_spec.as_ref().ok_or_else(missing)?;
        let load_spec = self.load_spec.as_ref().ok_or_else(missing)?;
        let load = self.load.as_ref().ok_or_else(missing)?;
        let solution = self.solution.as_ref().ok_or_else(missing)?;
        let fields = self.fields.as_ref().ok_or_else(missing)?;

        let context = ReportContext {
            file,
            material,
            boundary,
            load: load_spec,
        };
        let report = validate(mesh, space, load, solution, fields, &context)?;
        Ok(&*self.report.insert(report))
    }

    /// Writes the field file
    pub fn write_fields(&mut self, path: &Path) -> Result<()> {
        self.require("write_fields", Stage::Postprocessed)?;
        let stage = self.stage;
        let missing = || precondition("write_fields", Stage::Postprocessed, stage);

        let mesh = self.mesh().ok_or_else(missing)?;
        let fields = self.fields.as_ref().ok_or_else(missing)?;

        write_field_file(path, mesh, fields)?;
        self.advance(Stage::Written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct UnusedPort;

    impl MeshingPort for UnusedPort {
        fn tetrahedralize(&self, _surface: &Path, _work_dir: &Path) -> Result<Mesh> {
            Err(FerrostaticError::Mesher("not available".to_owned()))
        }
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Uninitialized < Stage::MeshReady);
        assert!(Stage::BoundaryReady < Stage::ProblemDefined);
        assert!(Stage::Postprocessed < Stage::Written);
        assert_eq!(Stage::SpaceReady.to_string(), "SpaceReady");
    }

    #[test]
    fn steps_out_of_order_name_required_stage() {
        let port = UnusedPort;
        let mut session = AnalysisSession::new(&port, SolverSettings::default());

        match session.solve() {
            Err(FerrostaticError::Precondition {
                step,
                required,
                current,
            }) => {
                assert_eq!(step, "solve");
                assert_eq!(required, Stage::Assembled);
                assert_eq!(current, Stage::Uninitialized);
            }
            other => panic!("expected precondition error, got {other:?}"),
        }

        assert!(matches!(
            session.select_material("Titanium [cm]"),
            Err(FerrostaticError::Precondition {
                required: Stage::SpaceReady,
                ..
            })
        ));
        assert!(session.write_fields(&PathBuf::from("x.xdmf")).is_err());
        assert_eq!(session.stage(), Stage::Uninitialized);
    }

    #[test]
    fn rejected_surface_keeps_session_uninitialized() {
        let port = UnusedPort;
        let mut session = AnalysisSession::new(&port, SolverSettings::default());
        let dir = std::env::temp_dir();

        let err = session
            .generate_mesh(&dir.join("ferrostatic_missing.stl"), &dir)
            .unwrap_err();
        assert!(matches!(err, FerrostaticError::Input(_)));
        assert_eq!(session.stage(), Stage::Uninitialized);
    }
}
