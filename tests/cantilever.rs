mod common;

use approx::assert_relative_eq;
use common::{scratch_dir, write_box_stl, BoxMesher};

use ferrostatic::config::{AnalysisInput, MeshSettings, SolverSettings};
use ferrostatic::datatypes::{
    AnalysisKind, Axis, BoundarySpec, HalfSpaceDirection, LoadSpec, PointLoad, Vertex,
};
use ferrostatic::field_file::{FieldFile, DISPLACEMENT, VON_MISES};
use ferrostatic::pipeline::run_analysis;
use ferrostatic::session::AnalysisSession;
use ferrostatic::solver::{solve_with, SolverKind};

const LENGTH: f64 = 100.0;
const SIDE: f64 = 5.0;
const FORCE: f64 = 2000.0;
const YOUNGS_MODULUS: f64 = 1.1e7;

fn cantilever_input() -> AnalysisInput {
    AnalysisInput {
        material: "Titanium [cm]".to_owned(),
        boundary: BoundarySpec {
            axis: Some(Axis::X),
            value: Some(0.0),
            direction: Some(HalfSpaceDirection::Below),
        },
        load: LoadSpec::Point(vec![PointLoad {
            point: Vertex::new(LENGTH, SIDE, SIDE),
            magnitude: FORCE,
            direction: [0.0, -1.0, 0.0],
        }]),
        mesh: MeshSettings::default(),
        solver: SolverSettings::default(),
    }
}

fn beam_surface(name: &str) -> std::path::PathBuf {
    let dir = scratch_dir(name);
    let surface = dir.join("beam.stl");
    write_box_stl(&surface, [0.0; 3], [LENGTH, SIDE, SIDE]);
    surface
}

fn second_moment() -> f64 {
    SIDE * SIDE.powi(3) / 12.0
}

#[test]
fn tip_deflection_and_stress_match_beam_theory() {
    let surface = beam_surface("cantilever");
    let mesher = BoxMesher {
        divisions: [20, 2, 2],
    };

    let outcome = run_analysis(&cantilever_input(), &surface, &mesher, None).unwrap();
    let report = &outcome.validation;

    let expected_deflection = FORCE * LENGTH.powi(3) / (3.0 * YOUNGS_MODULUS * second_moment());
    let deflection = -report.min_displacement;
    assert!(
        deflection > 0.8 * expected_deflection && deflection < 1.3 * expected_deflection,
        "tip deflection {deflection} vs beam theory {expected_deflection}"
    );

    // Mc/I in N/cm², reported in MPa
    let expected_stress = FORCE * LENGTH * (SIDE / 2.0) / second_moment() * 0.01;
    assert!(
        report.max_von_mises > 0.5 * expected_stress && report.max_von_mises < 3.0 * expected_stress,
        "max von Mises {} vs bending stress {expected_stress}",
        report.max_von_mises
    );

    assert!(report.energy_error < 1e-6, "energy error {}", report.energy_error);
    assert_eq!(report.material, "Titanium [cm]");
    assert!(outcome.warnings.is_empty());

    // artifacts
    let dir_name = outcome.output_dir.file_name().unwrap().to_str().unwrap();
    assert!(dir_name.starts_with("beam_point_load_"));
    assert!(outcome.quality_file.as_ref().unwrap().ends_with("beam_mesh_quality.json"));
    assert!(outcome
        .validation_file
        .as_ref()
        .unwrap()
        .ends_with("beam_point_load_validation.json"));

    let fields = FieldFile::open(&outcome.field_file).unwrap();
    assert_eq!(fields.num_points, 21 * 3 * 3);
    assert_eq!(fields.num_cells, 20 * 2 * 2 * 6);
    assert!(fields
        .array(VON_MISES)
        .unwrap()
        .values
        .iter()
        .all(|vm| *vm >= 0.0));
    assert_eq!(fields.array(DISPLACEMENT).unwrap().values.len(), 3 * 21 * 3 * 3);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(outcome.validation_file.unwrap()).unwrap())
            .unwrap();
    assert_eq!(written["solver"]["type"], "cholesky");
    assert_eq!(written["solver_log"][0], "no iterative output for LU");
    assert_eq!(written["boundary_conditions"]["selected_axis"], "X");
    assert_eq!(written["boundary_conditions"]["boundary_direction"], "<");
    assert_eq!(written["point_forces"][0]["force_direction"][1], -1.0);

    assert_eq!(outcome.quality.illegal_elements, 0);
    assert_eq!(outcome.quality.num_elements, 480);

    std::fs::remove_dir_all(surface.parent().unwrap()).unwrap();
}

#[test]
fn repeated_runs_are_identical() {
    let surface = beam_surface("determinism");
    let mesher = BoxMesher {
        divisions: [10, 1, 1],
    };
    let input = cantilever_input();

    let first = run_analysis(&input, &surface, &mesher, None).unwrap();
    let second = run_analysis(&input, &surface, &mesher, None).unwrap();

    assert_ne!(first.output_dir, second.output_dir);
    assert_eq!(first.validation.energy_total_strain, second.validation.energy_total_strain);
    assert_eq!(first.validation.external_work, second.validation.external_work);
    assert_eq!(first.validation.min_displacement, second.validation.min_displacement);
    assert_eq!(first.validation.max_von_mises, second.validation.max_von_mises);

    std::fs::remove_dir_all(surface.parent().unwrap()).unwrap();
}

#[test]
fn direct_and_iterative_solves_agree() {
    let surface = beam_surface("solvers");
    let work_dir = surface.parent().unwrap().to_path_buf();
    let mesher = BoxMesher {
        divisions: [10, 2, 2],
    };
    let input = cantilever_input();
    let settings = SolverSettings {
        relative_tolerance: 1e-10,
        absolute_tolerance: 1e-14,
        max_iterations: 20_000,
        ..SolverSettings::default()
    };

    let mut session = AnalysisSession::new(&mesher, settings);
    session.generate_mesh(&surface, &work_dir).unwrap();
    session.build_function_space().unwrap();
    session.select_material(&input.material).unwrap();
    session
        .mark_boundary(AnalysisKind::PointLoad, &input.boundary)
        .unwrap();
    session.define_problem(&input.load).unwrap();
    let system = session.assemble().unwrap().clone();

    let direct = solve_with(SolverKind::Direct, &system, &settings).unwrap();
    let iterative = solve_with(SolverKind::Iterative, &system, &settings).unwrap();

    assert!(iterative.report.iterations > 0);
    assert!(iterative.report.log.len() > 1);
    assert!(iterative.report.log[0].contains("KSP Residual norm"));

    let tip_direct = direct.displacement.iter().copied().fold(f64::INFINITY, f64::min);
    let tip_iterative = iterative.displacement.iter().copied().fold(f64::INFINITY, f64::min);
    assert_relative_eq!(tip_direct, tip_iterative, max_relative = 1e-6);

    std::fs::remove_dir_all(&work_dir).unwrap();
}

#[test]
fn large_model_takes_the_iterative_path() {
    let surface = beam_surface("iterative_default");
    let mesher = BoxMesher {
        divisions: [40, 4, 4],
    };

    // default settings: quadratic elements, AMG preconditioned CG
    let outcome = run_analysis(&cantilever_input(), &surface, &mesher, None).unwrap();
    let report = &outcome.validation;

    assert_eq!(report.num_dofs, 3 * 81 * 9 * 9);
    assert_eq!(report.solver.kind, SolverKind::Iterative);
    assert_eq!(report.solver.preconditioner, "amg");
    assert!(outcome.solve.iterations > 0);
    assert!(report.solver_log.len() > 1);

    let expected_deflection = FORCE * LENGTH.powi(3) / (3.0 * YOUNGS_MODULUS * second_moment());
    let deflection = -report.min_displacement;
    assert!(
        deflection > 0.8 * expected_deflection && deflection < 1.3 * expected_deflection,
        "tip deflection {deflection} vs beam theory {expected_deflection}"
    );
    assert!(report.energy_error < 1e-3, "energy error {}", report.energy_error);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(outcome.validation_file.unwrap()).unwrap())
            .unwrap();
    assert_eq!(written["solver"]["type"], "cg");
    assert_eq!(written["solver"]["preconditioner"], "amg");

    std::fs::remove_dir_all(surface.parent().unwrap()).unwrap();
}
