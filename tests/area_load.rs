mod common;

use common::{facets_where, scratch_dir, write_box_stl, BoxMesher};

use ferrostatic::config::{AnalysisInput, MeshSettings, SolverSettings};
use ferrostatic::datatypes::{AreaLoadSpec, Axis, BoundarySpec, LoadSpec, Vertex};
use ferrostatic::error::FerrostaticError;
use ferrostatic::mesher::MeshingPort;
use ferrostatic::pipeline::run_analysis;

const LENGTH: f64 = 10.0;
const SIDE: f64 = 2.0;
const FORCE: f64 = 1000.0;
const YOUNGS_MODULUS: f64 = 210e5;

fn bar_input(facets: Vec<[Vertex; 3]>) -> AnalysisInput {
    AnalysisInput {
        material: "Structural Steel [cm]".to_owned(),
        // the direction flag is ignored by area analyses
        boundary: BoundarySpec {
            axis: Some(Axis::X),
            value: Some(0.0),
            direction: None,
        },
        load: LoadSpec::Area(AreaLoadSpec {
            facets,
            magnitude: FORCE,
            direction: [3.0, 0.0, 0.0],
        }),
        mesh: MeshSettings::default(),
        solver: SolverSettings::default(),
    }
}

#[test]
fn bar_in_tension_elongates_like_hookes_law() {
    let dir = scratch_dir("tension");
    let surface = dir.join("bar.stl");
    write_box_stl(&surface, [0.0; 3], [LENGTH, SIDE, SIDE]);
    let mesher = BoxMesher {
        divisions: [5, 2, 2],
    };

    let mesh = mesher.tetrahedralize(&surface, &dir).unwrap();
    let end_face = facets_where(&mesh, |v| v.x == LENGTH);
    assert_eq!(end_face.len(), 8);

    let outcome = run_analysis(&bar_input(end_face), &surface, &mesher, None).unwrap();
    let report = &outcome.validation;

    let area = SIDE * SIDE;
    let elongation = FORCE * LENGTH / (area * YOUNGS_MODULUS);
    assert!(
        report.max_displacement > 0.9 * elongation && report.max_displacement < 1.05 * elongation,
        "end displacement {} vs {elongation}",
        report.max_displacement
    );

    // F/A in N/cm², reported in MPa
    let stress = FORCE / area * 0.01;
    assert!(
        report.max_von_mises > 0.8 * stress && report.max_von_mises < 2.0 * stress,
        "max von Mises {} vs {stress}",
        report.max_von_mises
    );

    assert!(report.energy_error < 1e-6);
    assert!(report.external_work > 0.0);

    let area_forces = report.area_forces.as_ref().unwrap();
    assert_eq!(area_forces.facet_vertices.len(), 8);
    assert_eq!(area_forces.force_direction, [1.0, 0.0, 0.0]);
    assert_eq!(area_forces.input_direction, [3.0, 0.0, 0.0]);
    assert!(report.point_forces.is_none());

    assert!(outcome
        .validation_file
        .unwrap()
        .ends_with("bar_area_load_validation.json"));
    assert!(outcome.field_file.ends_with("bar.xdmf"));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn unmatched_facets_fail_without_leaving_output() {
    let root = scratch_dir("unmatched");
    let surface = root.join("bar.stl");
    write_box_stl(&surface, [0.0; 3], [LENGTH, SIDE, SIDE]);
    let results = scratch_dir("unmatched_results");
    let mesher = BoxMesher {
        divisions: [5, 2, 2],
    };

    let nowhere = vec![[
        Vertex::new(50.0, 0.0, 0.0),
        Vertex::new(50.0, 1.0, 0.0),
        Vertex::new(50.0, 0.0, 1.0),
    ]];
    let err = run_analysis(&bar_input(nowhere), &surface, &mesher, Some(&results)).unwrap_err();

    assert!(matches!(err, FerrostaticError::Input(_)));
    assert_eq!(std::fs::read_dir(&results).unwrap().count(), 0);

    std::fs::remove_dir_all(&root).unwrap();
    std::fs::remove_dir_all(&results).unwrap();
}

#[test]
fn area_analysis_requires_boundary_plane() {
    let root = scratch_dir("no_plane");
    let surface = root.join("bar.stl");
    write_box_stl(&surface, [0.0; 3], [LENGTH, SIDE, SIDE]);
    let results = scratch_dir("no_plane_results");
    let mesher = BoxMesher {
        divisions: [5, 1, 1],
    };

    let mesh = mesher.tetrahedralize(&surface, &root).unwrap();
    let mut input = bar_input(facets_where(&mesh, |v| v.x == LENGTH));
    input.boundary.value = None;

    let err = run_analysis(&input, &surface, &mesher, Some(&results)).unwrap_err();
    assert!(matches!(err, FerrostaticError::Input(_)));
    assert_eq!(std::fs::read_dir(&results).unwrap().count(), 0);

    std::fs::remove_dir_all(&root).unwrap();
    std::fs::remove_dir_all(&results).unwrap();
}

#[test]
fn unknown_material_is_rejected_before_meshing() {
    let root = scratch_dir("material");
    let surface = root.join("bar.stl");
    write_box_stl(&surface, [0.0; 3], [LENGTH, SIDE, SIDE]);
    let results = scratch_dir("material_results");
    let mesher = BoxMesher {
        divisions: [1, 1, 1],
    };

    let mut input = bar_input(Vec::new());
    input.material = "Unobtainium [m]".to_owned();

    let err = run_analysis(&input, &surface, &mesher, Some(&results)).unwrap_err();
    assert!(matches!(err, FerrostaticError::UnknownMaterial(_)));
    assert_eq!(std::fs::read_dir(&results).unwrap().count(), 0);

    std::fs::remove_dir_all(&root).unwrap();
    std::fs::remove_dir_all(&results).unwrap();
}
