//! Analysis input file and solver settings.
//!
//! The input JSON carries everything the selection layer resolved: material,
//! boundary selection, loads, plus optional meshing and solver overrides.

use std::path::Path;

use json::JsonValue;

use crate::datatypes::{
    AreaLoadSpec, Axis, BoundarySpec, HalfSpaceDirection, LoadSpec, PointLoad, Vertex,
};
use crate::error::{FerrostaticError, Result};
use crate::loads::unit_direction;
use crate::material::Material;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Lagrange degree of the displacement space
    pub degree: usize,
    pub absolute_tolerance: f64,
    pub relative_tolerance: f64,
    pub max_iterations: usize,
    pub monitor_convergence: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            degree: 2,
            absolute_tolerance: 1e-10,
            relative_tolerance: 1e-6,
            max_iterations: 1000,
            monitor_convergence: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshSettings {
    /// Target element edge length, gmsh picks one when absent
    pub element_size: Option<f64>,
    /// gmsh executable
    pub gmsh: String,
}

impl Default for MeshSettings {
    fn default() -> Self {
        MeshSettings {
            element_size: None,
            gmsh: "gmsh".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisInput {
    pub material: String,
    pub boundary: BoundarySpec,
    pub load: LoadSpec,
    pub mesh: MeshSettings,
    pub solver: SolverSettings,
}

/// Reads and validates an analysis input file
///
/// # Arguments
/// * `input_file` - Path to the input json
pub fn load_input_file(input_file: &Path) -> Result<AnalysisInput> {
    let file_string = match std::fs::read_to_string(input_file) {
        Ok(f) => f,
        Err(err) => {
            return Err(FerrostaticError::Input(format!(
                "Unable to open input file {}: {err}",
                input_file.display()
            )))
        }
    };

    parse_analysis_input(&file_string)
}

/// Parses the analysis input json
pub fn parse_analysis_input(contents: &str) -> Result<AnalysisInput> {
    let input_json = match json::parse(contents) {
        Ok(f) => f,
        Err(err) => {
            return Err(FerrostaticError::Input(format!(
                "Error in input file json: {err}"
            )))
        }
    };

    if !input_json.is_object() {
        return Err(FerrostaticError::Input(
            "Input json must be an object".to_owned(),
        ));
    }

    let material = match input_json["material"].as_str() {
        Some(name) => name.to_owned(),
        None => {
            return Err(FerrostaticError::Input(
                "Input json missing material field".to_owned(),
            ))
        }
    };
    Material::from_name(&material)?;

    let boundary = parse_boundary(&input_json["boundary"])?;

    let load = match (
        input_json.has_key("point_loads"),
        input_json.has_key("area_load"),
    ) {
        (true, false) => LoadSpec::Point(parse_point_loads(&input_json["point_loads"])?),
        (false, true) => LoadSpec::Area(parse_area_load(&input_json["area_load"])?),
        (true, true) => {
            return Err(FerrostaticError::Input(
                "Input json must have either point_loads or area_load, not both".to_owned(),
            ))
        }
        (false, false) => {
            return Err(FerrostaticError::Input(
                "Input json missing point_loads or area_load field".to_owned(),
            ))
        }
    };

    if matches!(load, LoadSpec::Area(_)) && (boundary.axis.is_none() || boundary.value.is_none()) {
        return Err(FerrostaticError::Input(
            "Area loads need a boundary axis and value".to_owned(),
        ));
    }

    let mesh = parse_mesh_settings(&input_json["mesh"])?;
    let solver = parse_solver_settings(&input_json["solver"])?;

    Ok(AnalysisInput {
        material,
        boundary,
        load,
        mesh,
        solver,
    })
}

fn parse_vector(value: &JsonValue, what: &str) -> Result<[f64; 3]> {
    if !value.is_array() || value.len() != 3 {
        return Err(FerrostaticError::Input(format!(
            "{what} must be an array of three numbers"
        )));
    }

    let mut out = [0.0; 3];
    for (i, member) in value.members().enumerate() {
        out[i] = match member.as_f64() {
            Some(v) if v.is_finite() => v,
            _ => {
                return Err(FerrostaticError::Input(format!(
                    "{what} has a non-numeric component"
                )))
            }
        };
    }
    Ok(out)
}

fn parse_force(value: &JsonValue, what: &str) -> Result<(f64, [f64; 3])> {
    let magnitude = match value["magnitude"].as_f64() {
        Some(m) if m.is_finite() => m,
        _ => {
            return Err(FerrostaticError::Input(format!(
                "{what} missing magnitude"
            )))
        }
    };
    if magnitude == 0.0 {
        return Err(FerrostaticError::Input(format!(
            "{what} magnitude must be non-zero"
        )));
    }

    let direction = parse_vector(&value["direction"], &format!("{what} direction"))?;
    if unit_direction(direction).is_none() {
        return Err(FerrostaticError::Input(format!(
            "{what} direction vector has zero length"
        )));
    }

    Ok((magnitude, direction))
}

fn parse_boundary(value: &JsonValue) -> Result<BoundarySpec> {
    if value.is_null() {
        return Ok(BoundarySpec::default());
    }

    let axis = match value["axis"].as_str() {
        Some(s) => Some(Axis::parse(s).ok_or_else(|| {
            FerrostaticError::Input(format!("Boundary axis must be X, Y or Z, got '{s}'"))
        })?),
        None => None,
    };

    let direction = match value["direction"].as_str() {
        Some(s) => Some(HalfSpaceDirection::parse(s).ok_or_else(|| {
            FerrostaticError::Input(format!("Boundary direction must be '<' or '>', got '{s}'"))
        })?),
        None => None,
    };

    Ok(BoundarySpec {
        axis,
        value: value["value"].as_f64(),
        direction,
    })
}

fn parse_point_loads(value: &JsonValue) -> Result<Vec<PointLoad>> {
    if !value.is_array() || value.is_empty() {
        return Err(FerrostaticError::Input(
            "point_loads must be a non-empty array".to_owned(),
        ));
    }

    value
        .members()
        .enumerate()
        .map(|(i, load)| {
            let what = format!("point load {i}");
            let point = parse_vector(&load["point"], &format!("{what} point"))?;
            let (magnitude, direction) = parse_force(load, &what)?;
            Ok(PointLoad {
                point: Vertex::from_array(point),
                magnitude,
                direction,
            })
        })
        .collect()
}

fn parse_area_load(value: &JsonValue) -> Result<AreaLoadSpec> {
    let facets_json = &value["facets"];
    if !facets_json.is_array() || facets_json.is_empty() {
        return Err(FerrostaticError::Input(
            "area_load facets must be a non-empty array".to_owned(),
        ));
    }

    let mut facets = Vec::with_capacity(facets_json.len());
    for (i, facet) in facets_json.members().enumerate() {
        if !facet.is_array() || facet.len() != 3 {
            return Err(FerrostaticError::Input(format!(
                "area_load facet {i} must have three vertices"
            )));
        }
        let a = parse_vector(&facet[0], &format!("facet {i} vertex 0"))?;
        let b = parse_vector(&facet[1], &format!("facet {i} vertex 1"))?;
        let c = parse_vector(&facet[2], &format!("facet {i} vertex 2"))?;
        facets.push([
            Vertex::from_array(a),
            Vertex::from_array(b),
            Vertex::from_array(c),
        ]);
    }

    let (magnitude, direction) = parse_force(value, "area_load")?;

    Ok(AreaLoadSpec {
        facets,
        magnitude,
        direction,
    })
}

fn parse_mesh_settings(value: &JsonValue) -> Result<MeshSettings> {
    let mut settings = MeshSettings::default();
    if value.is_null() {
        return Ok(settings);
    }

    if value.has_key("element_size") {
        match value["element_size"].as_f64() {
            Some(size) if size > 0.0 && size.is_finite() => settings.element_size = Some(size),
            _ => {
                return Err(FerrostaticError::Input(
                    "mesh element_size must be a positive number".to_owned(),
                ))
            }
        }
    }
    if let Some(gmsh) = value["gmsh"].as_str() {
        settings.gmsh = gmsh.to_owned();
    }

    Ok(settings)
}

fn parse_solver_settings(value: &JsonValue) -> Result<SolverSettings> {
    let mut settings = SolverSettings::default();
    if value.is_null() {
        return Ok(settings);
    }

    if value.has_key("degree") {
        settings.degree = match value["degree"].as_usize() {
            Some(d @ (1 | 2)) => d,
            _ => {
                return Err(FerrostaticError::Input(
                    "solver degree must be 1 or 2".to_owned(),
                ))
            }
        };
    }

    for (key, target) in [
        ("absolute_tolerance", &mut settings.absolute_tolerance),
        ("relative_tolerance", &mut settings.relative_tolerance),
    ] {
        if value.has_key(key) {
            *target = match value[key].as_f64() {
                Some(t) if t > 0.0 => t,
                _ => {
                    return Err(FerrostaticError::Input(format!(
                        "solver {key} must be a positive number"
                    )))
                }
            };
        }
    }

    if value.has_key("max_iterations") {
        settings.max_iterations = match value["max_iterations"].as_usize() {
            Some(n) if n > 0 => n,
            _ => {
                return Err(FerrostaticError::Input(
                    "solver max_iterations must be a positive integer".to_owned(),
                ))
            }
        };
    }

    if let Some(monitor) = value["monitor_convergence"].as_bool() {
        settings.monitor_convergence = monitor;
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT_INPUT: &str = r#"{
        "material": "Titanium [cm]",
        "boundary": { "axis": "X", "value": 0.0, "direction": "<" },
        "point_loads": [ { "point": [100, 5, 5], "magnitude": 2000, "direction": [0, -1, 0] } ]
    }"#;

    #[test]
    fn parses_point_load_input() {
        let input = parse_analysis_input(POINT_INPUT).unwrap();
        assert_eq!(input.material, "Titanium [cm]");
        assert_eq!(input.boundary.axis, Some(Axis::X));
        assert_eq!(input.boundary.direction, Some(HalfSpaceDirection::Below));
        assert_eq!(input.solver, SolverSettings::default());
        assert_eq!(input.mesh, MeshSettings::default());

        match input.load {
            LoadSpec::Point(loads) => {
                assert_eq!(loads.len(), 1);
                assert_eq!(loads[0].point, Vertex::new(100.0, 5.0, 5.0));
            }
            LoadSpec::Area(_) => panic!("expected point loads"),
        }
    }

    #[test]
    fn parses_area_load_and_overrides() {
        let input = parse_analysis_input(
            r#"{
                "material": "Structural Steel [m]",
                "boundary": { "axis": "z", "value": 0 },
                "area_load": {
                    "facets": [[[0,0,1],[1,0,1],[0,1,1]]],
                    "magnitude": 100,
                    "direction": [0, 0, -1]
                },
                "mesh": { "element_size": 0.5, "gmsh": "/opt/gmsh/bin/gmsh" },
                "solver": { "degree": 1, "max_iterations": 50 }
            }"#,
        )
        .unwrap();

        assert!(matches!(input.load, LoadSpec::Area(ref a) if a.facets.len() == 1));
        assert_eq!(input.boundary.direction, None);
        assert_eq!(input.mesh.element_size, Some(0.5));
        assert_eq!(input.solver.degree, 1);
        assert_eq!(input.solver.max_iterations, 50);
        assert_eq!(input.solver.relative_tolerance, 1e-6);
    }

    #[test]
    fn rejects_bad_inputs() {
        let cases = [
            r#"{ "material": "Unobtainium", "point_loads": [] }"#,
            r#"{ "material": "Titanium [cm]" }"#,
            r#"{ "material": "Titanium [cm]", "point_loads": [] }"#,
            r#"{ "material": "Titanium [cm]",
                 "point_loads": [ { "point": [0,0,0], "magnitude": 0, "direction": [1,0,0] } ] }"#,
            r#"{ "material": "Titanium [cm]",
                 "point_loads": [ { "point": [0,0,0], "magnitude": 5, "direction": [0,0,0] } ] }"#,
            r#"{ "material": "Titanium [cm]", "boundary": { "axis": "X" },
                 "area_load": { "facets": [[[0,0,0],[1,0,0],[0,1,0]]], "magnitude": 1, "direction": [1,0,0] } }"#,
            r#"{ "material": "Titanium [cm]", "boundary": { "axis": "W", "value": 0 },
                 "point_loads": [ { "point": [0,0,0], "magnitude": 5, "direction": [1,0,0] } ] }"#,
            r#"{ "material": "Titanium [cm]", "solver": { "degree": 3 },
                 "point_loads": [ { "point": [0,0,0], "magnitude": 5, "direction": [1,0,0] } ] }"#,
            "not json",
        ];

        for case in cases {
            assert!(parse_analysis_input(case).is_err(), "accepted: {case}");
        }
    }

    #[test]
    fn missing_boundary_is_allowed_for_point_loads() {
        let input = parse_analysis_input(
            r#"{ "material": "Titanium [m]",
                 "point_loads": [ { "point": [0,0,0], "magnitude": 5, "direction": [1,0,0] } ] }"#,
        )
        .unwrap();
        assert_eq!(input.boundary, BoundarySpec::default());
    }
}
