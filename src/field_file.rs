//! XDMF field file with inline XML data.
//!
//! Written with quick-xml, read back with roxmltree so visualization requests
//! can be checked against the arrays that actually landed on disk.

use std::path::{Path, PathBuf};

use log::info;
use nalgebra::Matrix3;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::datatypes::Mesh;
use crate::error::{FerrostaticError, Result};
use crate::post_processor::PostprocessedFields;

pub const DISPLACEMENT: &str = "Displacement";
pub const VON_MISES: &str = "VonMisesStress";
pub const STRESS_TENSOR: &str = "StressTensor";
pub const STRAIN_TENSOR: &str = "StrainTensor";

pub fn field_file_path(output_dir: &Path, base_name: &str) -> PathBuf {
    output_dir.join(format!("{base_name}.xdmf"))
}

fn tensor_rows(tensors: &[Matrix3<f64>]) -> Vec<Vec<f64>> {
    tensors
        .iter()
        .map(|t| {
            let mut row = Vec::with_capacity(9);
            for i in 0..3 {
                for j in 0..3 {
                    row.push(t[(i, j)]);
                }
            }
            row
        })
        .collect()
}

fn format_rows<T: std::fmt::LowerExp>(rows: &[Vec<T>]) -> String {
    rows.iter()
        .map(|r| {
            r.iter()
                .map(|v| format!("{v:e}"))
                .collect::<Vec<String>>()
                .join(" ")
        })
        .collect::<Vec<String>>()
        .join("\n")
}

fn write_data_item(
    writer: &mut Writer<Vec<u8>>,
    dimensions: &str,
    number_type: &str,
    text: &str,
) -> Result<()> {
    let mut item = BytesStart::new("DataItem");
    item.push_attribute(("Dimensions", dimensions));
    item.push_attribute(("NumberType", number_type));
    if number_type == "Float" {
        item.push_attribute(("Precision", "8"));
    }
    item.push_attribute(("Format", "XML"));

    writer.write_event(Event::Start(item))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new("DataItem")))?;
    Ok(())
}

fn write_attribute(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    attribute_type: &str,
    rows: &[Vec<f64>],
) -> Result<()> {
    let components = rows.first().map(|r| r.len()).unwrap_or(1);

    let mut attribute = BytesStart::new("Attribute");
    attribute.push_attribute(("Name", name));
    attribute.push_attribute(("AttributeType", attribute_type));
    attribute.push_attribute(("Center", "Node"));
    writer.write_event(Event::Start(attribute))?;

    let dimensions = if components == 1 {
        format!("{}", rows.len())
    } else {
        format!("{} {}", rows.len(), components)
    };
    write_data_item(writer, &dimensions, "Float", &format_rows(rows))?;

    writer.write_event(Event::End(BytesEnd::new("Attribute")))?;
    Ok(())
}

/// Renders mesh and fields as an XDMF 3 document
pub fn render_field_file(mesh: &Mesh, fields: &PostprocessedFields) -> Result<String> {
    let n_points = mesh.vertices().len();
    let n_cells = mesh.elements().len();
    if fields.von_mises.len() != n_points {
        return Err(FerrostaticError::FieldFile(format!(
            "fields have {} values for {} mesh vertices",
            fields.von_mises.len(),
            n_points
        )));
    }

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("Xdmf");
    root.push_attribute(("Version", "3.0"));
    writer.write_event(Event::Start(root))?;
    writer.write_event(Event::Start(BytesStart::new("Domain")))?;

    let mut grid = BytesStart::new("Grid");
    grid.push_attribute(("Name", "mesh"));
    grid.push_attribute(("GridType", "Uniform"));
    writer.write_event(Event::Start(grid))?;

    // topology
    let mut topology = BytesStart::new("Topology");
    topology.push_attribute(("TopologyType", "Tetrahedron"));
    topology.push_attribute(("NumberOfElements", n_cells.to_string().as_str()));
    topology.push_attribute(("NodesPerElement", "4"));
    writer.write_event(Event::Start(topology))?;
    let connectivity = mesh
        .elements()
        .iter()
        .map(|e| {
            e.nodes
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<String>>()
                .join(" ")
        })
        .collect::<Vec<String>>()
        .join("\n");
    write_data_item(&mut writer, &format!("{n_cells} 4"), "Int", &connectivity)?;
    writer.write_event(Event::End(BytesEnd::new("Topology")))?;

    // geometry
    let mut geometry = BytesStart::new("Geometry");
    geometry.push_attribute(("GeometryType", "XYZ"));
    writer.write_event(Event::Start(geometry))?;
    let points: Vec<Vec<f64>> = mesh.vertices().iter().map(|v| v.to_array().to_vec()).collect();
    write_data_item(&mut writer, &format!("{n_points} 3"), "Float", &format_rows(&points))?;
    writer.write_event(Event::End(BytesEnd::new("Geometry")))?;

    let displacement: Vec<Vec<f64>> = fields
        .displacement
        .iter()
        .map(|u| vec![u.x, u.y, u.z])
        .collect();
    write_attribute(&mut writer, DISPLACEMENT, "Vector", &displacement)?;

    let von_mises: Vec<Vec<f64>> = fields.von_mises.iter().map(|v| vec![*v]).collect();
    write_attribute(&mut writer, VON_MISES, "Scalar", &von_mises)?;

    write_attribute(&mut writer, STRESS_TENSOR, "Tensor", &tensor_rows(&fields.stress))?;
    write_attribute(&mut writer, STRAIN_TENSOR, "Tensor", &tensor_rows(&fields.strain))?;

    writer.write_event(Event::End(BytesEnd::new("Grid")))?;
    writer.write_event(Event::End(BytesEnd::new("Domain")))?;
    writer.write_event(Event::End(BytesEnd::new("Xdmf")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|err| FerrostaticError::FieldFile(format!("field file is not UTF-8: {err}")))
}

/// Writes the field file. Its failure fails the analysis.
pub fn write_field_file(path: &Path, mesh: &Mesh, fields: &PostprocessedFields) -> Result<()> {
    let contents = render_field_file(mesh, fields)?;
    std::fs::write(path, contents).map_err(|err| {
        FerrostaticError::FieldFile(format!("cannot write {}: {err}", path.display()))
    })?;
    info!("wrote field file {}", path.display());
    Ok(())
}

/// A node-centred array read back from a field file
#[derive(Debug, Clone, PartialEq)]
pub struct FieldArray {
    pub name: String,
    pub attribute_type: String,
    pub components: usize,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct FieldFile {
    pub num_points: usize,
    pub num_cells: usize,
    arrays: Vec<FieldArray>,
}

fn parse_dimensions(node: &roxmltree::Node) -> Result<Vec<usize>> {
    let raw = node.attribute("Dimensions").ok_or_else(|| {
        FerrostaticError::FieldFile("DataItem without Dimensions".to_owned())
    })?;
    raw.split_whitespace()
        .map(|d| {
            d.parse::<usize>().map_err(|_| {
                FerrostaticError::FieldFile(format!("invalid DataItem dimensions '{raw}'"))
            })
        })
        .collect()
}

fn data_item<'a, 'input>(parent: &roxmltree::Node<'a, 'input>) -> Result<roxmltree::Node<'a, 'input>> {
    parent
        .children()
        .find(|n| n.has_tag_name("DataItem"))
        .ok_or_else(|| {
            FerrostaticError::FieldFile(format!(
                "<{}> has no DataItem",
                parent.tag_name().name()
            ))
        })
}

impl FieldFile {
    pub fn open(path: &Path) -> Result<FieldFile> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            FerrostaticError::FieldFile(format!("cannot read {}: {err}", path.display()))
        })?;
        FieldFile::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<FieldFile> {
        let doc = roxmltree::Document::parse(contents)
            .map_err(|err| FerrostaticError::FieldFile(format!("malformed XML: {err}")))?;

        let grid = doc
            .descendants()
            .find(|n| n.has_tag_name("Grid"))
            .ok_or_else(|| FerrostaticError::FieldFile("no Grid element".to_owned()))?;

        let num_cells = match grid.children().find(|n| n.has_tag_name("Topology")) {
            Some(topology) => parse_dimensions(&data_item(&topology)?)?
                .first()
                .copied()
                .unwrap_or(0),
            None => 0,
        };
        let num_points = match grid.children().find(|n| n.has_tag_name("Geometry")) {
            Some(geometry) => parse_dimensions(&data_item(&geometry)?)?
                .first()
                .copied()
                .unwrap_or(0),
            None => 0,
        };

        let mut arrays = Vec::new();
        for attribute in grid.children().filter(|n| n.has_tag_name("Attribute")) {
            let name = attribute.attribute("Name").ok_or_else(|| {
                FerrostaticError::FieldFile("Attribute without Name".to_owned())
            })?;
            let item = data_item(&attribute)?;
            let dims = parse_dimensions(&item)?;
            let components = dims.get(1).copied().unwrap_or(1);

            let values = item
                .text()
                .unwrap_or("")
                .split_whitespace()
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        FerrostaticError::FieldFile(format!("non-numeric value '{v}' in {name}"))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;

            let expected = dims.iter().product::<usize>();
            if values.len() != expected {
                return Err(FerrostaticError::FieldFile(format!(
                    "{name} has {} values, expected {expected}",
                    values.len()
                )));
            }

            arrays.push(FieldArray {
                name: name.to_owned(),
                attribute_type: attribute.attribute("AttributeType").unwrap_or("Scalar").to_owned(),
                components,
                values,
            });
        }

        Ok(FieldFile {
            num_points,
            num_cells,
            arrays,
        })
    }

    pub fn array_names(&self) -> Vec<&str> {
        self.arrays.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn array(&self, name: &str) -> Option<&FieldArray> {
        self.arrays.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Element, Vertex};
    use nalgebra::Vector3;

    fn two_tet_fields() -> (Mesh, PostprocessedFields) {
        let mesh = Mesh::new(
            vec![
                Vertex::new(0.0, 0.0, 0.0),
                Vertex::new(1.0, 0.0, 0.0),
                Vertex::new(0.0, 1.0, 0.0),
                Vertex::new(0.0, 0.0, 1.0),
                Vertex::new(1.0, 1.0, 1.0),
            ],
            vec![
                Element { nodes: [0, 1, 2, 3] },
                Element { nodes: [1, 2, 3, 4] },
            ],
        )
        .unwrap();

        let n = mesh.vertices().len();
        let fields = PostprocessedFields {
            displacement: (0..n).map(|i| Vector3::new(i as f64, 0.5, -1e-7)).collect(),
            von_mises: (0..n).map(|i| 10.0 * i as f64).collect(),
            stress: (0..n).map(|i| Matrix3::from_diagonal_element(i as f64)).collect(),
            strain: (0..n)
                .map(|_| Matrix3::new(1e-4, 2e-5, 0.0, 2e-5, -3e-5, 0.0, 0.0, 0.0, -3e-5))
                .collect(),
            scale_factor: 0.01,
        };
        (mesh, fields)
    }

    #[test]
    fn written_file_reads_back() {
        let (mesh, fields) = two_tet_fields();
        let dir = std::env::temp_dir().join(format!("ferrostatic_field_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = field_file_path(&dir, "part");

        write_field_file(&path, &mesh, &fields).unwrap();
        let file = FieldFile::open(&path).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(file.num_points, 5);
        assert_eq!(file.num_cells, 2);
        assert_eq!(
            file.array_names(),
            vec![DISPLACEMENT, VON_MISES, STRESS_TENSOR, STRAIN_TENSOR]
        );

        let displacement = file.array(DISPLACEMENT).unwrap();
        assert_eq!(displacement.components, 3);
        assert_eq!(displacement.attribute_type, "Vector");
        assert_eq!(&displacement.values[3..6], &[1.0, 0.5, -1e-7]);

        let von_mises = file.array(VON_MISES).unwrap();
        assert_eq!(von_mises.components, 1);
        assert_eq!(von_mises.values, vec![0.0, 10.0, 20.0, 30.0, 40.0]);

        let strain = file.array(STRAIN_TENSOR).unwrap();
        assert_eq!(strain.components, 9);
        assert_eq!(strain.values[1], 2e-5);
        assert_eq!(strain.values[3], 2e-5);
    }

    #[test]
    fn document_declares_tetrahedral_topology() {
        let (mesh, fields) = two_tet_fields();
        let xml = render_field_file(&mesh, &fields).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("TopologyType=\"Tetrahedron\""));
        assert!(xml.contains("NumberOfElements=\"2\""));
        assert!(xml.contains("Center=\"Node\""));
    }

    #[test]
    fn mismatched_fields_are_rejected() {
        let (mesh, mut fields) = two_tet_fields();
        fields.von_mises.pop();
        assert!(matches!(
            render_field_file(&mesh, &fields),
            Err(FerrostaticError::FieldFile(_))
        ));
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(FieldFile::parse("<Xdmf><Domain>").is_err());
        assert!(FieldFile::parse("<Xdmf><Domain/></Xdmf>").is_err());
    }
}
