#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use ferrostatic::datatypes::{Element, Mesh, Vertex};
use ferrostatic::error::Result;
use ferrostatic::mesher::MeshingPort;
use ferrostatic::surface::read_stl;

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Fresh, empty scratch folder unique to this process and call
pub fn scratch_dir(name: &str) -> PathBuf {
    let n = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "ferrostatic_it_{}_{}_{}",
        std::process::id(),
        name,
        n
    ));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes the 12-triangle ASCII STL of an axis-aligned box
pub fn write_box_stl(path: &Path, min: [f64; 3], max: [f64; 3]) {
    let corner = |i: usize| {
        [
            if i & 1 == 0 { min[0] } else { max[0] },
            if i & 2 == 0 { min[1] } else { max[1] },
            if i & 4 == 0 { min[2] } else { max[2] },
        ]
    };
    let faces: [[usize; 4]; 6] = [
        [0, 2, 3, 1],
        [4, 5, 7, 6],
        [0, 1, 5, 4],
        [2, 6, 7, 3],
        [0, 4, 6, 2],
        [1, 3, 7, 5],
    ];

    let mut stl = String::from("solid box\n");
    for [a, b, c, d] in faces {
        for tri in [[a, b, c], [a, c, d]] {
            stl.push_str("  facet normal 0 0 0\n    outer loop\n");
            for i in tri {
                let p = corner(i);
                stl.push_str(&format!("      vertex {} {} {}\n", p[0], p[1], p[2]));
            }
            stl.push_str("    endloop\n  endfacet\n");
        }
    }
    stl.push_str("endsolid box\n");

    std::fs::write(path, stl).unwrap();
}

/// Meshes the bounding box of the surface with a structured grid, six
/// positively oriented tetrahedra per cell
pub struct BoxMesher {
    pub divisions: [usize; 3],
}

impl MeshingPort for BoxMesher {
    fn tetrahedralize(&self, surface: &Path, _work_dir: &Path) -> Result<Mesh> {
        let (min, max) = read_stl(surface)?.bounding_box();
        let [nx, ny, nz] = self.divisions;

        let coordinate = |lo: f64, hi: f64, i: usize, n: usize| lo + (hi - lo) * i as f64 / n as f64;
        let index = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);

        let mut vertices = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    vertices.push(Vertex::new(
                        coordinate(min.x, max.x, i, nx),
                        coordinate(min.y, max.y, j, ny),
                        coordinate(min.z, max.z, k, nz),
                    ));
                }
            }
        }

        const KUHN: [[usize; 4]; 6] = [
            [0, 1, 3, 7],
            [0, 1, 5, 7],
            [0, 2, 3, 7],
            [0, 2, 6, 7],
            [0, 4, 5, 7],
            [0, 4, 6, 7],
        ];

        let mut elements = Vec::with_capacity(6 * nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let cell = |c: usize| index(i + (c & 1), j + ((c >> 1) & 1), k + ((c >> 2) & 1));
                    for tet in KUHN {
                        let mut nodes = tet.map(cell);
                        let [p0, p1, p2, p3] = nodes.map(|n| vertices[n].to_vector());
                        if (p1 - p0).dot(&(p2 - p0).cross(&(p3 - p0))) < 0.0 {
                            nodes.swap(2, 3);
                        }
                        elements.push(Element { nodes });
                    }
                }
            }
        }

        Mesh::new(vertices, elements)
    }
}

/// Boundary facets of `mesh` whose vertices all satisfy `on_face`
pub fn facets_where(mesh: &Mesh, on_face: impl Fn(&Vertex) -> bool) -> Vec<[Vertex; 3]> {
    mesh.facets()
        .iter()
        .map(|f| mesh.facet_vertices(f))
        .filter(|v| v.iter().all(&on_face))
        .collect()
}
