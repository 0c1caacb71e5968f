//! Mesh model, OBJ text form and geometric comparison.
//!
//! Meshes are built from baked quads through [`MeshBuilder`], which assigns
//! coplanar duplicate faces to successive face layers (`fLayer0`, `fLayer1`,
//! ...) so that stacked textures survive import.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};

use crate::schema::{DEFAULT_FLUID_EPSILON, WorldMaterial};
use crate::world::{Quad, QuadSink};

/// Prefix of face layer group names.
pub const FACE_LAYER_PREFIX: &str = "fLayer";

/// Name of face layer `index`.
pub fn face_layer_name(index: u32) -> String {
    format!("{FACE_LAYER_PREFIX}{index}")
}

/// One corner of a face: indices into the mesh's position and tex-coord lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceVertex {
    pub position: u32,
    pub tex_coord: Option<u32>,
}

/// A polygon of the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Face {
    pub vertices: Vec<FaceVertex>,
    pub material: String,
    pub layer: u32,
}

/// Indexed polygon mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    pub tex_coords: Vec<[f32; 2]>,
    pub faces: Vec<Face>,
}

/// Bitwise identity of a [`Mesh`], usable as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeshKey {
    positions: Vec<[u32; 3]>,
    tex_coords: Vec<[u32; 2]>,
    faces: Vec<Face>,
}

/// Errors reading OBJ text.
#[derive(Debug, thiserror::Error)]
pub enum ObjError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Line {line}: {message}")]
    Syntax { line: usize, message: String },
}

impl Mesh {
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Exact identity: two meshes share a key only if every position,
    /// tex coord and face is the same.
    pub fn key(&self) -> MeshKey {
        MeshKey {
            positions: self.positions.iter().map(|p| p.map(f32::to_bits)).collect(),
            tex_coords: self.tex_coords.iter().map(|t| t.map(f32::to_bits)).collect(),
            faces: self.faces.clone(),
        }
    }

    /// Number of face layers in use.
    pub fn layer_count(&self) -> u32 {
        self.faces.iter().map(|f| f.layer + 1).max().unwrap_or(0)
    }

    /// Distinct material names, sorted.
    pub fn material_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.faces.iter().map(|f| f.material.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Write Wavefront OBJ text.
    ///
    /// Texture V is flipped (`1 - v`) to match OBJ's bottom-left origin.
    /// Faces are grouped by layer, then by material.
    pub fn write_obj<W: Write>(&self, mut w: W) -> io::Result<()> {
        let mut out = String::new();
        for [x, y, z] in &self.positions {
            let _ = writeln!(out, "v {x} {y} {z}");
        }
        for [u, v] in &self.tex_coords {
            let _ = writeln!(out, "vt {u} {}", 1.0 - v);
        }

        let mut order: Vec<&Face> = self.faces.iter().collect();
        order.sort_by(|a, b| a.layer.cmp(&b.layer).then_with(|| a.material.cmp(&b.material)));

        let mut group = None;
        let mut material = None;
        for face in order {
            if group != Some(face.layer) {
                let _ = writeln!(out, "g {}", face_layer_name(face.layer));
                group = Some(face.layer);
                material = None;
            }
            if material != Some(face.material.as_str()) {
                let _ = writeln!(out, "usemtl {}", face.material);
                material = Some(face.material.as_str());
            }
            out.push('f');
            for vertex in &face.vertices {
                match vertex.tex_coord {
                    Some(t) => {
                        let _ = write!(out, " {}/{}", vertex.position + 1, t + 1);
                    }
                    None => {
                        let _ = write!(out, " {}", vertex.position + 1);
                    }
                }
            }
            out.push('\n');
        }

        w.write_all(out.as_bytes())
    }

    /// Parse OBJ text written by [`Mesh::write_obj`].
    ///
    /// Normals, objects and smoothing groups are ignored.
    pub fn parse_obj<R: BufRead>(r: R) -> Result<Self, ObjError> {
        let mut mesh = Mesh::default();
        let mut layer = 0;
        let mut material = String::new();

        for (index, line) in r.lines().enumerate() {
            let line = line?;
            let number = index + 1;
            let syntax = |message: String| ObjError::Syntax {
                line: number,
                message,
            };

            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("v") => {
                    let [x, y, z] = parse_floats::<3>(&mut tokens).map_err(syntax)?;
                    mesh.positions.push([x, y, z]);
                }
                Some("vt") => {
                    let [u, v] = parse_floats::<2>(&mut tokens).map_err(syntax)?;
                    mesh.tex_coords.push([u, 1.0 - v]);
                }
                Some("g") => {
                    layer = tokens
                        .next()
                        .and_then(|name| name.strip_prefix(FACE_LAYER_PREFIX))
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0);
                }
                Some("usemtl") => {
                    material = tokens.next().unwrap_or_default().to_string();
                }
                Some("f") => {
                    let vertices = tokens
                        .map(|token| parse_face_vertex(token, &mesh))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(syntax)?;
                    if vertices.len() < 3 {
                        return Err(syntax(format!("face has {} vertices", vertices.len())));
                    }
                    mesh.faces.push(Face {
                        vertices,
                        material: material.clone(),
                        layer,
                    });
                }
                _ => {}
            }
        }

        Ok(mesh)
    }
}

fn parse_floats<'a, const N: usize>(
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<[f32; N], String> {
    let mut out = [0.0; N];
    for slot in &mut out {
        let token = tokens.next().ok_or("missing coordinate")?;
        *slot = token.parse().map_err(|_| format!("bad number {token:?}"))?;
    }
    Ok(out)
}

fn parse_index(token: &str, len: usize) -> Result<u32, String> {
    let index: i64 = token.parse().map_err(|_| format!("bad index {token:?}"))?;
    // Negative indices count back from the end
    let resolved = if index < 0 { len as i64 + index } else { index - 1 };
    if resolved < 0 || resolved >= len as i64 {
        return Err(format!("index {index} out of range"));
    }
    Ok(resolved as u32)
}

fn parse_face_vertex(token: &str, mesh: &Mesh) -> Result<FaceVertex, String> {
    let mut parts = token.split('/');
    let position = parse_index(parts.next().unwrap_or_default(), mesh.positions.len())?;
    let tex_coord = match parts.next() {
        Some("") | None => None,
        Some(t) => Some(parse_index(t, mesh.tex_coords.len())?),
    };
    Ok(FaceVertex {
        position,
        tex_coord,
    })
}

fn key3(v: [f32; 3]) -> [u32; 3] {
    v.map(f32::to_bits)
}

fn key2(v: [f32; 2]) -> [u32; 2] {
    v.map(f32::to_bits)
}

/// Accumulates quads into a [`Mesh`].
///
/// Identical positions and tex coords are shared. A quad whose corners
/// coincide with an already emitted face goes on the next free face layer.
pub struct MeshBuilder {
    mesh: Mesh,
    offset: [f32; 3],
    transparent: bool,
    emissive: bool,
    positions: HashMap<[u32; 3], u32>,
    tex_coords: HashMap<[u32; 2], u32>,
    layers: HashMap<Vec<u32>, u32>,
}

impl MeshBuilder {
    /// Quads get a world material with the given transparency and emission.
    pub fn new(transparent: bool, emissive: bool) -> Self {
        Self {
            mesh: Mesh::default(),
            offset: [0.0; 3],
            transparent,
            emissive,
            positions: HashMap::new(),
            tex_coords: HashMap::new(),
            layers: HashMap::new(),
        }
    }

    /// Translation applied to subsequently pushed quads.
    pub fn set_offset(&mut self, offset: [f32; 3]) {
        self.offset = offset;
    }

    fn position(&mut self, p: [f32; 3]) -> u32 {
        let p = [p[0] + self.offset[0], p[1] + self.offset[1], p[2] + self.offset[2]];
        *self.positions.entry(key3(p)).or_insert_with(|| {
            self.mesh.positions.push(p);
            self.mesh.positions.len() as u32 - 1
        })
    }

    fn tex_coord(&mut self, uv: [f32; 2]) -> u32 {
        *self.tex_coords.entry(key2(uv)).or_insert_with(|| {
            self.mesh.tex_coords.push(uv);
            self.mesh.tex_coords.len() as u32 - 1
        })
    }

    pub fn finish(self) -> Mesh {
        self.mesh
    }
}

impl QuadSink for MeshBuilder {
    fn push_quad(&mut self, quad: &Quad) {
        let vertices: Vec<FaceVertex> = quad
            .vertices
            .iter()
            .map(|v| FaceVertex {
                position: self.position(v.position),
                tex_coord: Some(self.tex_coord(v.uv)),
            })
            .collect();

        let mut corners: Vec<u32> = vertices.iter().map(|v| v.position).collect();
        corners.sort_unstable();
        let layer = self.layers.entry(corners).or_insert(0);
        let face_layer = *layer;
        *layer += 1;

        let material = WorldMaterial {
            transparent: self.transparent,
            tinted: quad.tinted,
            emissive: self.emissive,
        };
        self.mesh.faces.push(Face {
            vertices,
            material: material.name(),
            layer: face_layer,
        });
    }
}

/// Geometric mesh equality.
///
/// Vertex positions are compared after sorting (unless `no_sort`) within
/// `epsilon`; the offset passed to [`MeshComparator::matches`] is added to
/// the first mesh. Unless lenient, faces must also match: every face of one
/// mesh needs a face of the other spanning the same corner positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshComparator {
    pub epsilon: f32,
    /// Skip the face checks, so differently triangulated meshes match.
    pub lenient: bool,
    pub compare_uvs: bool,
    pub compare_materials: bool,
    /// Vertex order is known to be deterministic.
    pub no_sort: bool,
}

impl Default for MeshComparator {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_FLUID_EPSILON,
            lenient: false,
            compare_uvs: false,
            compare_materials: false,
            no_sort: false,
        }
    }
}

impl MeshComparator {
    pub fn new(epsilon: f32) -> Self {
        Self {
            epsilon,
            ..Default::default()
        }
    }

    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    pub fn with_uvs(mut self) -> Self {
        self.compare_uvs = true;
        self
    }

    pub fn with_materials(mut self) -> Self {
        self.compare_materials = true;
        self
    }

    pub fn unsorted(mut self) -> Self {
        self.no_sort = true;
        self
    }

    pub fn matches(&self, first: &Mesh, second: &Mesh, offset: [f32; 3]) -> bool {
        if first.positions.len() != second.positions.len() {
            return false;
        }
        if !self.lenient && first.faces.len() != second.faces.len() {
            return false;
        }
        if self.compare_materials && first.material_names() != second.material_names() {
            return false;
        }

        let shift = |p: [f32; 3]| [p[0] + offset[0], p[1] + offset[1], p[2] + offset[2]];
        let a = self.ordered(&first.positions, shift);
        let b = self.ordered(&second.positions, |p| p);
        if !a.iter().zip(&b).all(|(p, q)| self.close(p, q)) {
            return false;
        }

        if !self.lenient {
            let a = self.face_corners(first, shift);
            let b = self.face_corners(second, |p| p);
            let same_face = |f: &Vec<[f32; 3]>, g: &Vec<[f32; 3]>| {
                f.len() == g.len() && f.iter().zip(g).all(|(p, q)| self.close(p, q))
            };
            if !a.iter().zip(&b).all(|(f, g)| same_face(f, g)) {
                return false;
            }
        }

        if self.compare_uvs {
            if first.tex_coords.len() != second.tex_coords.len() {
                return false;
            }
            let a = self.ordered(&first.tex_coords, |t| t);
            let b = self.ordered(&second.tex_coords, |t| t);
            return a.iter().zip(&b).all(|(s, t)| self.close(s, t));
        }

        true
    }

    fn close<const N: usize>(&self, a: &[f32; N], b: &[f32; N]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() <= self.epsilon)
    }

    fn ordered<const N: usize>(&self, values: &[[f32; N]], map: impl Fn([f32; N]) -> [f32; N]) -> Vec<[f32; N]> {
        let mut out: Vec<[f32; N]> = values.iter().copied().map(map).collect();
        if !self.no_sort {
            out.sort_by(compare_coords);
        }
        out
    }

    /// Corner positions of each face, sorted within the face and then
    /// across faces.
    fn face_corners(&self, mesh: &Mesh, map: impl Fn([f32; 3]) -> [f32; 3]) -> Vec<Vec<[f32; 3]>> {
        let mut faces: Vec<Vec<[f32; 3]>> = mesh
            .faces
            .iter()
            .map(|face| {
                let corners: Vec<[f32; 3]> = face
                    .vertices
                    .iter()
                    .filter_map(|v| mesh.positions.get(v.position as usize).copied())
                    .collect();
                self.ordered(&corners, &map)
            })
            .collect();
        if !self.no_sort {
            faces.sort_by(|f, g| {
                f.len().cmp(&g.len()).then_with(|| {
                    f.iter()
                        .zip(g)
                        .map(|(p, q)| compare_coords(p, q))
                        .find(|o| o.is_ne())
                        .unwrap_or(Ordering::Equal)
                })
            });
        }
        faces
    }
}

fn compare_coords<const N: usize>(a: &[f32; N], b: &[f32; N]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Vertex;

    fn quad(y: f32, tinted: bool) -> Quad {
        let corners = [[0., y, 0.], [1., y, 0.], [1., y, 1.], [0., y, 1.]];
        let uvs = [[0., 0.], [1., 0.], [1., 1.], [0., 1.]];
        Quad {
            vertices: std::array::from_fn(|i| Vertex {
                position: corners[i],
                uv: uvs[i],
            }),
            tinted,
        }
    }

    #[test]
    fn test_shared_vertices() {
        let mut builder = MeshBuilder::new(false, false);
        builder.push_quad(&quad(0.0, false));
        builder.push_quad(&quad(1.0, false));
        let mesh = builder.finish();
        assert_eq!(mesh.positions.len(), 8);
        assert_eq!(mesh.tex_coords.len(), 4);
        assert_eq!(mesh.faces.len(), 2);
        assert_eq!(mesh.layer_count(), 1);
    }

    #[test]
    fn test_coplanar_faces_layered() {
        let mut builder = MeshBuilder::new(false, false);
        builder.push_quad(&quad(1.0, false));
        builder.push_quad(&quad(1.0, true));
        builder.push_quad(&quad(1.0, true));
        let mesh = builder.finish();
        let layers: Vec<u32> = mesh.faces.iter().map(|f| f.layer).collect();
        assert_eq!(layers, vec![0, 1, 2]);
        assert_eq!(mesh.layer_count(), 3);
        assert_eq!(mesh.material_names(), vec!["world", "world_tinted"]);
    }

    #[test]
    fn test_obj_text_roundtrip() {
        let mut builder = MeshBuilder::new(true, false);
        builder.push_quad(&quad(0.25, true));
        builder.push_quad(&quad(0.25, false));
        let mesh = builder.finish();

        let mut buf = Vec::new();
        mesh.write_obj(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("g fLayer1"));
        assert!(text.contains("usemtl world_trans_tinted"));

        let parsed = Mesh::parse_obj(buf.as_slice()).unwrap();
        assert_eq!(parsed.positions, mesh.positions);
        assert_eq!(parsed.faces.len(), 2);
        assert_eq!(parsed.layer_count(), 2);
        assert!(MeshComparator::default().with_uvs().with_materials().matches(&mesh, &parsed, [0.0; 3]));
    }

    #[test]
    fn test_parse_rejects_bad_index() {
        let text = "v 0 0 0\nv 1 0 0\nf 1 2 9\n";
        let err = Mesh::parse_obj(text.as_bytes()).unwrap_err();
        assert!(matches!(err, ObjError::Syntax { line: 3, .. }));
    }

    #[test]
    fn test_empty_mesh_writes_nothing() {
        let mut buf = Vec::new();
        Mesh::default().write_obj(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert!(Mesh::parse_obj(buf.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn test_comparator_offset_and_order() {
        let mut a = MeshBuilder::new(false, false);
        a.push_quad(&quad(0.0, false));
        let a = a.finish();

        let mut b = MeshBuilder::new(false, false);
        b.set_offset([2.0, 0.0, 0.0]);
        b.push_quad(&quad(0.0, false));
        let mut b = b.finish();
        b.positions.reverse();

        let cmp = MeshComparator::default();
        assert!(!cmp.matches(&a, &b, [0.0; 3]));
        assert!(cmp.matches(&a, &b, [2.0, 0.0, 0.0]));
        assert!(cmp.matches(&a, &b, [2.005, 0.0, 0.0]));
        assert!(!cmp.unsorted().matches(&a, &b, [2.0, 0.0, 0.0]));
    }

    #[test]
    fn test_lenient_face_count() {
        let mut a = MeshBuilder::new(false, false);
        a.push_quad(&quad(0.0, false));
        let a = a.finish();
        let mut b = a.clone();
        b.faces.push(b.faces[0].clone());

        assert!(!MeshComparator::default().matches(&a, &b, [0.0; 3]));
        assert!(MeshComparator::default().lenient().matches(&a, &b, [0.0; 3]));
    }

    fn cube_corners() -> Vec<[f32; 3]> {
        vec![
            [0., 0., 0.],
            [1., 0., 0.],
            [1., 0., 1.],
            [0., 0., 1.],
            [0., 1., 0.],
            [1., 1., 0.],
            [1., 1., 1.],
            [0., 1., 1.],
        ]
    }

    fn faces(indices: &[[u32; 4]]) -> Vec<Face> {
        indices
            .iter()
            .map(|corners| Face {
                vertices: corners
                    .iter()
                    .map(|&position| FaceVertex {
                        position,
                        tex_coord: None,
                    })
                    .collect(),
                material: "world".to_string(),
                layer: 0,
            })
            .collect()
    }

    #[test]
    fn test_face_topology_compared() {
        // Bottom and top against north and south: same corners, same face count
        let caps = Mesh {
            positions: cube_corners(),
            tex_coords: Vec::new(),
            faces: faces(&[[0, 1, 2, 3], [4, 5, 6, 7]]),
        };
        let sides = Mesh {
            faces: faces(&[[0, 1, 5, 4], [3, 2, 6, 7]]),
            ..caps.clone()
        };
        let mut reordered = caps.clone();
        reordered.faces.reverse();

        let strict = MeshComparator::default();
        assert!(!strict.matches(&caps, &sides, [0.0; 3]));
        assert!(strict.matches(&caps, &reordered, [0.0; 3]));
        assert!(strict.lenient().matches(&caps, &sides, [0.0; 3]));
    }

    #[test]
    fn test_key_is_exact() {
        let mut builder = MeshBuilder::new(false, false);
        builder.push_quad(&quad(0.0, false));
        let mesh = builder.finish();
        assert_eq!(mesh.key(), mesh.clone().key());

        let mut tinted = MeshBuilder::new(false, false);
        tinted.push_quad(&quad(0.0, true));
        assert_ne!(mesh.key(), tinted.finish().key());

        let mut nudged = mesh.clone();
        nudged.positions[0][0] += 0.001;
        assert_ne!(mesh.key(), nudged.key());
    }
}
