use std::collections::{
	HashMap,
	HashSet
};

use ultraviolet::vec::{
	Vec2,
	Vec3
};

use xrf_core::diag::{
	Diagnostics,
	Warning
};

use crate::mesh::{
	MeshFlags,
	RawMesh,
	VMapData
};

#[cfg(feature = "import")]
use crate::object::import::ObjectImportError;

/// Retry bound for the duplicate-face bucket chain
const BUCKET_LIMIT: u32 = 100;

/// One reconstructed vertex. `uv` stays `None` until corners are split
/// off into dedicated vertices; until then UVs live on the face corners.
#[derive(Clone, Debug)]
pub struct BuiltVertex {
	pub position: Vec3,
	pub raw_index: u32,
	pub weights: Vec<(String, f32)>,
	pub uv: Option<Vec2>,
}

#[derive(Clone, Debug)]
pub struct BuiltFace {
	pub verts: [usize; 3],
	pub uvs: [Vec2; 3],
	pub surface: Option<usize>,
	/// Edge `i` joins corners `i` and `(i + 1) % 3`
	pub sharp: [bool; 3],
}

/// Plain reconstructed mesh, ready for a host scene builder.
#[derive(Clone, Debug)]
pub struct BuiltMesh {
	pub name: String,
	pub vertices: Vec<BuiltVertex>,
	pub faces: Vec<BuiltFace>,
}

/// How the per-face smoothing integer is interpreted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmoothingRegime {
	/// A bit per edge marks a hard edge; all-ones facets the whole face
	Mask,
	/// Faces sharing an edge are smooth iff their groups are equal and
	/// non-zero
	Group,
}

impl SmoothingRegime {
	fn of(mesh: &RawMesh) -> SmoothingRegime {
		if mesh.flags.contains(MeshFlags::SG_MASK) {
			SmoothingRegime::Mask
		} else {
			SmoothingRegime::Group
		}
	}
}

#[cfg(feature = "import")]
#[derive(Clone, Debug)]
struct CornerAttrs {
	uv: Vec2,
	weights: Vec<(u32, f32)>,
}

/// Identity of one reconstructed vertex. Weight values participate as
/// raw bit patterns so the key stays hashable; the bucket level is the
/// duplicate-face escape valve.
type VertexKey = (u32, Vec<(u32, u32)>, u32);

#[cfg(feature = "import")]
fn corner_attrs(mesh: &RawMesh, vmref: u32) -> Result<CornerAttrs, ObjectImportError> {
	let slot = mesh
		.vmrefs
		.get(vmref as usize)
		.ok_or_else(|| ObjectImportError::Malformed(format!("vmref {} out of range", vmref)))?;

	let mut uv = None;
	let mut weights = vec![];

	for (vmap_index, entry) in slot.iter() {
		let vmap = mesh.vmaps.get(*vmap_index as usize).ok_or_else(|| {
			ObjectImportError::Malformed(format!("vmap index {} out of range", vmap_index))
		})?;

		let missing = || {
			ObjectImportError::Malformed(format!(
				"vmap {:?} entry {} out of range",
				vmap.name, entry
			))
		};

		match &vmap.data {
			VMapData::Uv(values) => {
				if uv.is_none() {
					uv = Some(*values.get(*entry as usize).ok_or_else(missing)?);
				}
			},
			VMapData::Weight(values) => {
				weights.push((*vmap_index, *values.get(*entry as usize).ok_or_else(missing)?));
			},
		}
	}

	weights.sort_by_key(|(vmap_index, _)| *vmap_index);
	Ok(CornerAttrs {
		uv: uv.unwrap_or(Vec2::new(0.0, 0.0)),
		weights: weights,
	})
}

#[cfg(feature = "import")]
fn weight_bits(weights: &[(u32, f32)]) -> Vec<(u32, u32)> {
	weights
		.iter()
		.map(|(vmap, value)| (*vmap, value.to_bits()))
		.collect()
}

/// Rebuilds an in-memory mesh from the raw container: resolves vmap
/// references per corner, merges vertices that share identity, resolves
/// duplicate/degenerate faces through the bucket chain and reconciles
/// smoothing groups into per-edge hard flags.
#[cfg(feature = "import")]
pub fn rebuild(mesh: &RawMesh, diag: &mut Diagnostics) -> Result<BuiltMesh, ObjectImportError> {
	let split_by_weights = mesh
		.vmaps
		.iter()
		.any(|vmap| matches!(vmap.data, VMapData::Weight(_)));

	// face index -> surface index
	let mut surface_of = vec![None; mesh.faces.len()];
	for (surface, list) in mesh.surfaces.iter().enumerate() {
		for face in list.faces.iter() {
			if let Some(slot) = surface_of.get_mut(*face as usize) {
				*slot = Some(surface);
			}
		}
	}

	let sharp = reconcile_smoothing(mesh);

	let mut vertices: Vec<BuiltVertex> = vec![];
	let mut faces = Vec::with_capacity(mesh.faces.len());
	let mut cache: HashMap<VertexKey, usize> = HashMap::new();
	let mut seen: HashSet<[usize; 3]> = HashSet::new();
	let mut bucket_vertices = 0;

	for (face_index, face) in mesh.faces.iter().enumerate() {
		let mut attrs = Vec::with_capacity(3);
		for corner in 0..3 {
			if face.verts[corner] as usize >= mesh.vertices.len() {
				return Err(ObjectImportError::Malformed(format!(
					"face {} vertex {} out of range",
					face_index, face.verts[corner]
				)));
			}
			attrs.push(corner_attrs(mesh, face.refs[corner])?);
		}

		let mut bucket = 0;
		let resolved = loop {
			let keys: Vec<VertexKey> = (0..3)
				.map(|corner| {
					let weights = if split_by_weights {
						weight_bits(&attrs[corner].weights)
					} else {
						vec![]
					};
					(face.verts[corner], weights, bucket)
				})
				.collect();

			let distinct = keys[0] != keys[1] && keys[0] != keys[2] && keys[1] != keys[2];
			let duplicate = distinct && {
				match (cache.get(&keys[0]), cache.get(&keys[1]), cache.get(&keys[2])) {
					(Some(a), Some(b), Some(c)) => {
						let mut triple = [*a, *b, *c];
						triple.sort_unstable();
						seen.contains(&triple)
					},
					// a fresh vertex always makes the face unique
					_ => false,
				}
			};

			if distinct && !duplicate {
				break keys;
			}

			bucket += 1;
			if bucket > BUCKET_LIMIT {
				return Err(ObjectImportError::TooManyDuplicateFaces {
					mesh: mesh.name.clone(),
				});
			}
		};

		let mut indices = [0; 3];
		for corner in 0..3 {
			let key = resolved[corner].clone();
			let index = *cache.entry(key).or_insert_with(|| {
				if bucket > 0 {
					bucket_vertices += 1;
				}
				let raw = face.verts[corner] as usize;
				vertices.push(BuiltVertex {
					position: mesh.vertices[raw],
					raw_index: face.verts[corner],
					weights: attrs[corner]
						.weights
						.iter()
						.map(|(vmap, value)| (mesh.vmaps[*vmap as usize].name.clone(), *value))
						.collect(),
					uv: None,
				});
				vertices.len() - 1
			});
			indices[corner] = index;
		}

		let mut triple = indices;
		triple.sort_unstable();
		seen.insert(triple);

		faces.push(BuiltFace {
			verts: indices,
			uvs: [attrs[0].uv, attrs[1].uv, attrs[2].uv],
			surface: surface_of[face_index],
			sharp: sharp[face_index],
		});
	}

	if bucket_vertices > 0 {
		diag.warn_once(Warning::DuplicateFaceBuckets {
			mesh: mesh.name.clone(),
			count: bucket_vertices,
		});
	}

	Ok(BuiltMesh {
		name: mesh.name.clone(),
		vertices: vertices,
		faces: faces,
	})
}

/// Folds the per-face smoothing integers into per-edge hard flags.
/// Absent groups mean the legacy format, where everything is smooth.
#[cfg(feature = "import")]
fn reconcile_smoothing(mesh: &RawMesh) -> Vec<[bool; 3]> {
	let groups = match &mesh.smoothing_groups {
		Some(groups) => groups,
		None => return vec![[false; 3]; mesh.faces.len()],
	};

	let mut sharp = vec![[false; 3]; mesh.faces.len()];

	match SmoothingRegime::of(mesh) {
		SmoothingRegime::Mask => {
			// an edge is hard if either adjacent face marks it
			let mut hard: HashSet<(u32, u32)> = HashSet::new();
			for (face, group) in mesh.faces.iter().zip(groups.iter()) {
				for edge in 0..3 {
					let faceted = *group == u32::MAX;
					if faceted || group & (1 << edge) != 0 {
						hard.insert(edge_key(face.verts[edge], face.verts[(edge + 1) % 3]));
					}
				}
			}

			for (face_index, face) in mesh.faces.iter().enumerate() {
				let faceted = groups[face_index] == u32::MAX;
				for edge in 0..3 {
					let key = edge_key(face.verts[edge], face.verts[(edge + 1) % 3]);
					sharp[face_index][edge] = faceted || hard.contains(&key);
				}
			}
		},
		SmoothingRegime::Group => {
			let mut edges: HashMap<(u32, u32), Vec<u32>> = HashMap::new();
			for (face, group) in mesh.faces.iter().zip(groups.iter()) {
				for edge in 0..3 {
					edges
						.entry(edge_key(face.verts[edge], face.verts[(edge + 1) % 3]))
						.or_default()
						.push(*group);
				}
			}

			for (face_index, face) in mesh.faces.iter().enumerate() {
				let own = groups[face_index];
				for edge in 0..3 {
					let key = edge_key(face.verts[edge], face.verts[(edge + 1) % 3]);
					let shared = &edges[&key];
					sharp[face_index][edge] = shared.len() > 1
						&& shared.iter().any(|group| *group != own || *group == 0);
				}
			}
		},
	}

	sharp
}

#[cfg(feature = "import")]
fn edge_key(a: u32, b: u32) -> (u32, u32) {
	if a < b {
		(a, b)
	} else {
		(b, a)
	}
}

/// Computes one smoothing integer per face from the per-edge hard
/// flags, in the given regime. The group regime cannot express every
/// hard-edge configuration the mask regime can; unsatisfiable inputs
/// are encoded best-effort and reported.
pub fn smoothing_groups(
	mesh: &BuiltMesh,
	regime: SmoothingRegime,
	diag: &mut Diagnostics,
) -> Vec<u32> {
	match regime {
		SmoothingRegime::Mask => mesh
			.faces
			.iter()
			.map(|face| {
				if face.sharp.iter().all(|hard| *hard) {
					u32::MAX
				} else {
					face.sharp
						.iter()
						.enumerate()
						.map(|(edge, hard)| (*hard as u32) << edge)
						.sum()
				}
			})
			.collect(),
		SmoothingRegime::Group => {
			// faces sharing a smooth edge must land in one component
			let mut edges: HashMap<(usize, usize), Vec<(usize, bool)>> = HashMap::new();
			for (face_index, face) in mesh.faces.iter().enumerate() {
				for edge in 0..3 {
					let a = face.verts[edge];
					let b = face.verts[(edge + 1) % 3];
					let key = if a < b { (a, b) } else { (b, a) };
					edges.entry(key).or_default().push((face_index, face.sharp[edge]));
				}
			}

			let mut component = vec![usize::MAX; mesh.faces.len()];
			let mut next = 0u32;
			let mut groups = vec![0u32; mesh.faces.len()];

			for start in 0..mesh.faces.len() {
				if component[start] != usize::MAX {
					continue;
				}

				next += 1;
				let mut stack = vec![start];
				component[start] = start;
				while let Some(face) = stack.pop() {
					groups[face] = next;
					for edge in 0..3 {
						let a = mesh.faces[face].verts[edge];
						let b = mesh.faces[face].verts[(edge + 1) % 3];
						let key = if a < b { (a, b) } else { (b, a) };
						for (neighbour, hard) in edges[&key].iter() {
							if !hard && component[*neighbour] == usize::MAX {
								component[*neighbour] = start;
								stack.push(*neighbour);
							}
						}
					}
				}
			}

			// a hard edge inside one component cannot be expressed
			let unsatisfiable = edges.values().any(|shared| {
				shared.iter().any(|(face, hard)| {
					*hard && shared
						.iter()
						.any(|(other, _)| other != face && component[*other] == component[*face])
				})
			});
			if unsatisfiable {
				diag.warn_once(Warning::SmoothingNotRepresentable {
					mesh: mesh.name.clone(),
				});
			}

			groups
		},
	}
}

impl BuiltMesh {
	/// Splits vertices so every output vertex carries exactly one UV.
	/// A vertex referenced with two different per-corner UVs becomes two
	/// vertices sharing a position.
	pub fn split_corners(&self) -> BuiltMesh {
		let mut cache: HashMap<(usize, (u32, u32)), usize> = HashMap::new();
		let mut vertices = vec![];
		let mut faces = Vec::with_capacity(self.faces.len());

		for face in self.faces.iter() {
			let mut verts = [0; 3];
			for corner in 0..3 {
				let uv = face.uvs[corner];
				let key = (face.verts[corner], (uv.x.to_bits(), uv.y.to_bits()));
				verts[corner] = *cache.entry(key).or_insert_with(|| {
					let mut vertex = self.vertices[face.verts[corner]].clone();
					vertex.uv = Some(uv);
					vertices.push(vertex);
					vertices.len() - 1
				});
			}

			faces.push(BuiltFace {
				verts: verts,
				..face.clone()
			});
		}

		BuiltMesh {
			name: self.name.clone(),
			vertices: vertices,
			faces: faces,
		}
	}
}
