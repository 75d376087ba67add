use bitflags::bitflags;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use ultraviolet::vec::{
	Vec2,
	Vec3
};

use xrf_core::{
	chunk::{
		ChunkIter,
		ChunkWriter
	},
	io_ext::{
		ReadXrExt,
		WriteXrExt
	}
};

#[cfg(feature = "import")]
use crate::object::import::ObjectImportError;

#[cfg(feature = "export")]
use crate::object::export::ObjectExportError;

/// The only supported mesh container version
pub const VERSION: u16 = 0x11;

pub mod chunks {
	pub const VERSION: u32 = 0x1000;
	pub const MESH_NAME: u32 = 0x1001;
	pub const FLAGS: u32 = 0x1002;
	pub const BBOX: u32 = 0x1004;
	pub const VERTS: u32 = 0x1005;
	pub const FACES: u32 = 0x1006;
	pub const VMREFS: u32 = 0x1008;
	pub const SFACE: u32 = 0x1009;
	pub const VMAPS_OLD: u32 = 0x1012;
	pub const SG: u32 = 0x1013;
	pub const VMAPS: u32 = 0x1024;
}

bitflags! {
	pub struct MeshFlags: u8 {
		const VISIBLE = 1;
		const LOCKED = 2;
		/// Smoothing groups are edge bit masks instead of group ids
		const SG_MASK = 4;
	}
}

/// Three vertex indices interleaved on disk with three vmap-reference
/// indices, one pair per corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawFace {
	pub verts: [u32; 3],
	pub refs: [u32; 3],
}

/// Face indices belonging to one named surface (material slot).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceFaces {
	pub name: String,
	pub faces: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum VMapData {
	/// Two floats per entry
	Uv(Vec<Vec2>),
	/// One float per entry
	Weight(Vec<f32>),
}

impl VMapData {
	pub fn len(&self) -> usize {
		match self {
			VMapData::Uv(values) => values.len(),
			VMapData::Weight(values) => values.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn dimension(&self) -> u8 {
		match self {
			VMapData::Uv(_) => 2,
			VMapData::Weight(_) => 1,
		}
	}

	fn kind(&self) -> u8 {
		match self {
			VMapData::Uv(_) => 0,
			VMapData::Weight(_) => 1,
		}
	}
}

/// A named per-vertex or per-corner data channel. `vertices` maps every
/// entry back to its raw vertex; discontinuous maps additionally map
/// entries to the face that owns the variant.
#[derive(Clone, Debug, PartialEq)]
pub struct VMap {
	pub name: String,
	pub data: VMapData,
	pub discontinuous: bool,
	pub vertices: Vec<u32>,
	pub faces: Option<Vec<u32>>,
}

/// One decoded mesh container. Face corners resolve their vmap entries
/// through `vmrefs`: `refs[corner]` indexes this table, each slot
/// holding `(vmap index, entry index)` pairs.
#[derive(Clone, Debug, PartialEq)]
pub struct RawMesh {
	pub name: String,
	pub flags: MeshFlags,
	pub bbox: Option<(Vec3, Vec3)>,
	pub vertices: Vec<Vec3>,
	pub faces: Vec<RawFace>,
	/// Absent in the legacy format, which renders everything smooth
	pub smoothing_groups: Option<Vec<u32>>,
	pub surfaces: Vec<SurfaceFaces>,
	pub vmrefs: Vec<Vec<(u32, u32)>>,
	pub vmaps: Vec<VMap>,
}

impl RawMesh {
	#[cfg(feature = "import")]
	pub fn read(data: &[u8]) -> Result<RawMesh, ObjectImportError> {
		let mut iter = ChunkIter::new(data);

		let version_data = iter.expect(chunks::VERSION)?;
		let version = version_data.as_ref().read_u16::<LE>()?;
		if version != VERSION {
			return Err(ObjectImportError::MeshVersion(version));
		}

		let mut name = String::new();
		let mut flags = MeshFlags::VISIBLE;
		let mut bbox = None;
		let mut vertices = None;
		let mut faces: Option<Vec<RawFace>> = None;
		let mut smoothing_groups = None;
		let mut surfaces = vec![];
		let mut vmrefs = None;
		let mut vmaps = vec![];

		for chunk in iter {
			let chunk = chunk?;
			let mut buf = std::io::Cursor::new(chunk.data);

			match chunk.id {
				chunks::MESH_NAME => name = buf.read_cstr()?,
				chunks::FLAGS => flags = MeshFlags::from_bits_truncate(buf.read_u8()?),
				chunks::BBOX => {
					bbox = Some((buf.read_vec3_swapped()?, buf.read_vec3_swapped()?));
				},
				chunks::VERTS => {
					let count = buf.read_u32::<LE>()? as usize;
					let mut verts = Vec::with_capacity(count);
					for _ in 0..count {
						verts.push(buf.read_vec3_swapped()?);
					}
					vertices = Some(verts);
				},
				chunks::FACES => {
					let count = buf.read_u32::<LE>()? as usize;
					let mut list = Vec::with_capacity(count);
					for _ in 0..count {
						let mut face = RawFace {
							verts: [0; 3],
							refs: [0; 3],
						};
						for corner in 0..3 {
							face.verts[corner] = buf.read_u32::<LE>()?;
							face.refs[corner] = buf.read_u32::<LE>()?;
						}
						list.push(face);
					}
					faces = Some(list);
				},
				chunks::SG => {
					let count = chunk.data.len() / 4;
					let mut groups = Vec::with_capacity(count);
					for _ in 0..count {
						groups.push(buf.read_u32::<LE>()?);
					}
					smoothing_groups = Some(groups);
				},
				chunks::SFACE => {
					let count = buf.read_u16::<LE>()? as usize;
					for _ in 0..count {
						let surface = buf.read_cstr()?;
						let faces = buf.read_u32::<LE>()? as usize;
						let mut list = Vec::with_capacity(faces);
						for _ in 0..faces {
							list.push(buf.read_u32::<LE>()?);
						}
						surfaces.push(SurfaceFaces {
							name: surface,
							faces: list,
						});
					}
				},
				chunks::VMREFS => {
					let count = buf.read_u32::<LE>()? as usize;
					let mut refs = Vec::with_capacity(count);
					for _ in 0..count {
						let entries = buf.read_u8()? as usize;
						// single-reference entries dominate real data
						let mut slot = Vec::with_capacity(entries.max(1));
						for _ in 0..entries {
							slot.push((buf.read_u32::<LE>()?, buf.read_u32::<LE>()?));
						}
						refs.push(slot);
					}
					vmrefs = Some(refs);
				},
				chunks::VMAPS => {
					let count = buf.read_u32::<LE>()? as usize;
					for _ in 0..count {
						vmaps.push(VMap::read(&mut buf, true)?);
					}
				},
				chunks::VMAPS_OLD => {
					let count = buf.read_u32::<LE>()? as usize;
					for _ in 0..count {
						vmaps.push(VMap::read(&mut buf, false)?);
					}
				},
				other => log::debug!("mesh {:?}: unhandled chunk {:#X}", name, other),
			}
		}

		let faces = faces.ok_or(ObjectImportError::MissingChunk("faces"))?;
		if let Some(groups) = &smoothing_groups {
			if groups.len() != faces.len() {
				return Err(ObjectImportError::Malformed(
					"smoothing group count does not match face count".to_string(),
				));
			}
		}

		Ok(RawMesh {
			name: name,
			flags: flags,
			bbox: bbox,
			vertices: vertices.ok_or(ObjectImportError::MissingChunk("vertices"))?,
			faces: faces,
			smoothing_groups: smoothing_groups,
			surfaces: surfaces,
			vmrefs: vmrefs.ok_or(ObjectImportError::MissingChunk("vmrefs"))?,
			vmaps: vmaps,
		})
	}

	#[cfg(feature = "export")]
	pub fn write(&self) -> Result<Vec<u8>, ObjectExportError> {
		let mut writer = ChunkWriter::new();
		writer.put(chunks::VERSION, &VERSION.to_le_bytes());

		let mut body = vec![];
		body.write_cstr(&self.name)?;
		writer.put(chunks::MESH_NAME, &body);

		if let Some((min, max)) = self.bbox {
			let mut body = vec![];
			body.write_vec3_swapped(min)?;
			body.write_vec3_swapped(max)?;
			writer.put(chunks::BBOX, &body);
		}

		writer.put(chunks::FLAGS, &[self.flags.bits()]);

		let mut body = vec![];
		body.write_u32::<LE>(self.vertices.len() as u32)?;
		for vertex in self.vertices.iter() {
			body.write_vec3_swapped(*vertex)?;
		}
		writer.put(chunks::VERTS, &body);

		let mut body = vec![];
		body.write_u32::<LE>(self.faces.len() as u32)?;
		for face in self.faces.iter() {
			for corner in 0..3 {
				body.write_u32::<LE>(face.verts[corner])?;
				body.write_u32::<LE>(face.refs[corner])?;
			}
		}
		writer.put(chunks::FACES, &body);

		if let Some(groups) = &self.smoothing_groups {
			let mut body = vec![];
			for group in groups.iter() {
				body.write_u32::<LE>(*group)?;
			}
			writer.put(chunks::SG, &body);
		}

		let mut body = vec![];
		body.write_u32::<LE>(self.vmrefs.len() as u32)?;
		for slot in self.vmrefs.iter() {
			body.write_u8(slot.len() as u8)?;
			for (vmap, entry) in slot.iter() {
				body.write_u32::<LE>(*vmap)?;
				body.write_u32::<LE>(*entry)?;
			}
		}
		writer.put(chunks::VMREFS, &body);

		let mut body = vec![];
		body.write_u16::<LE>(self.surfaces.len() as u16)?;
		for surface in self.surfaces.iter() {
			body.write_cstr(&surface.name)?;
			body.write_u32::<LE>(surface.faces.len() as u32)?;
			for face in surface.faces.iter() {
				body.write_u32::<LE>(*face)?;
			}
		}
		writer.put(chunks::SFACE, &body);

		let mut body = vec![];
		body.write_u32::<LE>(self.vmaps.len() as u32)?;
		for vmap in self.vmaps.iter() {
			vmap.write(&mut body)?;
		}
		writer.put(chunks::VMAPS, &body);

		Ok(writer.into_vec())
	}

	/// Looks up a vmap by name, case-insensitively.
	pub fn vmap(&self, name: &str) -> Option<&VMap> {
		self.vmaps
			.iter()
			.find(|vmap| vmap.name.eq_ignore_ascii_case(name))
	}
}

impl VMap {
	#[cfg(feature = "import")]
	fn read<R>(buf: &mut R, modern: bool) -> Result<VMap, ObjectImportError>
	where
		R: ReadBytesExt,
	{
		let name = buf.read_cstr()?;
		let dimension = buf.read_u8()?;
		let discontinuous = if modern { buf.read_u8()? != 0 } else { false };
		let kind = buf.read_u8()?;
		let count = buf.read_u32::<LE>()? as usize;

		let data = match (kind, dimension) {
			(0, 2) => {
				let mut values = Vec::with_capacity(count);
				for _ in 0..count {
					values.push(buf.read_vec2()?);
				}
				VMapData::Uv(values)
			},
			(1, 1) => {
				let mut values = Vec::with_capacity(count);
				for _ in 0..count {
					values.push(buf.read_f32::<LE>()?);
				}
				VMapData::Weight(values)
			},
			_ => return Err(ObjectImportError::VMapKind(kind, dimension)),
		};

		let mut vertices = Vec::with_capacity(count);
		for _ in 0..count {
			vertices.push(buf.read_u32::<LE>()?);
		}

		let faces = if modern && discontinuous {
			let mut faces = Vec::with_capacity(count);
			for _ in 0..count {
				faces.push(buf.read_u32::<LE>()?);
			}
			Some(faces)
		} else {
			None
		};

		Ok(VMap {
			name: name,
			data: data,
			discontinuous: discontinuous,
			vertices: vertices,
			faces: faces,
		})
	}

	#[cfg(feature = "export")]
	fn write<W>(&self, buf: &mut W) -> Result<(), ObjectExportError>
	where
		W: WriteBytesExt,
	{
		buf.write_cstr(&self.name)?;
		buf.write_u8(self.data.dimension())?;
		buf.write_u8(self.discontinuous as u8)?;
		buf.write_u8(self.data.kind())?;
		buf.write_u32::<LE>(self.data.len() as u32)?;

		match &self.data {
			VMapData::Uv(values) => {
				for value in values.iter() {
					buf.write_vec2(*value)?;
				}
			},
			VMapData::Weight(values) => {
				for value in values.iter() {
					buf.write_f32::<LE>(*value)?;
				}
			},
		}

		for vertex in self.vertices.iter() {
			buf.write_u32::<LE>(*vertex)?;
		}

		if let Some(faces) = &self.faces {
			for face in faces.iter() {
				buf.write_u32::<LE>(*face)?;
			}
		}

		Ok(())
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	/// A unit quad: 4 vertices, 2 triangles, one continuous UV map.
	pub(crate) fn quad_mesh(smoothing_groups: Option<Vec<u32>>) -> RawMesh {
		RawMesh {
			name: "quad".to_string(),
			flags: MeshFlags::VISIBLE | MeshFlags::SG_MASK,
			bbox: Some((Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 1.0))),
			vertices: vec![
				Vec3::new(0.0, 0.0, 0.0),
				Vec3::new(1.0, 0.0, 0.0),
				Vec3::new(1.0, 0.0, 1.0),
				Vec3::new(0.0, 0.0, 1.0),
			],
			faces: vec![
				RawFace {
					verts: [0, 1, 2],
					refs: [0, 1, 2],
				},
				RawFace {
					verts: [0, 2, 3],
					refs: [0, 2, 3],
				},
			],
			smoothing_groups: smoothing_groups,
			surfaces: vec![SurfaceFaces {
				name: "default".to_string(),
				faces: vec![0, 1],
			}],
			vmrefs: vec![
				vec![(0, 0)],
				vec![(0, 1)],
				vec![(0, 2)],
				vec![(0, 3)],
			],
			vmaps: vec![VMap {
				name: "uv".to_string(),
				data: VMapData::Uv(vec![
					Vec2::new(0.0, 0.0),
					Vec2::new(1.0, 0.0),
					Vec2::new(1.0, 1.0),
					Vec2::new(0.0, 1.0),
				]),
				discontinuous: false,
				vertices: vec![0, 1, 2, 3],
				faces: None,
			}],
		}
	}

	#[test]
	fn test_mesh_round_trip() {
		let mesh = quad_mesh(Some(vec![0, 0]));
		let data = mesh.write().unwrap();
		let back = RawMesh::read(&data).unwrap();
		assert_eq!(back, mesh);
	}

	#[test]
	fn test_legacy_mesh_has_no_smoothing_groups() {
		let mesh = quad_mesh(None);
		let data = mesh.write().unwrap();
		let back = RawMesh::read(&data).unwrap();
		assert_eq!(back.smoothing_groups, None);
	}

	#[test]
	fn test_version_must_lead() {
		let mesh = quad_mesh(None);
		let data = mesh.write().unwrap();

		// strip the leading version chunk; the next chunk id differs
		let stripped = &data[8 + 2..];
		assert!(RawMesh::read(stripped).is_err());
	}

	#[test]
	fn test_unsupported_version_is_fatal() {
		let mut writer = ChunkWriter::new();
		writer.put(chunks::VERSION, &0x12u16.to_le_bytes());
		let data = writer.into_vec();

		match RawMesh::read(&data) {
			Err(ObjectImportError::MeshVersion(0x12)) => {},
			other => panic!("expected version error, got {:?}", other.err()),
		}
	}

	#[test]
	fn test_weight_vmap_round_trip() {
		let mut mesh = quad_mesh(None);
		mesh.vmaps.push(VMap {
			name: "left_arm".to_string(),
			data: VMapData::Weight(vec![0.25, 0.75]),
			discontinuous: false,
			vertices: vec![0, 1],
			faces: None,
		});
		mesh.vmrefs[0].push((1, 0));
		mesh.vmrefs[1].push((1, 1));

		let data = mesh.write().unwrap();
		let back = RawMesh::read(&data).unwrap();
		assert_eq!(back, mesh);
		assert!(back.vmap("LEFT_ARM").is_some());
	}
}
