use bitflags::bitflags;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use xrf_core::{
	chunk::{
		ChunkIter,
		ChunkWriter
	},
	diag::Diagnostics,
	io_ext::{
		ReadXrExt,
		WriteXrExt
	},
	skeleton::{
		Skeleton,
		SkeletonError
	}
};

use crate::{
	bone::{
		build_skeleton,
		Bone
	},
	mesh::RawMesh
};

/// The only supported object container version
pub const VERSION: u16 = 0x10;

pub mod chunks {
	pub const BODY: u32 = 0x7777;

	pub const VERSION: u32 = 0x0900;
	pub const FLAGS: u32 = 0x0903;
	pub const SURFACES: u32 = 0x0907;
	pub const MESHES: u32 = 0x0910;
	pub const USERDATA: u32 = 0x0912;
	pub const LOD_REF: u32 = 0x0915;
	pub const REVISION: u32 = 0x0918;
	pub const BONES_LEGACY: u32 = 0x0921;
	pub const BONES: u32 = 0x0922;
}

bitflags! {
	#[derive(Default)]
	pub struct ObjectFlags: u32 {
		const DYNAMIC = 1 << 0;
		const PROGRESSIVE = 1 << 1;
		const USING_LOD = 1 << 2;
		const HQ_EXPORT = 1 << 3;
		const MULTIPLE_USAGE = 1 << 4;
	}
}

/// Material slot shared by every mesh in the object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Surface {
	pub name: String,
	pub engine_shader: String,
	pub compiler_shader: String,
	pub game_material: String,
	pub texture: String,
	pub vmap: String,
	pub flags: u32,
	pub fvf: u32,
	pub uv_count: u32,
}

/// Authoring bookkeeping carried along in the file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Revision {
	pub owner: String,
	pub created: u32,
	pub modifier: String,
	pub modified: u32,
}

/// A complete decoded object file: material slots, mesh containers and
/// the optional skeleton.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Object {
	pub flags: ObjectFlags,
	pub surfaces: Vec<Surface>,
	pub meshes: Vec<RawMesh>,
	pub bones: Vec<Bone>,
	pub userdata: Option<String>,
	pub lod_reference: Option<String>,
	pub revision: Option<Revision>,
}

impl Object {
	#[cfg(feature = "import")]
	pub fn read(data: &[u8], diag: &mut Diagnostics) -> Result<Object, import::ObjectImportError> {
		use import::ObjectImportError;

		let mut outer = ChunkIter::new(data);
		let body = outer.expect(chunks::BODY)?;

		let mut iter = ChunkIter::new(body);
		let version_data = iter.expect(chunks::VERSION)?;
		let version = version_data.as_ref().read_u16::<LE>()?;
		if version != VERSION {
			return Err(ObjectImportError::ObjectVersion(version));
		}

		let mut object = Object::default();
		for chunk in iter {
			let chunk = chunk?;
			let mut buf = std::io::Cursor::new(chunk.data);

			match chunk.id {
				chunks::FLAGS => {
					object.flags = ObjectFlags::from_bits_truncate(buf.read_u32::<LE>()?);
				},
				chunks::SURFACES => {
					let count = buf.read_u32::<LE>()? as usize;
					for _ in 0..count {
						object.surfaces.push(Surface {
							name: buf.read_cstr()?,
							engine_shader: buf.read_cstr()?,
							compiler_shader: buf.read_cstr()?,
							game_material: buf.read_cstr()?,
							texture: buf.read_cstr()?,
							vmap: buf.read_cstr()?,
							flags: buf.read_u32::<LE>()?,
							fvf: buf.read_u32::<LE>()?,
							uv_count: buf.read_u32::<LE>()?,
						});
					}
				},
				chunks::MESHES => {
					for mesh in ChunkIter::new(chunk.data) {
						object.meshes.push(RawMesh::read(mesh?.data)?);
					}
				},
				chunks::BONES => {
					for bone in ChunkIter::new(chunk.data) {
						object.bones.push(Bone::read(bone?.data, diag)?);
					}
				},
				chunks::BONES_LEGACY => {
					let count = buf.read_u32::<LE>()? as usize;
					for _ in 0..count {
						object.bones.push(Bone::read_legacy(&mut buf)?);
					}
				},
				chunks::USERDATA => object.userdata = Some(buf.read_cstr()?),
				chunks::LOD_REF => object.lod_reference = Some(buf.read_cstr()?),
				chunks::REVISION => {
					object.revision = Some(Revision {
						owner: buf.read_cstr()?,
						created: buf.read_u32::<LE>()?,
						modifier: buf.read_cstr()?,
						modified: buf.read_u32::<LE>()?,
					});
				},
				other => log::debug!("object: unhandled chunk {:#X}", other),
			}
		}

		for (i, bone) in object.bones.iter().enumerate() {
			if object.bones[..i]
				.iter()
				.any(|other| other.name.eq_ignore_ascii_case(&bone.name))
			{
				return Err(SkeletonError::DuplicateBone(bone.name.clone()).into());
			}
		}

		Ok(object)
	}

	#[cfg(feature = "export")]
	pub fn write(&self) -> Result<Vec<u8>, export::ObjectExportError> {
		let mut writer = ChunkWriter::new();
		writer.put(chunks::VERSION, &VERSION.to_le_bytes());
		writer.put(chunks::FLAGS, &self.flags.bits().to_le_bytes());

		let mut body = vec![];
		body.write_u32::<LE>(self.surfaces.len() as u32)?;
		for surface in self.surfaces.iter() {
			body.write_cstr(&surface.name)?;
			body.write_cstr(&surface.engine_shader)?;
			body.write_cstr(&surface.compiler_shader)?;
			body.write_cstr(&surface.game_material)?;
			body.write_cstr(&surface.texture)?;
			body.write_cstr(&surface.vmap)?;
			body.write_u32::<LE>(surface.flags)?;
			body.write_u32::<LE>(surface.fvf)?;
			body.write_u32::<LE>(surface.uv_count)?;
		}
		writer.put(chunks::SURFACES, &body);

		let mut meshes = ChunkWriter::new();
		for (i, mesh) in self.meshes.iter().enumerate() {
			meshes.put(i as u32, &mesh.write()?);
		}
		writer.put(chunks::MESHES, &meshes.into_vec());

		if !self.bones.is_empty() {
			let mut bones = ChunkWriter::new();
			for (i, bone) in self.bones.iter().enumerate() {
				bones.put(i as u32, &bone.write()?);
			}
			writer.put(chunks::BONES, &bones.into_vec());
		}

		if let Some(userdata) = &self.userdata {
			let mut body = vec![];
			body.write_cstr(userdata)?;
			writer.put(chunks::USERDATA, &body);
		}

		if let Some(reference) = &self.lod_reference {
			let mut body = vec![];
			body.write_cstr(reference)?;
			writer.put(chunks::LOD_REF, &body);
		}

		if let Some(revision) = &self.revision {
			let mut body = vec![];
			body.write_cstr(&revision.owner)?;
			body.write_u32::<LE>(revision.created)?;
			body.write_cstr(&revision.modifier)?;
			body.write_u32::<LE>(revision.modified)?;
			writer.put(chunks::REVISION, &body);
		}

		let mut outer = ChunkWriter::new();
		outer.put(chunks::BODY, &writer.into_vec());
		Ok(outer.into_vec())
	}

	/// Resolves the decoded bone list into a bind-pose arena.
	pub fn skeleton(&self) -> Result<Skeleton, SkeletonError> {
		build_skeleton(&self.bones)
	}
}

#[cfg(feature = "import")]
pub mod import {
	use thiserror::Error;

	use xrf_core::{
		chunk::ChunkError,
		skeleton::SkeletonError
	};

	#[derive(Error, Debug)]
	pub enum ObjectImportError {
		#[error("Bone version {0:#X} is not supported")]
		BoneVersion(u16),
		#[error("Chunk error")]
		Chunk {
			#[from]
			source: ChunkError,
		},
		#[error("I/O error")]
		IO {
			#[from]
			source: std::io::Error,
		},
		#[error("Malformed container: {0}")]
		Malformed(String),
		#[error("Mesh version {0:#X} is not supported")]
		MeshVersion(u16),
		#[error("Required chunk missing: {0}")]
		MissingChunk(&'static str),
		#[error("Object version {0:#X} is not supported")]
		ObjectVersion(u16),
		#[error("Skeleton validation failed")]
		Skeleton {
			#[from]
			source: SkeletonError,
		},
		#[error("Mesh {mesh:?}: vertex reconstruction exceeded the duplicate-face retry bound")]
		TooManyDuplicateFaces {
			mesh: String,
		},
		#[error("Unsupported vmap kind {0} with dimension {1}")]
		VMapKind(u8, u8),
	}
}

#[cfg(feature = "export")]
pub mod export {
	use thiserror::Error;

	use xrf_core::io_ext::StringError;

	#[derive(Error, Debug)]
	pub enum ObjectExportError {
		#[error("I/O error")]
		IO {
			#[from]
			source: std::io::Error,
		},
		#[error("Mesh {mesh:?} has no UV map")]
		MissingUvMap {
			mesh: String,
		},
		#[error("Mesh {mesh:?} references no surface")]
		NoSurface {
			mesh: String,
		},
		#[error("String encoding error")]
		String {
			#[from]
			source: StringError,
		},
	}
}
