use std::collections::HashMap;
use std::rc::Rc;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use ultraviolet::vec::Vec3;

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

use crate::{
	geom::{
		IndexBuffer,
		SlidingWindows
	},
	vbuf::{
		LevelVertex,
		VertexBuffer,
		VertexFormat
	},
	visual::{
		GeomRef,
		Visual
	}
};

/// The only supported level header version
pub const VERSION: u16 = 13;

pub mod chunks {
	pub const HEADER: u32 = 0x1;
	pub const SHADERS: u32 = 0x2;
	pub const VISUALS: u32 = 0x3;
	pub const PORTALS: u32 = 0x4;
	pub const LIGHT_DYNAMIC: u32 = 0x6;
	pub const VB: u32 = 0x9;
	pub const IB: u32 = 0xA;
	pub const SWIS: u32 = 0xB;
}

/// Separator between sector cells
#[derive(Clone, Debug, PartialEq)]
pub struct Portal {
	pub sector_front: u16,
	pub sector_back: u16,
	pub vertices: Vec<Vec3>,
}

/// D3D-shaped dynamic light source
#[derive(Clone, Debug, PartialEq)]
pub struct Light {
	pub kind: u32,
	pub diffuse: [f32; 4],
	pub specular: [f32; 4],
	pub ambient: [f32; 4],
	pub position: Vec3,
	pub direction: Vec3,
	pub range: f32,
	pub falloff: f32,
	pub attenuation: [f32; 3],
	pub theta: f32,
	pub phi: f32,
}

/// The main level file: shader table, render hierarchy, portals and
/// dynamic lights. Geometry buffers live in the sibling geom file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Level {
	pub shaders: Vec<String>,
	pub visuals: Vec<Visual>,
	pub portals: Vec<Portal>,
	pub lights: Vec<Light>,
}

/// The sibling geometry file: shared vertex, index and sliding-window
/// buffers referenced by the level's visuals.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
	pub vertex_buffers: Vec<VertexBuffer>,
	pub index_buffers: Vec<IndexBuffer>,
	pub windows: Vec<SlidingWindows>,
}

impl Level {
	#[cfg(feature = "import")]
	pub fn read(data: &[u8]) -> Result<Level, import::LevelImportError> {
		use import::LevelImportError;

		let mut iter = ChunkIter::new(data);

		let header = iter.expect(chunks::HEADER)?;
		let version = header.as_ref().read_u16::<LE>()?;
		if version != VERSION {
			return Err(LevelImportError::Version(version));
		}

		let mut level = Level::default();
		for chunk in iter {
			let chunk = chunk?;
			let mut buf = std::io::Cursor::new(chunk.data);

			match chunk.id {
				chunks::SHADERS => {
					let count = buf.read_u32::<LE>()? as usize;
					for _ in 0..count {
						level.shaders.push(buf.read_cstr()?);
					}
				},
				chunks::VISUALS => {
					for visual in ChunkIter::new(chunk.data) {
						level.visuals.push(Visual::read(visual?.data)?);
					}
				},
				chunks::PORTALS => {
					let count = buf.read_u32::<LE>()? as usize;
					for _ in 0..count {
						let sector_front = buf.read_u16::<LE>()?;
						let sector_back = buf.read_u16::<LE>()?;
						let vertex_count = buf.read_u32::<LE>()? as usize;
						let mut vertices = Vec::with_capacity(vertex_count);
						for _ in 0..vertex_count {
							vertices.push(buf.read_vec3_swapped()?);
						}
						level.portals.push(Portal {
							sector_front: sector_front,
							sector_back: sector_back,
							vertices: vertices,
						});
					}
				},
				chunks::LIGHT_DYNAMIC => {
					let count = buf.read_u32::<LE>()? as usize;
					for _ in 0..count {
						level.lights.push(read_light(&mut buf)?);
					}
				},
				other => log::debug!("level: unhandled chunk {:#X}", other),
			}
		}

		Ok(level)
	}

	#[cfg(feature = "export")]
	pub fn write(&self) -> Result<Vec<u8>, export::LevelExportError> {
		let mut writer = ChunkWriter::new();
		writer.put(chunks::HEADER, &VERSION.to_le_bytes());

		let mut body = vec![];
		body.write_u32::<LE>(self.shaders.len() as u32)?;
		for shader in self.shaders.iter() {
			body.write_cstr(shader)?;
		}
		writer.put(chunks::SHADERS, &body);

		let mut visuals = ChunkWriter::new();
		for (i, visual) in self.visuals.iter().enumerate() {
			visuals.put(i as u32, &visual.write()?);
		}
		writer.put(chunks::VISUALS, &visuals.into_vec());

		let mut body = vec![];
		body.write_u32::<LE>(self.portals.len() as u32)?;
		for portal in self.portals.iter() {
			body.write_u16::<LE>(portal.sector_front)?;
			body.write_u16::<LE>(portal.sector_back)?;
			body.write_u32::<LE>(portal.vertices.len() as u32)?;
			for vertex in portal.vertices.iter() {
				body.write_vec3_swapped(*vertex)?;
			}
		}
		writer.put(chunks::PORTALS, &body);

		let mut body = vec![];
		body.write_u32::<LE>(self.lights.len() as u32)?;
		for light in self.lights.iter() {
			write_light(&mut body, light)?;
		}
		writer.put(chunks::LIGHT_DYNAMIC, &body);

		Ok(writer.into_vec())
	}
}

impl Geometry {
	#[cfg(feature = "import")]
	pub fn read(data: &[u8]) -> Result<Geometry, import::LevelImportError> {
		let mut geometry = Geometry::default();

		for chunk in ChunkIter::new(data) {
			let chunk = chunk?;
			let mut buf = std::io::Cursor::new(chunk.data);

			match chunk.id {
				chunks::VB => {
					let count = buf.read_u32::<LE>()?;
					for _ in 0..count {
						geometry.vertex_buffers.push(VertexBuffer::read(&mut buf)?);
					}
				},
				chunks::IB => {
					let count = buf.read_u32::<LE>()?;
					for _ in 0..count {
						geometry.index_buffers.push(IndexBuffer::read(&mut buf)?);
					}
				},
				chunks::SWIS => {
					let count = buf.read_u32::<LE>()?;
					for _ in 0..count {
						geometry.windows.push(SlidingWindows::read(&mut buf)?);
					}
				},
				other => log::debug!("geometry: unhandled chunk {:#X}", other),
			}
		}

		Ok(geometry)
	}

	#[cfg(feature = "export")]
	pub fn write(&self) -> Result<Vec<u8>, export::LevelExportError> {
		let mut writer = ChunkWriter::new();

		let mut body = vec![];
		body.write_u32::<LE>(self.vertex_buffers.len() as u32)?;
		for buffer in self.vertex_buffers.iter() {
			buffer.write(&mut body)?;
		}
		writer.put(chunks::VB, &body);

		let mut body = vec![];
		body.write_u32::<LE>(self.index_buffers.len() as u32)?;
		for buffer in self.index_buffers.iter() {
			buffer.write(&mut body)?;
		}
		writer.put(chunks::IB, &body);

		let mut body = vec![];
		body.write_u32::<LE>(self.windows.len() as u32)?;
		for windows in self.windows.iter() {
			windows.write(&mut body)?;
		}
		writer.put(chunks::SWIS, &body);

		Ok(writer.into_vec())
	}
}

#[cfg(feature = "import")]
fn read_light<R>(buf: &mut R) -> Result<Light, import::LevelImportError>
where
	R: ReadBytesExt,
{
	let kind = buf.read_u32::<LE>()?;

	let mut color = || -> std::io::Result<[f32; 4]> {
		Ok([
			buf.read_f32::<LE>()?,
			buf.read_f32::<LE>()?,
			buf.read_f32::<LE>()?,
			buf.read_f32::<LE>()?,
		])
	};

	let diffuse = color()?;
	let specular = color()?;
	let ambient = color()?;

	Ok(Light {
		kind: kind,
		diffuse: diffuse,
		specular: specular,
		ambient: ambient,
		position: buf.read_vec3_swapped()?,
		direction: buf.read_vec3_swapped()?,
		range: buf.read_f32::<LE>()?,
		falloff: buf.read_f32::<LE>()?,
		attenuation: [
			buf.read_f32::<LE>()?,
			buf.read_f32::<LE>()?,
			buf.read_f32::<LE>()?,
		],
		theta: buf.read_f32::<LE>()?,
		phi: buf.read_f32::<LE>()?,
	})
}

#[cfg(feature = "export")]
fn write_light<W>(buf: &mut W, light: &Light) -> Result<(), export::LevelExportError>
where
	W: WriteBytesExt,
{
	buf.write_u32::<LE>(light.kind)?;
	for color in [&light.diffuse, &light.specular, &light.ambient] {
		for component in color.iter() {
			buf.write_f32::<LE>(*component)?;
		}
	}

	buf.write_vec3_swapped(light.position)?;
	buf.write_vec3_swapped(light.direction)?;
	buf.write_f32::<LE>(light.range)?;
	buf.write_f32::<LE>(light.falloff)?;
	for value in light.attenuation.iter() {
		buf.write_f32::<LE>(*value)?;
	}
	buf.write_f32::<LE>(light.theta)?;
	buf.write_f32::<LE>(light.phi)?;
	Ok(())
}

/// One reconstructed geometry range shared between visuals
#[derive(Clone, Debug, PartialEq)]
pub struct GeometrySlice {
	pub format: VertexFormat,
	pub vertices: Vec<LevelVertex>,
	pub indices: Vec<u16>,
}

/// Content-addressed cache over the shared buffers: each distinct
/// buffer-reference tuple is sliced once and shared by handle after
/// that, mirroring how the file shares ranges between visuals.
pub struct GeometryCache<'a> {
	geometry: &'a Geometry,
	cache: HashMap<GeomRef, Rc<GeometrySlice>>,
}

#[cfg(feature = "import")]
impl<'a> GeometryCache<'a> {
	pub fn new(geometry: &'a Geometry) -> GeometryCache<'a> {
		GeometryCache {
			geometry: geometry,
			cache: HashMap::new(),
		}
	}

	pub fn fetch(&mut self, geom: &GeomRef) -> Result<Rc<GeometrySlice>, import::LevelImportError> {
		use import::LevelImportError;

		if let Some(slice) = self.cache.get(geom) {
			return Ok(Rc::clone(slice));
		}

		let out_of_range = || LevelImportError::GeomRange(*geom);

		let vertices = self
			.geometry
			.vertex_buffers
			.get(geom.vb_index as usize)
			.ok_or_else(out_of_range)?;
		let indices = self
			.geometry
			.index_buffers
			.get(geom.ib_index as usize)
			.ok_or_else(out_of_range)?;

		let vb_end = geom.vb_offset as usize + geom.vb_count as usize;
		let ib_end = geom.ib_offset as usize + geom.ib_count as usize;
		if vb_end > vertices.vertices.len() || ib_end > indices.indices.len() {
			return Err(out_of_range());
		}

		// visual-local indices are relative to the vertex range
		let rebased = indices.indices[geom.ib_offset as usize..ib_end]
			.iter()
			.map(|index| index.checked_sub(geom.vb_offset as u16))
			.collect::<Option<Vec<u16>>>()
			.ok_or_else(out_of_range)?;

		let slice = Rc::new(GeometrySlice {
			format: vertices.format,
			vertices: vertices.vertices[geom.vb_offset as usize..vb_end].to_vec(),
			indices: rebased,
		});

		self.cache.insert(*geom, Rc::clone(&slice));
		Ok(slice)
	}

	/// Fetches a progressive visual's geometry narrowed to the
	/// full-resolution window of its sliding-window table. Window offsets
	/// are relative to the visual's own index range.
	pub fn fetch_windowed(
		&mut self,
		geom: &GeomRef,
		windows: &SlidingWindows,
	) -> Result<Rc<GeometrySlice>, import::LevelImportError> {
		let (offset, count) = match windows.full_resolution() {
			Some(window) => window,
			None => return self.fetch(geom),
		};

		if offset + count > geom.ib_count as usize {
			return Err(import::LevelImportError::GeomRange(*geom));
		}

		let narrowed = GeomRef {
			ib_offset: geom.ib_offset + offset as u32,
			ib_count: count as u32,
			..*geom
		};
		self.fetch(&narrowed)
	}
}

#[cfg(feature = "import")]
pub mod import {
	use thiserror::Error;

	use xrf_core::chunk::ChunkError;

	use crate::visual::GeomRef;

	#[derive(Error, Debug)]
	pub enum LevelImportError {
		#[error("Chunk error")]
		Chunk {
			#[from]
			source: ChunkError,
		},
		#[error("Unrecognized vertex declaration: {0}")]
		Declaration(String),
		#[error("Geometry reference {0:?} is out of range")]
		GeomRange(GeomRef),
		#[error("I/O error")]
		IO {
			#[from]
			source: std::io::Error,
		},
		#[error("Required chunk missing: {0}")]
		MissingChunk(&'static str),
		#[error("Unknown visual model type {0:#X}")]
		ModelType(u8),
		#[error("Level version {0} is not supported")]
		Version(u16),
		#[error("Visual version {0} is not supported")]
		VisualVersion(u8),
	}
}

#[cfg(feature = "export")]
pub mod export {
	use thiserror::Error;

	use xrf_core::io_ext::StringError;

	#[derive(Error, Debug)]
	pub enum LevelExportError {
		#[error("I/O error")]
		IO {
			#[from]
			source: std::io::Error,
		},
		#[error("String encoding error")]
		String {
			#[from]
			source: StringError,
		},
	}
}
