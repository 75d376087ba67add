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

use crate::geom::SlidingWindows;

#[cfg(feature = "import")]
use crate::level::import::LevelImportError;

#[cfg(feature = "export")]
use crate::level::export::LevelExportError;

/// The only supported visual header version
pub const VERSION: u8 = 4;

pub mod chunks {
	pub const HEADER: u32 = 0x1;
	pub const GEOM_REF: u32 = 0x2;
	pub const SWI: u32 = 0x3;
	pub const TREE: u32 = 0x4;
	pub const LOD_FACES: u32 = 0x5;
	pub const CHILDREN: u32 = 0x6;
}

mod model {
	pub const NORMAL: u8 = 0;
	pub const HIERARCHY: u8 = 1;
	pub const PROGRESSIVE: u8 = 2;
	pub const TREE_STATIC: u8 = 3;
	pub const TREE_PROGRESSIVE: u8 = 4;
	pub const LOD: u8 = 5;
}

/// Reference into the shared vertex/index buffers. Identical tuples
/// address identical geometry, which is what the decode cache keys on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeomRef {
	pub vb_index: u32,
	pub vb_offset: u32,
	pub vb_count: u32,
	pub ib_index: u32,
	pub ib_offset: u32,
	pub ib_count: u32,
}

/// Color scale or bias applied to baked tree lighting
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct TreeColor {
	pub rgb: Vec3,
	pub hemi: f32,
	pub sun: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodVertex {
	pub position: Vec3,
	pub uv: Vec2,
	pub rgb_hemi: u32,
	pub sun: u8,
}

/// One quad of the fixed 8-quad billboard cross
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodFace {
	pub vertices: [LodVertex; 4],
}

#[derive(Clone, Debug, PartialEq)]
pub enum VisualKind {
	Normal {
		geom: GeomRef,
	},
	Progressive {
		geom: GeomRef,
		windows: SlidingWindows,
	},
	TreeStatic {
		geom: GeomRef,
		transform: [[f32; 4]; 4],
		scale: TreeColor,
		bias: TreeColor,
	},
	TreeProgressive {
		geom: GeomRef,
		windows: SlidingWindows,
		transform: [[f32; 4]; 4],
		scale: TreeColor,
		bias: TreeColor,
	},
	Lod {
		faces: Box<[LodFace; 8]>,
	},
	Hierarchy {
		children: Vec<u32>,
	},
}

/// One visual record of the level's render hierarchy
#[derive(Clone, Debug, PartialEq)]
pub struct Visual {
	pub shader: u16,
	pub bbox: (Vec3, Vec3),
	pub sphere: (Vec3, f32),
	pub kind: VisualKind,
}

impl Visual {
	/// Buffer reference of the visual, if its kind carries geometry.
	pub fn geom(&self) -> Option<&GeomRef> {
		match &self.kind {
			VisualKind::Normal { geom } => Some(geom),
			VisualKind::Progressive { geom, .. } => Some(geom),
			VisualKind::TreeStatic { geom, .. } => Some(geom),
			VisualKind::TreeProgressive { geom, .. } => Some(geom),
			_ => None,
		}
	}

	#[cfg(feature = "import")]
	pub fn read(data: &[u8]) -> Result<Visual, LevelImportError> {
		let mut iter = ChunkIter::new(data);

		let header = iter.expect(chunks::HEADER)?;
		let mut buf = std::io::Cursor::new(header);

		let version = buf.read_u8()?;
		if version != VERSION {
			return Err(LevelImportError::VisualVersion(version));
		}

		let model_type = buf.read_u8()?;
		let shader = buf.read_u16::<LE>()?;
		let bbox = (buf.read_vec3_swapped()?, buf.read_vec3_swapped()?);
		let sphere = (buf.read_vec3_swapped()?, buf.read_f32::<LE>()?);

		let mut geom = None;
		let mut windows = None;
		let mut tree = None;
		let mut lod_faces = None;
		let mut children = None;

		for chunk in iter {
			let chunk = chunk?;
			let mut buf = std::io::Cursor::new(chunk.data);

			match chunk.id {
				chunks::GEOM_REF => {
					geom = Some(GeomRef {
						vb_index: buf.read_u32::<LE>()?,
						vb_offset: buf.read_u32::<LE>()?,
						vb_count: buf.read_u32::<LE>()?,
						ib_index: buf.read_u32::<LE>()?,
						ib_offset: buf.read_u32::<LE>()?,
						ib_count: buf.read_u32::<LE>()?,
					});
				},
				chunks::SWI => windows = Some(SlidingWindows::read(&mut buf)?),
				chunks::TREE => {
					let transform = buf.read_mat4()?;
					let scale = read_tree_color(&mut buf)?;
					let bias = read_tree_color(&mut buf)?;
					tree = Some((transform, scale, bias));
				},
				chunks::LOD_FACES => {
					let mut faces = Vec::with_capacity(8);
					for _ in 0..8 {
						let mut vertices = Vec::with_capacity(4);
						for _ in 0..4 {
							let vertex = LodVertex {
								position: buf.read_vec3_swapped()?,
								uv: buf.read_vec2()?,
								rgb_hemi: buf.read_u32::<LE>()?,
								sun: buf.read_u8()?,
							};
							// padding up to a 4-byte boundary
							for _ in 0..3 {
								buf.read_u8()?;
							}
							vertices.push(vertex);
						}
						faces.push(LodFace {
							vertices: vertices.try_into().unwrap(),
						});
					}
					lod_faces = Some(Box::new(<[LodFace; 8]>::try_from(faces).unwrap()));
				},
				chunks::CHILDREN => {
					let count = buf.read_u32::<LE>()? as usize;
					let mut list = Vec::with_capacity(count);
					for _ in 0..count {
						list.push(buf.read_u32::<LE>()?);
					}
					children = Some(list);
				},
				other => log::debug!("visual: unhandled chunk {:#X}", other),
			}
		}

		let require_geom =
			|| geom.ok_or(LevelImportError::MissingChunk("geometry reference"));
		let require_windows =
			|| windows.clone().ok_or(LevelImportError::MissingChunk("sliding windows"));
		let require_tree =
			|| tree.ok_or(LevelImportError::MissingChunk("tree transform"));

		let kind = match model_type {
			model::NORMAL => VisualKind::Normal {
				geom: require_geom()?,
			},
			model::PROGRESSIVE => VisualKind::Progressive {
				geom: require_geom()?,
				windows: require_windows()?,
			},
			model::TREE_STATIC => {
				let (transform, scale, bias) = require_tree()?;
				VisualKind::TreeStatic {
					geom: require_geom()?,
					transform: transform,
					scale: scale,
					bias: bias,
				}
			},
			model::TREE_PROGRESSIVE => {
				let (transform, scale, bias) = require_tree()?;
				VisualKind::TreeProgressive {
					geom: require_geom()?,
					windows: require_windows()?,
					transform: transform,
					scale: scale,
					bias: bias,
				}
			},
			model::LOD => VisualKind::Lod {
				faces: lod_faces.ok_or(LevelImportError::MissingChunk("lod faces"))?,
			},
			model::HIERARCHY => VisualKind::Hierarchy {
				children: children.unwrap_or_default(),
			},
			other => return Err(LevelImportError::ModelType(other)),
		};

		Ok(Visual {
			shader: shader,
			bbox: bbox,
			sphere: sphere,
			kind: kind,
		})
	}

	#[cfg(feature = "export")]
	pub fn write(&self) -> Result<Vec<u8>, LevelExportError> {
		let model_type = match &self.kind {
			VisualKind::Normal { .. } => model::NORMAL,
			VisualKind::Progressive { .. } => model::PROGRESSIVE,
			VisualKind::TreeStatic { .. } => model::TREE_STATIC,
			VisualKind::TreeProgressive { .. } => model::TREE_PROGRESSIVE,
			VisualKind::Lod { .. } => model::LOD,
			VisualKind::Hierarchy { .. } => model::HIERARCHY,
		};

		let mut header = vec![];
		header.write_u8(VERSION)?;
		header.write_u8(model_type)?;
		header.write_u16::<LE>(self.shader)?;
		header.write_vec3_swapped(self.bbox.0)?;
		header.write_vec3_swapped(self.bbox.1)?;
		header.write_vec3_swapped(self.sphere.0)?;
		header.write_f32::<LE>(self.sphere.1)?;

		let mut writer = ChunkWriter::new();
		writer.put(chunks::HEADER, &header);

		if let Some(geom) = self.geom() {
			let mut body = vec![];
			body.write_u32::<LE>(geom.vb_index)?;
			body.write_u32::<LE>(geom.vb_offset)?;
			body.write_u32::<LE>(geom.vb_count)?;
			body.write_u32::<LE>(geom.ib_index)?;
			body.write_u32::<LE>(geom.ib_offset)?;
			body.write_u32::<LE>(geom.ib_count)?;
			writer.put(chunks::GEOM_REF, &body);
		}

		match &self.kind {
			VisualKind::Progressive { windows, .. }
			| VisualKind::TreeProgressive { windows, .. } => {
				let mut body = vec![];
				windows.write(&mut body)?;
				writer.put(chunks::SWI, &body);
			},
			_ => {},
		}

		match &self.kind {
			VisualKind::TreeStatic {
				transform,
				scale,
				bias,
				..
			}
			| VisualKind::TreeProgressive {
				transform,
				scale,
				bias,
				..
			} => {
				let mut body = vec![];
				body.write_mat4(transform)?;
				write_tree_color(&mut body, scale)?;
				write_tree_color(&mut body, bias)?;
				writer.put(chunks::TREE, &body);
			},
			_ => {},
		}

		if let VisualKind::Lod { faces } = &self.kind {
			let mut body = vec![];
			for face in faces.iter() {
				for vertex in face.vertices.iter() {
					body.write_vec3_swapped(vertex.position)?;
					body.write_vec2(vertex.uv)?;
					body.write_u32::<LE>(vertex.rgb_hemi)?;
					body.write_u8(vertex.sun)?;
					// padding up to a 4-byte boundary
					for _ in 0..3 {
						body.write_u8(0)?;
					}
				}
			}
			writer.put(chunks::LOD_FACES, &body);
		}

		if let VisualKind::Hierarchy { children } = &self.kind {
			let mut body = vec![];
			body.write_u32::<LE>(children.len() as u32)?;
			for child in children.iter() {
				body.write_u32::<LE>(*child)?;
			}
			writer.put(chunks::CHILDREN, &body);
		}

		Ok(writer.into_vec())
	}
}

#[cfg(feature = "import")]
fn read_tree_color<R>(buf: &mut R) -> std::io::Result<TreeColor>
where
	R: ReadBytesExt,
{
	Ok(TreeColor {
		rgb: buf.read_vec3()?,
		hemi: buf.read_f32::<LE>()?,
		sun: buf.read_f32::<LE>()?,
	})
}

#[cfg(feature = "export")]
fn write_tree_color<W>(buf: &mut W, color: &TreeColor) -> std::io::Result<()>
where
	W: WriteBytesExt,
{
	buf.write_vec3(color.rgb)?;
	buf.write_f32::<LE>(color.hemi)?;
	buf.write_f32::<LE>(color.sun)
}

#[cfg(test)]
pub(crate) mod tests {
	use crate::geom::SlideWindow;

	use super::*;

	pub(crate) fn sample_geom() -> GeomRef {
		GeomRef {
			vb_index: 0,
			vb_offset: 16,
			vb_count: 40,
			ib_index: 0,
			ib_offset: 96,
			ib_count: 60,
		}
	}

	fn header(kind: VisualKind) -> Visual {
		Visual {
			shader: 3,
			bbox: (Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 2.0, 1.0)),
			sphere: (Vec3::new(0.0, 1.0, 0.0), 1.8),
			kind: kind,
		}
	}

	#[test]
	fn test_normal_round_trip() {
		let visual = header(VisualKind::Normal {
			geom: sample_geom(),
		});

		let data = visual.write().unwrap();
		assert_eq!(Visual::read(&data).unwrap(), visual);
	}

	#[test]
	fn test_progressive_round_trip() {
		let visual = header(VisualKind::Progressive {
			geom: sample_geom(),
			windows: SlidingWindows {
				windows: vec![
					SlideWindow {
						offset: 0,
						triangles: 20,
						vertices: 12,
					},
					SlideWindow {
						offset: 60,
						triangles: 10,
						vertices: 8,
					},
				],
			},
		});

		let data = visual.write().unwrap();
		assert_eq!(Visual::read(&data).unwrap(), visual);
	}

	#[test]
	fn test_tree_round_trip() {
		let mut transform = [[0.0f32; 4]; 4];
		for i in 0..4 {
			transform[i][i] = 1.0;
		}
		transform[3][0] = 12.5;

		let visual = header(VisualKind::TreeStatic {
			geom: sample_geom(),
			transform: transform,
			scale: TreeColor {
				rgb: Vec3::new(0.9, 0.8, 0.7),
				hemi: 0.5,
				sun: 0.6,
			},
			bias: TreeColor::default(),
		});

		let data = visual.write().unwrap();
		assert_eq!(Visual::read(&data).unwrap(), visual);
	}

	#[test]
	fn test_lod_round_trip() {
		let vertex = LodVertex {
			position: Vec3::new(0.5, 1.0, 0.0),
			uv: Vec2::new(0.25, 0.75),
			rgb_hemi: 0x00C0_8040,
			sun: 200,
		};
		let visual = header(VisualKind::Lod {
			faces: Box::new(
				[LodFace {
					vertices: [vertex; 4],
				}; 8],
			),
		});

		let data = visual.write().unwrap();
		assert_eq!(Visual::read(&data).unwrap(), visual);
	}

	#[test]
	fn test_hierarchy_round_trip() {
		let visual = header(VisualKind::Hierarchy {
			children: vec![4, 7, 9],
		});

		let data = visual.write().unwrap();
		assert_eq!(Visual::read(&data).unwrap(), visual);
	}

	#[test]
	fn test_unknown_model_type_is_fatal() {
		let visual = header(VisualKind::Hierarchy {
			children: vec![],
		});
		let mut data = visual.write().unwrap();

		// model type byte follows the header chunk header and version
		data[9] = 0x77;

		match Visual::read(&data) {
			Err(LevelImportError::ModelType(0x77)) => {},
			other => panic!("expected model type error, got {:?}", other.err()),
		}
	}

	#[test]
	fn test_unknown_version_is_fatal() {
		let visual = header(VisualKind::Hierarchy {
			children: vec![],
		});
		let mut data = visual.write().unwrap();
		data[8] = 3;

		match Visual::read(&data) {
			Err(LevelImportError::VisualVersion(3)) => {},
			other => panic!("expected version error, got {:?}", other.err()),
		}
	}
}
