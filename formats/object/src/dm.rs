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
	io_ext::{
		ReadXrExt,
		WriteXrExt
	},
	swap_winding
};

#[cfg(feature = "import")]
use crate::object::import::ObjectImportError;

#[cfg(feature = "export")]
use crate::object::export::ObjectExportError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetailVertex {
	pub position: Vec3,
	pub uv: Vec2,
}

/// A detail mesh: one textured vertex/index pair with scatter scale
/// bounds, stored as a flat packed record rather than chunks.
#[derive(Clone, Debug, PartialEq)]
pub struct DetailMesh {
	pub shader: String,
	pub texture: String,
	pub flags: u32,
	pub min_scale: f32,
	pub max_scale: f32,
	pub vertices: Vec<DetailVertex>,
	pub indices: Vec<u16>,
}

impl DetailMesh {
	#[cfg(feature = "import")]
	pub fn read<R>(buf: &mut R) -> Result<DetailMesh, ObjectImportError>
	where
		R: ReadBytesExt,
	{
		let shader = buf.read_cstr()?;
		let texture = buf.read_cstr()?;
		let flags = buf.read_u32::<LE>()?;
		let min_scale = buf.read_f32::<LE>()?;
		let max_scale = buf.read_f32::<LE>()?;
		let vertex_count = buf.read_u32::<LE>()? as usize;
		let index_count = buf.read_u32::<LE>()? as usize;

		let mut vertices = Vec::with_capacity(vertex_count);
		for _ in 0..vertex_count {
			vertices.push(DetailVertex {
				position: buf.read_vec3_swapped()?,
				uv: buf.read_vec2()?,
			});
		}

		let mut indices = Vec::with_capacity(index_count);
		for _ in 0..index_count {
			indices.push(buf.read_u16::<LE>()?);
		}
		swap_winding(&mut indices);

		Ok(DetailMesh {
			shader: shader,
			texture: texture,
			flags: flags,
			min_scale: min_scale,
			max_scale: max_scale,
			vertices: vertices,
			indices: indices,
		})
	}

	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W) -> Result<(), ObjectExportError>
	where
		W: WriteBytesExt,
	{
		buf.write_cstr(&self.shader)?;
		buf.write_cstr(&self.texture)?;
		buf.write_u32::<LE>(self.flags)?;
		buf.write_f32::<LE>(self.min_scale)?;
		buf.write_f32::<LE>(self.max_scale)?;
		buf.write_u32::<LE>(self.vertices.len() as u32)?;
		buf.write_u32::<LE>(self.indices.len() as u32)?;

		for vertex in self.vertices.iter() {
			buf.write_vec3_swapped(vertex.position)?;
			buf.write_vec2(vertex.uv)?;
		}

		let mut indices = self.indices.clone();
		swap_winding(&mut indices);
		for index in indices.iter() {
			buf.write_u16::<LE>(*index)?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> DetailMesh {
		DetailMesh {
			shader: "details\\lod".to_string(),
			texture: "details\\grass".to_string(),
			flags: 0,
			min_scale: 0.8,
			max_scale: 1.4,
			vertices: vec![
				DetailVertex {
					position: Vec3::new(0.0, 0.0, 0.0),
					uv: Vec2::new(0.0, 0.0),
				},
				DetailVertex {
					position: Vec3::new(1.0, 0.0, 0.0),
					uv: Vec2::new(1.0, 0.0),
				},
				DetailVertex {
					position: Vec3::new(0.0, 1.0, 0.0),
					uv: Vec2::new(0.0, 1.0),
				},
			],
			indices: vec![0, 1, 2],
		}
	}

	#[test]
	fn test_detail_mesh_round_trip() {
		let mesh = sample();
		let mut data = vec![];
		mesh.write(&mut data).unwrap();

		let back = DetailMesh::read(&mut data.as_slice()).unwrap();
		assert_eq!(back, mesh);
	}

	#[test]
	fn test_winding_swaps_on_disk() {
		let mesh = sample();
		let mut data = vec![];
		mesh.write(&mut data).unwrap();

		// the index words sit at the very end of the record
		let tail = &data[data.len() - 6..];
		assert_eq!(tail, &[0, 0, 2, 0, 1, 0]);
	}
}
