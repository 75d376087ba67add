use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use ultraviolet::vec::{
	Vec2,
	Vec3
};

use xrf_core::io_ext::{
	ReadXrExt,
	WriteXrExt
};

#[cfg(feature = "import")]
use crate::level::import::LevelImportError;

#[cfg(feature = "export")]
use crate::level::export::LevelExportError;

/// Step recovered by one unit of the UV correction byte
pub const CORRECTION_QUANTUM: f32 = 32.0 / 32768.0;

// D3D9 declaration type and usage tags
mod decl {
	pub const FLOAT3: u8 = 2;
	pub const COLOR: u8 = 4;
	pub const UBYTE4: u8 = 5;
	pub const SHORT2: u8 = 6;
	pub const UNUSED: u8 = 17;

	pub const POSITION: u8 = 0;
	pub const NORMAL: u8 = 3;
	pub const TEXCOORD: u8 = 5;
	pub const TANGENT: u8 = 6;
	pub const BINORMAL: u8 = 7;
	pub const DIFFUSE: u8 = 10;

	pub const END_STREAM: u16 = 0xFF;
}

/// One stream declaration entry, 8 bytes on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Element {
	offset: u16,
	kind: u8,
	usage: u8,
	usage_index: u8,
}

/// The fixed interleaved per-vertex layouts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexFormat {
	/// Position, packed basis, quantized UV + light-map UV
	Normal,
	/// Position, packed basis, quantized UV, wind data
	Tree,
	/// Position, packed basis, vertex color, quantized UV
	Color,
	/// Position only
	Fastpath,
}

impl VertexFormat {
	pub fn stride(self) -> usize {
		match self {
			VertexFormat::Normal => 32,
			VertexFormat::Tree => 32,
			VertexFormat::Color => 32,
			VertexFormat::Fastpath => 12,
		}
	}

	/// Quantization coefficient of the base UV channel. The light-map
	/// channel sharing the vertex halves the available precision range.
	pub fn uv_coefficient(self) -> f32 {
		match self {
			VertexFormat::Normal => 2048.0,
			_ => 1024.0,
		}
	}

	fn elements(self) -> Vec<Element> {
		let position = Element {
			offset: 0,
			kind: decl::FLOAT3,
			usage: decl::POSITION,
			usage_index: 0,
		};
		let basis = |offset, usage| Element {
			offset: offset,
			kind: decl::UBYTE4,
			usage: usage,
			usage_index: 0,
		};
		let short2 = |offset, usage_index| Element {
			offset: offset,
			kind: decl::SHORT2,
			usage: decl::TEXCOORD,
			usage_index: usage_index,
		};

		match self {
			VertexFormat::Normal => vec![
				position,
				basis(12, decl::NORMAL),
				basis(16, decl::TANGENT),
				basis(20, decl::BINORMAL),
				short2(24, 0),
				short2(28, 1),
			],
			VertexFormat::Tree => vec![
				position,
				basis(12, decl::NORMAL),
				basis(16, decl::TANGENT),
				basis(20, decl::BINORMAL),
				short2(24, 0),
				Element {
					offset: 28,
					kind: decl::COLOR,
					usage: decl::DIFFUSE,
					usage_index: 0,
				},
			],
			VertexFormat::Color => vec![
				position,
				basis(12, decl::NORMAL),
				basis(16, decl::TANGENT),
				basis(20, decl::BINORMAL),
				Element {
					offset: 24,
					kind: decl::COLOR,
					usage: decl::DIFFUSE,
					usage_index: 0,
				},
				short2(28, 0),
			],
			VertexFormat::Fastpath => vec![position],
		}
	}

	#[cfg(feature = "import")]
	fn from_elements(elements: &[Element]) -> Option<VertexFormat> {
		for format in [
			VertexFormat::Normal,
			VertexFormat::Tree,
			VertexFormat::Color,
			VertexFormat::Fastpath,
		] {
			if format.elements() == elements {
				return Some(format);
			}
		}

		None
	}
}

/// One decoded level vertex. Fields a layout does not carry stay at
/// their defaults.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct LevelVertex {
	pub position: Vec3,
	pub normal: Vec3,
	pub tangent: Vec3,
	pub binormal: Vec3,
	pub uv: Vec2,
	pub uv_lightmap: Vec2,
	/// RGBA color, or wind parameters in the tree layout
	pub color: [u8; 4],
}

#[derive(Clone, Debug, PartialEq)]
pub struct VertexBuffer {
	pub format: VertexFormat,
	pub vertices: Vec<LevelVertex>,
}

/// Quantizes one UV component to a signed 16-bit word plus a
/// correction byte recovering sub-quantization precision.
pub fn encode_uv(value: f32, coefficient: f32) -> (i16, u8) {
	let scaled = (value * coefficient).floor().clamp(-32768.0, 32767.0);
	let quantized = scaled as i16;
	let residual = value - scaled / coefficient;
	let correction = (residual / CORRECTION_QUANTUM).round().clamp(0.0, 255.0);
	(quantized, correction as u8)
}

/// Exact inverse of [`encode_uv`]
pub fn decode_uv(quantized: i16, correction: u8, coefficient: f32) -> f32 {
	quantized as f32 / coefficient + correction as f32 * CORRECTION_QUANTUM
}

fn encode_unit(value: f32) -> u8 {
	((value * 0.5 + 0.5) * 255.0).round().clamp(0.0, 255.0) as u8
}

fn decode_unit(byte: u8) -> f32 {
	byte as f32 / 255.0 * 2.0 - 1.0
}

#[cfg(feature = "import")]
fn read_basis<R>(buf: &mut R) -> std::io::Result<(Vec3, u8)>
where
	R: ReadBytesExt,
{
	let x = decode_unit(buf.read_u8()?);
	let y = decode_unit(buf.read_u8()?);
	let z = decode_unit(buf.read_u8()?);
	let w = buf.read_u8()?;
	// the basis crosses the swap boundary like any direction vector
	Ok((Vec3::new(x, z, y), w))
}

#[cfg(feature = "export")]
fn write_basis<W>(buf: &mut W, v: Vec3, w: u8) -> std::io::Result<()>
where
	W: WriteBytesExt,
{
	buf.write_u8(encode_unit(v.x))?;
	buf.write_u8(encode_unit(v.z))?;
	buf.write_u8(encode_unit(v.y))?;
	buf.write_u8(w)
}

impl VertexBuffer {
	#[cfg(feature = "import")]
	pub fn read<R>(buf: &mut R) -> Result<VertexBuffer, LevelImportError>
	where
		R: ReadBytesExt,
	{
		let mut elements = vec![];
		loop {
			let stream = buf.read_u16::<LE>()?;
			let offset = buf.read_u16::<LE>()?;
			let kind = buf.read_u8()?;
			let _method = buf.read_u8()?;
			let usage = buf.read_u8()?;
			let usage_index = buf.read_u8()?;

			if stream == decl::END_STREAM {
				if kind != decl::UNUSED {
					return Err(LevelImportError::Declaration(
						"stream terminator with a live type".to_string(),
					));
				}
				break;
			}

			elements.push(Element {
				offset: offset,
				kind: kind,
				usage: usage,
				usage_index: usage_index,
			});
		}

		let format = VertexFormat::from_elements(&elements).ok_or_else(|| {
			LevelImportError::Declaration(format!("unrecognized layout {:?}", elements))
		})?;

		let count = buf.read_u32::<LE>()? as usize;
		let coefficient = format.uv_coefficient();
		let mut vertices = Vec::with_capacity(count);

		for _ in 0..count {
			let mut vertex = LevelVertex {
				position: buf.read_vec3_swapped()?,
				..LevelVertex::default()
			};

			match format {
				VertexFormat::Fastpath => {},
				_ => {
					let (normal, _) = read_basis(buf)?;
					let (tangent, correction_u) = read_basis(buf)?;
					let (binormal, correction_v) = read_basis(buf)?;
					vertex.normal = normal;
					vertex.tangent = tangent;
					vertex.binormal = binormal;

					if format == VertexFormat::Color {
						buf.read_exact(&mut vertex.color)?;
					}

					let qu = buf.read_i16::<LE>()?;
					let qv = buf.read_i16::<LE>()?;
					vertex.uv = Vec2::new(
						decode_uv(qu, correction_u, coefficient),
						decode_uv(qv, correction_v, coefficient),
					);

					match format {
						VertexFormat::Normal => {
							vertex.uv_lightmap = Vec2::new(
								buf.read_i16::<LE>()? as f32 / 32768.0,
								buf.read_i16::<LE>()? as f32 / 32768.0,
							);
						},
						VertexFormat::Tree => {
							buf.read_exact(&mut vertex.color)?;
						},
						_ => {},
					}
				},
			}

			vertices.push(vertex);
		}

		Ok(VertexBuffer {
			format: format,
			vertices: vertices,
		})
	}

	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W) -> Result<(), LevelExportError>
	where
		W: WriteBytesExt,
	{
		for element in self.format.elements() {
			buf.write_u16::<LE>(0)?;
			buf.write_u16::<LE>(element.offset)?;
			buf.write_u8(element.kind)?;
			buf.write_u8(0)?;
			buf.write_u8(element.usage)?;
			buf.write_u8(element.usage_index)?;
		}

		// terminator entry
		buf.write_u16::<LE>(decl::END_STREAM)?;
		buf.write_u16::<LE>(0)?;
		buf.write_u8(decl::UNUSED)?;
		buf.write_u8(0)?;
		buf.write_u8(0)?;
		buf.write_u8(0)?;

		buf.write_u32::<LE>(self.vertices.len() as u32)?;
		let coefficient = self.format.uv_coefficient();

		for vertex in self.vertices.iter() {
			buf.write_vec3_swapped(vertex.position)?;

			match self.format {
				VertexFormat::Fastpath => {},
				_ => {
					let (qu, correction_u) = encode_uv(vertex.uv.x, coefficient);
					let (qv, correction_v) = encode_uv(vertex.uv.y, coefficient);

					write_basis(buf, vertex.normal, 0)?;
					write_basis(buf, vertex.tangent, correction_u)?;
					write_basis(buf, vertex.binormal, correction_v)?;

					if self.format == VertexFormat::Color {
						buf.write_all(&vertex.color)?;
					}

					buf.write_i16::<LE>(qu)?;
					buf.write_i16::<LE>(qv)?;

					match self.format {
						VertexFormat::Normal => {
							let lm = vertex.uv_lightmap;
							buf.write_i16::<LE>((lm.x * 32768.0).clamp(-32768.0, 32767.0) as i16)?;
							buf.write_i16::<LE>((lm.y * 32768.0).clamp(-32768.0, 32767.0) as i16)?;
						},
						VertexFormat::Tree => buf.write_all(&vertex.color)?,
						_ => {},
					}
				},
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn vertex(u: f32, v: f32) -> LevelVertex {
		LevelVertex {
			position: Vec3::new(1.0, 2.0, 3.0),
			normal: Vec3::new(0.0, 1.0, 0.0),
			tangent: Vec3::new(1.0, 0.0, 0.0),
			binormal: Vec3::new(0.0, 0.0, 1.0),
			uv: Vec2::new(u, v),
			uv_lightmap: Vec2::new(0.25, 0.5),
			color: [10, 20, 30, 40],
		}
	}

	#[test]
	fn test_uv_precision_and_monotonicity() {
		for coefficient in [1024.0, 2048.0] {
			let bound = 1.0 / coefficient + CORRECTION_QUANTUM;
			let mut previous = f32::NEG_INFINITY;

			for step in 0..1000 {
				let u = step as f32 / 1000.0;
				let (q, corr) = encode_uv(u, coefficient);
				let back = decode_uv(q, corr, coefficient);

				assert!((back - u).abs() <= bound, "{} -> {}", u, back);
				assert!(back >= previous, "not monotonic at {}", u);
				previous = back;
			}
		}
	}

	#[test]
	fn test_uv_encode_clamps_range() {
		let (q, _) = encode_uv(40.0, 1024.0);
		assert_eq!(q, 32767);
		let (q, _) = encode_uv(-40.0, 1024.0);
		assert_eq!(q, -32768);
	}

	#[test]
	fn test_buffer_round_trip_per_format() {
		for format in [
			VertexFormat::Normal,
			VertexFormat::Tree,
			VertexFormat::Color,
			VertexFormat::Fastpath,
		] {
			let buffer = VertexBuffer {
				format: format,
				vertices: vec![vertex(0.125, 0.625), vertex(0.5, 0.75)],
			};

			let mut data = vec![];
			buffer.write(&mut data).unwrap();
			let back = VertexBuffer::read(&mut data.as_slice()).unwrap();

			assert_eq!(back.format, format);
			assert_eq!(back.vertices.len(), 2);
			for (a, b) in back.vertices.iter().zip(buffer.vertices.iter()) {
				assert_eq!(a.position, b.position);
				if format != VertexFormat::Fastpath {
					assert!((a.uv.x - b.uv.x).abs() < 2e-3);
					assert!((a.uv.y - b.uv.y).abs() < 2e-3);
					assert!((a.normal.y - b.normal.y).abs() < 0.01);
				}
				if format == VertexFormat::Tree || format == VertexFormat::Color {
					assert_eq!(a.color, b.color);
				}
				if format == VertexFormat::Normal {
					assert!((a.uv_lightmap.x - b.uv_lightmap.x).abs() < 1e-3);
				}
			}
		}
	}

	#[test]
	fn test_unknown_declaration_is_fatal() {
		let mut data = vec![];
		// a single bogus attribute followed by the terminator
		data.extend_from_slice(&[0, 0, 0, 0, 9, 0, 2, 0]);
		data.extend_from_slice(&[0xFF, 0, 0, 0, 17, 0, 0, 0]);
		data.extend_from_slice(&0u32.to_le_bytes());

		assert!(matches!(
			VertexBuffer::read(&mut data.as_slice()),
			Err(LevelImportError::Declaration(_))
		));
	}
}
