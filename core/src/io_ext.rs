use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use encoding_rs::WINDOWS_1251;

use std::io;

use thiserror::Error;

use ultraviolet::vec::{
	Vec2,
	Vec3
};

use crate::{
	dequantize_u16,
	quantize_u16
};

#[derive(Error, Debug)]
pub enum StringError {
	#[error("I/O error")]
	IO {
		#[from]
		source: io::Error,
	},
	#[error("String {0:?} is not representable in the target codepage")]
	Unmappable(String),
}

pub trait ReadXrExt: ReadBytesExt {
	/// Reads a null-terminated WINDOWS-1251 string. The scan stops at
	/// the first zero byte or at the end of the buffer.
	fn read_cstr(&mut self) -> io::Result<String> {
		let mut raw = vec![];
		let mut byte = [0; 1];

		loop {
			match self.read(&mut byte)? {
				0 => break,
				_ if byte[0] == 0 => break,
				_ => raw.push(byte[0]),
			}
		}

		let (text, _, _) = WINDOWS_1251.decode(&raw);
		Ok(text.into_owned())
	}

	/// Reads a little endian 2D vector
	fn read_vec2(&mut self) -> io::Result<Vec2> {
		Ok(Vec2::new(self.read_f32::<LE>()?, self.read_f32::<LE>()?))
	}

	/// Reads a little endian 3D vector in on-disk component order
	fn read_vec3(&mut self) -> io::Result<Vec3> {
		Ok(Vec3::new(
			self.read_f32::<LE>()?,
			self.read_f32::<LE>()?,
			self.read_f32::<LE>()?,
		))
	}

	/// Reads a little endian 3D vector, swapping the engine's Y-up Z/Y
	/// components into the authoring convention. On-disk `(x,y,z)`
	/// becomes `(x,z,y)`. This swap lives at exactly this layer; callers
	/// must never apply it again.
	fn read_vec3_swapped(&mut self) -> io::Result<Vec3> {
		let v = self.read_vec3()?;
		Ok(Vec3::new(v.x, v.z, v.y))
	}

	/// Reads a 16-bit quantized float in `[min, max]`
	fn read_quantized(&mut self, min: f32, max: f32) -> io::Result<f32> {
		Ok(dequantize_u16(self.read_u16::<LE>()?, min, max))
	}

	/// Reads a 4x4 matrix as 16 little endian floats, column by column
	fn read_mat4(&mut self) -> io::Result<[[f32; 4]; 4]> {
		let mut cols = [[0.0; 4]; 4];
		for col in cols.iter_mut() {
			for cell in col.iter_mut() {
				*cell = self.read_f32::<LE>()?;
			}
		}

		Ok(cols)
	}
}

impl<R> ReadXrExt for R
where
	R: ReadBytesExt + ?Sized,
{
}

pub trait WriteXrExt: WriteBytesExt {
	/// Writes a null-terminated WINDOWS-1251 string. Fails if any
	/// character has no encoding in the codepage; replacement bytes are
	/// never emitted.
	fn write_cstr(&mut self, text: &str) -> Result<(), StringError> {
		let (raw, _, unmappable) = WINDOWS_1251.encode(text);
		if unmappable {
			return Err(StringError::Unmappable(text.to_string()));
		}

		self.write_all(&raw)?;
		self.write_u8(0)?;
		Ok(())
	}

	/// Writes a little endian 2D vector
	fn write_vec2(&mut self, v: Vec2) -> io::Result<()> {
		self.write_f32::<LE>(v.x)?;
		self.write_f32::<LE>(v.y)
	}

	/// Writes a little endian 3D vector in on-disk component order
	fn write_vec3(&mut self, v: Vec3) -> io::Result<()> {
		self.write_f32::<LE>(v.x)?;
		self.write_f32::<LE>(v.y)?;
		self.write_f32::<LE>(v.z)
	}

	/// Writes a 3D vector, swapping back into the engine's component
	/// order. Inverse of [`ReadXrExt::read_vec3_swapped`].
	fn write_vec3_swapped(&mut self, v: Vec3) -> io::Result<()> {
		self.write_vec3(Vec3::new(v.x, v.z, v.y))
	}

	/// Writes a 16-bit quantized float in `[min, max]`
	fn write_quantized(&mut self, value: f32, min: f32, max: f32) -> io::Result<()> {
		self.write_u16::<LE>(quantize_u16(value, min, max))
	}

	/// Writes a 4x4 matrix as 16 little endian floats, column by column
	fn write_mat4(&mut self, cols: &[[f32; 4]; 4]) -> io::Result<()> {
		for col in cols.iter() {
			for cell in col.iter() {
				self.write_f32::<LE>(*cell)?;
			}
		}

		Ok(())
	}
}

impl<W> WriteXrExt for W
where
	W: WriteBytesExt + ?Sized,
{
}

#[cfg(test)]
mod tests {
	use ultraviolet::vec::Vec3;

	use super::*;

	#[test]
	fn test_read_cstr() {
		let mut data = &b"torso\x00rest"[..];
		assert_eq!(data.read_cstr().unwrap(), "torso");
		assert_eq!(data, b"rest");
	}

	#[test]
	fn test_read_cstr_unterminated() {
		let mut data = &b"tail"[..];
		assert_eq!(data.read_cstr().unwrap(), "tail");
	}

	#[test]
	fn test_cstr_round_trip_codepage() {
		// Cyrillic is representable in WINDOWS-1251
		let mut out = vec![];
		out.write_cstr("кость").unwrap();
		assert_eq!(out.last(), Some(&0));
		assert_eq!(out.as_slice().read_cstr().unwrap(), "кость");
	}

	#[test]
	fn test_write_cstr_unmappable() {
		let mut out = vec![];
		match out.write_cstr("骨") {
			Err(StringError::Unmappable(s)) => assert_eq!(s, "骨"),
			other => panic!("expected Unmappable, got {:?}", other.err()),
		}
	}

	#[test]
	fn test_swap_is_involution() {
		let v = Vec3::new(1.0, 2.0, 3.0);
		let mut out = vec![];
		out.write_vec3_swapped(v).unwrap();
		assert_eq!(out.as_slice().read_vec3_swapped().unwrap(), v);

		// On disk the middle and last components trade places
		assert_eq!(out.as_slice().read_vec3().unwrap(), Vec3::new(1.0, 3.0, 2.0));
	}

	#[test]
	fn test_quantized() {
		let mut out = vec![];
		out.write_quantized(0.0, -32.0, 32.0).unwrap();
		let v = out.as_slice().read_quantized(-32.0, 32.0).unwrap();
		assert!((v - 0.0).abs() < 64.0 / 65536.0);
	}

	#[test]
	fn test_mat4_round_trip() {
		let mut cols = [[0.0f32; 4]; 4];
		for (i, col) in cols.iter_mut().enumerate() {
			for (j, cell) in col.iter_mut().enumerate() {
				*cell = (i * 4 + j) as f32;
			}
		}

		let mut out = vec![];
		out.write_mat4(&cols).unwrap();
		assert_eq!(out.len(), 64);
		assert_eq!(out.as_slice().read_mat4().unwrap(), cols);
	}
}
