use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use xrf_core::swap_winding;

#[cfg(feature = "import")]
use crate::level::import::LevelImportError;

#[cfg(feature = "export")]
use crate::level::export::LevelExportError;

/// Flat triangle index array. Indices are stored with flipped winding;
/// the swap happens here so callers only ever see authoring order.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct IndexBuffer {
	pub indices: Vec<u16>,
}

impl IndexBuffer {
	#[cfg(feature = "import")]
	pub fn read<R>(buf: &mut R) -> Result<IndexBuffer, LevelImportError>
	where
		R: ReadBytesExt,
	{
		let count = buf.read_u32::<LE>()? as usize;
		let mut indices = Vec::with_capacity(count);
		for _ in 0..count {
			indices.push(buf.read_u16::<LE>()?);
		}
		swap_winding(&mut indices);

		Ok(IndexBuffer {
			indices: indices,
		})
	}

	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W) -> Result<(), LevelExportError>
	where
		W: WriteBytesExt,
	{
		buf.write_u32::<LE>(self.indices.len() as u32)?;

		let mut indices = self.indices.clone();
		swap_winding(&mut indices);
		for index in indices.iter() {
			buf.write_u16::<LE>(*index)?;
		}

		Ok(())
	}
}

/// One level-of-detail sub-range of an index buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlideWindow {
	pub offset: u32,
	pub triangles: u16,
	pub vertices: u16,
}

/// Sliding-window table of a progressive visual. The first window is
/// the full-resolution range; later windows shrink it.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SlidingWindows {
	pub windows: Vec<SlideWindow>,
}

impl SlidingWindows {
	#[cfg(feature = "import")]
	pub fn read<R>(buf: &mut R) -> Result<SlidingWindows, LevelImportError>
	where
		R: ReadBytesExt,
	{
		// four reserved words precede the table
		for _ in 0..4 {
			buf.read_u32::<LE>()?;
		}

		let count = buf.read_u32::<LE>()? as usize;
		let mut windows = Vec::with_capacity(count);
		for _ in 0..count {
			windows.push(SlideWindow {
				offset: buf.read_u32::<LE>()?,
				triangles: buf.read_u16::<LE>()?,
				vertices: buf.read_u16::<LE>()?,
			});
		}

		Ok(SlidingWindows {
			windows: windows,
		})
	}

	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W) -> Result<(), LevelExportError>
	where
		W: WriteBytesExt,
	{
		for _ in 0..4 {
			buf.write_u32::<LE>(0)?;
		}

		buf.write_u32::<LE>(self.windows.len() as u32)?;
		for window in self.windows.iter() {
			buf.write_u32::<LE>(window.offset)?;
			buf.write_u16::<LE>(window.triangles)?;
			buf.write_u16::<LE>(window.vertices)?;
		}

		Ok(())
	}

	/// Index sub-range of the highest-resolution window
	pub fn full_resolution(&self) -> Option<(usize, usize)> {
		self.windows
			.first()
			.map(|window| (window.offset as usize, window.triangles as usize * 3))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_index_buffer_round_trip_and_winding() {
		let buffer = IndexBuffer {
			indices: vec![0, 1, 2, 2, 1, 3],
		};

		let mut data = vec![];
		buffer.write(&mut data).unwrap();

		// on disk the second and third index of each triangle swap
		assert_eq!(&data[4..], &[0, 0, 2, 0, 1, 0, 2, 0, 3, 0, 1, 0]);
		assert_eq!(IndexBuffer::read(&mut data.as_slice()).unwrap(), buffer);
	}

	#[test]
	fn test_sliding_windows_round_trip() {
		let swis = SlidingWindows {
			windows: vec![
				SlideWindow {
					offset: 0,
					triangles: 128,
					vertices: 70,
				},
				SlideWindow {
					offset: 384,
					triangles: 64,
					vertices: 40,
				},
			],
		};

		let mut data = vec![];
		swis.write(&mut data).unwrap();
		assert_eq!(data.len(), 4 * 4 + 4 + 2 * 8);

		let back = SlidingWindows::read(&mut data.as_slice()).unwrap();
		assert_eq!(back, swis);
		assert_eq!(back.full_resolution(), Some((0, 384)));
	}
}
