use byteorder::{
	ByteOrder,
	LE
};

use thiserror::Error;

/// Reserved id bit marking a compressed chunk. Compression was never
/// finished upstream, so the bit is treated as an unsupported feature.
pub const COMPRESSED: u32 = 0x8000_0000;

#[derive(Error, Debug, PartialEq)]
pub enum ChunkError {
	#[error("Compressed chunks are not supported (id {0:#X})")]
	Compressed(u32),
	#[error("Expected chunk {expected:#X}, found {found:#X}")]
	Mismatch {
		expected: u32,
		found: u32,
	},
	#[error("Expected chunk {0:#X}, found end of container")]
	Missing(u32),
	#[error("Truncated chunk at offset {0}")]
	Truncated(usize),
}

/// A single tagged record inside a container. The payload borrows from
/// the container buffer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Chunk<'a> {
	pub id: u32,
	pub data: &'a [u8],
}

/// Iterator over the sibling chunks of one container.
#[derive(Clone, Copy, Debug)]
pub struct ChunkIter<'a> {
	data: &'a [u8],
	offset: usize,
}

impl<'a> ChunkIter<'a> {
	pub fn new(data: &'a [u8]) -> ChunkIter<'a> {
		ChunkIter {
			data: data,
			offset: 0,
		}
	}

	/// Byte offset of the next unread header.
	pub fn offset(&self) -> usize {
		self.offset
	}

	pub fn is_end(&self) -> bool {
		self.offset >= self.data.len()
	}

	/// Pops the next chunk, which must carry exactly the given id.
	/// Used for mandatory leading chunks such as version records.
	pub fn expect(&mut self, id: u32) -> Result<&'a [u8], ChunkError> {
		match self.next() {
			Some(Ok(chunk)) if chunk.id == id => Ok(chunk.data),
			Some(Ok(chunk)) => Err(ChunkError::Mismatch {
				expected: id,
				found: chunk.id,
			}),
			Some(Err(err)) => Err(err),
			None => Err(ChunkError::Missing(id)),
		}
	}
}

impl<'a> Iterator for ChunkIter<'a> {
	type Item = Result<Chunk<'a>, ChunkError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.is_end() {
			return None;
		}

		let rest = &self.data[self.offset..];
		if rest.len() < 8 {
			let at = self.offset;
			self.offset = self.data.len();
			return Some(Err(ChunkError::Truncated(at)));
		}

		let id = LE::read_u32(&rest[0..4]);
		if id & COMPRESSED != 0 {
			self.offset = self.data.len();
			return Some(Err(ChunkError::Compressed(id)));
		}

		let size = LE::read_u32(&rest[4..8]) as usize;
		if rest.len() < 8 + size {
			let at = self.offset;
			self.offset = self.data.len();
			return Some(Err(ChunkError::Truncated(at)));
		}

		self.offset += 8 + size;
		Some(Ok(Chunk {
			id: id,
			data: &rest[8..8 + size],
		}))
	}
}

/// Collects chunks into a flat byte buffer, in the order they are put.
/// No padding or alignment is inserted between chunks.
#[derive(Clone, Debug, Default)]
pub struct ChunkWriter {
	out: Vec<u8>,
}

impl ChunkWriter {
	pub fn new() -> ChunkWriter {
		ChunkWriter {
			out: vec![],
		}
	}

	pub fn put(&mut self, id: u32, payload: &[u8]) {
		self.out.extend_from_slice(&id.to_le_bytes());
		self.out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
		self.out.extend_from_slice(payload);
	}

	pub fn into_vec(self) -> Vec<u8> {
		self.out
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_round_trip_preserves_order() {
		let mut writer = ChunkWriter::new();
		writer.put(0x11, b"abc");
		writer.put(0x2, b"");
		writer.put(0x11, b"xy");
		let data = writer.into_vec();

		let chunks: Vec<_> = ChunkIter::new(&data)
			.collect::<Result<_, _>>()
			.unwrap();
		assert_eq!(chunks.len(), 3);
		assert_eq!((chunks[0].id, chunks[0].data), (0x11, &b"abc"[..]));
		assert_eq!((chunks[1].id, chunks[1].data), (0x2, &b""[..]));
		assert_eq!((chunks[2].id, chunks[2].data), (0x11, &b"xy"[..]));
	}

	#[test]
	fn test_compressed_bit_is_fatal() {
		let mut data = vec![];
		data.extend_from_slice(&0x8000_0001u32.to_le_bytes());
		data.extend_from_slice(&4u32.to_le_bytes());
		data.extend_from_slice(&[1, 2, 3, 4]);

		let mut iter = ChunkIter::new(&data);
		assert_eq!(
			iter.next(),
			Some(Err(ChunkError::Compressed(0x8000_0001)))
		);
		assert_eq!(iter.next(), None);
	}

	#[test]
	fn test_expect() {
		let mut writer = ChunkWriter::new();
		writer.put(0x1, &0x11u16.to_le_bytes());
		writer.put(0x5, b"body");
		let data = writer.into_vec();

		let mut iter = ChunkIter::new(&data);
		assert_eq!(iter.expect(0x1).unwrap(), &0x11u16.to_le_bytes());
		assert_eq!(
			iter.expect(0x6),
			Err(ChunkError::Mismatch {
				expected: 0x6,
				found: 0x5,
			})
		);
		assert_eq!(iter.expect(0x7), Err(ChunkError::Missing(0x7)));
	}

	#[test]
	fn test_truncated_payload() {
		let mut data = vec![];
		data.extend_from_slice(&0x3u32.to_le_bytes());
		data.extend_from_slice(&16u32.to_le_bytes());
		data.extend_from_slice(&[0; 4]);

		let mut iter = ChunkIter::new(&data);
		assert_eq!(iter.next(), Some(Err(ChunkError::Truncated(0))));
	}
}
