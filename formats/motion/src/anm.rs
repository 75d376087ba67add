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
	io_ext::{
		ReadXrExt,
		WriteXrExt
	}
};

use crate::envelope::Envelope;

#[cfg(feature = "import")]
use crate::motion::import::MotionImportError;

#[cfg(feature = "export")]
use crate::motion::export::MotionExportError;

pub const CHUNK_MAIN: u32 = 0x1100;
pub const VERSION: u16 = 5;

// translation channels land on disk in engine order
const CHANNEL_ORDER: [usize; 6] = [0, 2, 1, 3, 4, 5];

/// A standalone camera/object animation: six envelopes for translation
/// x/y/z and heading/pitch/bank rotation.
#[derive(Clone, Debug, PartialEq)]
pub struct Anim {
	pub name: String,
	pub range: (u32, u32),
	pub fps: f32,
	pub channels: [Envelope; 6],
}

impl Anim {
	#[cfg(feature = "import")]
	pub fn read(data: &[u8]) -> Result<Anim, MotionImportError> {
		let mut iter = ChunkIter::new(data);
		let body = iter.expect(CHUNK_MAIN)?;
		let mut buf = std::io::Cursor::new(body);

		let name = buf.read_cstr()?;
		let range = (buf.read_u32::<LE>()?, buf.read_u32::<LE>()?);
		let fps = buf.read_f32::<LE>()?;

		let version = buf.read_u16::<LE>()?;
		if version != VERSION {
			return Err(MotionImportError::Version(version));
		}

		let mut disk = Vec::with_capacity(6);
		for _ in 0..6 {
			disk.push(Envelope::read(&mut buf)?);
		}

		let mut channels: Vec<Envelope> = Vec::with_capacity(6);
		for i in 0..6 {
			channels.push(disk[CHANNEL_ORDER[i]].clone());
		}

		Ok(Anim {
			name: name,
			range: range,
			fps: fps,
			channels: channels.try_into().unwrap(),
		})
	}

	#[cfg(feature = "export")]
	pub fn write(&self) -> Result<Vec<u8>, MotionExportError> {
		let mut body = vec![];
		body.write_cstr(&self.name)?;
		body.write_u32::<LE>(self.range.0)?;
		body.write_u32::<LE>(self.range.1)?;
		body.write_f32::<LE>(self.fps)?;
		body.write_u16::<LE>(VERSION)?;

		for i in 0..6 {
			self.channels[CHANNEL_ORDER[i]].write(&mut body)?;
		}

		let mut writer = ChunkWriter::new();
		writer.put(CHUNK_MAIN, &body);
		Ok(writer.into_vec())
	}
}

#[cfg(test)]
mod tests {
	use crate::envelope::{
		Behaviour,
		KeyShape,
		RawKey
	};

	use super::*;

	fn channel(value: f32) -> Envelope {
		Envelope {
			behaviours: (Behaviour::Constant, Behaviour::Constant),
			keys: vec![RawKey {
				value: value,
				time: 0.0,
				shape: KeyShape::Linear,
				tension: 0.0,
				continuity: 0.0,
				bias: 0.0,
			}],
		}
	}

	#[test]
	fn test_anim_round_trip() {
		let anim = Anim {
			name: "flyby".to_string(),
			range: (0, 120),
			fps: 30.0,
			channels: [
				channel(1.0),
				channel(2.0),
				channel(3.0),
				channel(0.1),
				channel(0.2),
				channel(0.3),
			],
		};

		let data = anim.write().unwrap();
		let back = Anim::read(&data).unwrap();
		assert_eq!(back, anim);
	}

	#[test]
	fn test_anim_version_gate() {
		let anim = Anim {
			name: "x".to_string(),
			range: (0, 1),
			fps: 30.0,
			channels: [
				channel(0.0),
				channel(0.0),
				channel(0.0),
				channel(0.0),
				channel(0.0),
				channel(0.0),
			],
		};

		let mut data = anim.write().unwrap();
		// version word follows the chunk header, name, range and fps
		let at = 8 + 2 + 8 + 4;
		data[at] = 4;

		match Anim::read(&data) {
			Err(MotionImportError::Version(4)) => {},
			other => panic!("expected version error, got {:?}", other.err()),
		}
	}
}
