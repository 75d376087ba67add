use bitflags::bitflags;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use ultraviolet::{
	mat::Mat4,
	vec::{
		Vec3,
		Vec4
	}
};

use xrf_core::{
	chunk::{
		ChunkIter,
		ChunkWriter
	},
	diag::{
		Diagnostics,
		Warning
	},
	io_ext::{
		ReadXrExt,
		WriteXrExt
	},
	skeleton::{
		euler_zxy_from_mat4,
		mat4_rotation_zxy,
		Skeleton
	}
};

use crate::envelope::{
	Behaviour,
	Curve,
	CurveKey,
	Envelope,
	Interpolation
};

#[cfg(feature = "import")]
use import::MotionImportError;

#[cfg(feature = "export")]
use export::MotionExportError;

/// Base motion record version
pub const VERSION_BASE: u16 = 6;
/// Adds trailing marker lists, which are decoded and discarded
pub const VERSION_MARKS: u16 = 7;

/// Chunk id wrapping a single motion in a `.skl` file
pub const CHUNK_MOTION: u32 = 0x1200;

bitflags! {
	pub struct MotionFlags: u8 {
		const FX = 1;
		const STOP_AT_END = 2;
		const NO_MIX = 4;
		const SYNC_PART = 8;
	}
}

/// Six envelope channels of one bone: location x/y/z then rotation
/// x/y/z, already in authoring component order (the engine's Y/Z channel
/// swap is applied at read/write).
#[derive(Clone, Debug, PartialEq)]
pub struct BoneMotion {
	pub name: String,
	pub channels: [Envelope; 6],
}

/// One named motion: per-bone keyframe streams plus playback metadata.
/// Constructed wholesale from one packed record, never partially
/// mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct Motion {
	pub name: String,
	pub range: (u32, u32),
	pub fps: f32,
	pub flags: MotionFlags,
	pub bone_or_part: u16,
	pub speed: f32,
	pub accrue: f32,
	pub falloff: f32,
	pub power: f32,
	pub bones: Vec<BoneMotion>,
}

// on-disk channels are in engine order; 1 and 2 trade places within
// each triple
const CHANNEL_ORDER: [usize; 6] = [0, 2, 1, 3, 5, 4];

const CHANNEL_NAMES: [&str; 6] = ["loc.x", "loc.y", "loc.z", "rot.x", "rot.y", "rot.z"];

impl Motion {
	#[cfg(feature = "import")]
	pub fn read<R>(buf: &mut R, diag: &mut Diagnostics) -> Result<Motion, MotionImportError>
	where
		R: ReadBytesExt,
	{
		let name = buf.read_cstr()?;
		let range = (buf.read_u32::<LE>()?, buf.read_u32::<LE>()?);
		let fps = buf.read_f32::<LE>()?;

		let version = buf.read_u16::<LE>()?;
		if version != VERSION_BASE && version != VERSION_MARKS {
			return Err(MotionImportError::Version(version));
		}

		let flags = MotionFlags::from_bits_truncate(buf.read_u8()?);
		let bone_or_part = buf.read_u16::<LE>()?;
		let speed = buf.read_f32::<LE>()?;
		let accrue = buf.read_f32::<LE>()?;
		let falloff = buf.read_f32::<LE>()?;
		let power = buf.read_f32::<LE>()?;

		let count = buf.read_u16::<LE>()? as usize;
		let mut bones = Vec::with_capacity(count);

		for _ in 0..count {
			bones.push(BoneMotion::read(buf, &name, diag)?);
		}

		if version == VERSION_MARKS {
			// markers are not consumed by the animation surface, but the
			// stream must stay aligned
			let marks = buf.read_u32::<LE>()?;
			for _ in 0..marks {
				buf.read_cstr()?;
				let intervals = buf.read_u32::<LE>()?;
				for _ in 0..intervals {
					buf.read_f32::<LE>()?;
					buf.read_f32::<LE>()?;
				}
			}
		}

		Ok(Motion {
			name: name,
			range: range,
			fps: fps,
			flags: flags,
			bone_or_part: bone_or_part,
			speed: speed,
			accrue: accrue,
			falloff: falloff,
			power: power,
			bones: bones,
		})
	}

	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W) -> Result<(), MotionExportError>
	where
		W: WriteBytesExt,
	{
		buf.write_cstr(&self.name)?;
		buf.write_u32::<LE>(self.range.0)?;
		buf.write_u32::<LE>(self.range.1)?;
		buf.write_f32::<LE>(self.fps)?;
		buf.write_u16::<LE>(VERSION_BASE)?;
		buf.write_u8(self.flags.bits())?;
		buf.write_u16::<LE>(self.bone_or_part)?;
		buf.write_f32::<LE>(self.speed)?;
		buf.write_f32::<LE>(self.accrue)?;
		buf.write_f32::<LE>(self.falloff)?;
		buf.write_f32::<LE>(self.power)?;

		buf.write_u16::<LE>(self.bones.len() as u16)?;
		for bone in self.bones.iter() {
			bone.write(buf)?;
		}

		Ok(())
	}

	/// Samples every channel at each integer frame of the motion range
	/// and recomposes one pose-space matrix per bone per frame:
	/// the bone's inverse world bind times the animated world transform
	/// accumulated through the parent chain. Bones absent from the
	/// skeleton are reported once per name and dropped.
	#[cfg(feature = "import")]
	pub fn bake_pose(&self, skeleton: &Skeleton, diag: &mut Diagnostics) -> Vec<BonePose> {
		let mut animated: Vec<Option<[Curve; 6]>> = vec![None; skeleton.len()];

		for bone in self.bones.iter() {
			match skeleton.index_of(&bone.name) {
				Some(index) => {
					let mut curves = Vec::with_capacity(6);
					for (i, envelope) in bone.channels.iter().enumerate() {
						let context = format!("{}:{}/{}", self.name, bone.name, CHANNEL_NAMES[i]);
						curves.push(envelope.to_curve(self.fps, &context, diag));
					}
					animated[index] = Some(curves.try_into().unwrap());
				},
				None => diag.warn_once(Warning::BoneNotInSkeleton {
					motion: self.name.clone(),
					bone: bone.name.clone(),
				}),
			}
		}

		let frames = (self.range.0..=self.range.1).collect::<Vec<_>>();
		let inverse_binds = skeleton.inverse_binds();
		let mut poses: Vec<BonePose> = skeleton
			.bones()
			.iter()
			.enumerate()
			.filter(|(i, _)| animated[*i].is_some())
			.map(|(i, _)| BonePose {
				bone: i,
				matrices: Vec::with_capacity(frames.len()),
			})
			.collect();

		for frame in frames.iter() {
			let f = *frame as f32;
			let mut world = vec![Mat4::identity(); skeleton.len()];

			for (index, bone) in skeleton.bones().iter().enumerate() {
				let local = match &animated[index] {
					Some(curves) => {
						let loc = Vec3::new(
							curves[0].evaluate(f),
							curves[1].evaluate(f),
							curves[2].evaluate(f),
						);
						let rot = Vec3::new(
							curves[3].evaluate(f),
							curves[4].evaluate(f),
							curves[5].evaluate(f),
						);
						Mat4::from_translation(loc) * mat4_rotation_zxy(rot)
					},
					None => bone.local_bind(),
				};

				world[index] = match bone.parent {
					Some(parent) => world[parent] * local,
					None => local,
				};
			}

			for pose in poses.iter_mut() {
				pose.matrices.push(inverse_binds[pose.bone] * world[pose.bone]);
			}
		}

		poses
	}

	/// Builds a motion from per-bone curves, normalizing every rotation
	/// representation to the three-channel ZXY Euler convention.
	#[cfg(feature = "export")]
	pub fn from_bone_curves(
		name: &str,
		range: (u32, u32),
		fps: f32,
		bones: Vec<BoneCurves>,
		epsilon: ChannelEpsilon,
		diag: &mut Diagnostics,
	) -> Result<Motion, MotionExportError> {
		let mut out = Vec::with_capacity(bones.len());

		for bone in bones.into_iter() {
			let rotation = export::normalize_rotation(&bone.name, &bone.rotation, range)?;
			let mut channels = Vec::with_capacity(6);

			for (i, curve) in bone.location.iter().chain(rotation.iter()).enumerate() {
				let context = format!("{}:{}/{}", name, bone.name, CHANNEL_NAMES[i]);
				let eps = if i < 3 {
					epsilon.location
				} else {
					epsilon.rotation
				};
				channels.push(curve.to_envelope(fps, eps, &context, diag));
			}

			out.push(BoneMotion {
				name: bone.name,
				channels: channels.try_into().unwrap(),
			});
		}

		Ok(Motion {
			name: name.to_string(),
			range: range,
			fps: fps,
			flags: MotionFlags::empty(),
			bone_or_part: u16::MAX,
			speed: 1.0,
			accrue: 2.0,
			falloff: 2.0,
			power: 1.0,
			bones: out,
		})
	}

	/// Builds a motion by baking per-frame world poses into local
	/// channels. `samples` holds one world matrix per frame of `range`
	/// for each sampled bone; bones whose nearest exportable ancestor is
	/// unsampled fall back to that ancestor's bind pose.
	#[cfg(feature = "export")]
	pub fn from_world_samples(
		name: &str,
		range: (u32, u32),
		fps: f32,
		skeleton: &Skeleton,
		samples: &[BoneWorldSamples],
		epsilon: ChannelEpsilon,
		diag: &mut Diagnostics,
	) -> Result<Motion, MotionExportError> {
		let frames = (range.1 - range.0 + 1) as usize;
		let mut by_index: Vec<Option<&BoneWorldSamples>> = vec![None; skeleton.len()];

		for sample in samples.iter() {
			let index = skeleton
				.index_of(&sample.name)
				.ok_or_else(|| MotionExportError::BoneNotFound(sample.name.clone()))?;
			by_index[index] = Some(sample);
		}

		let mut bones = vec![];
		for (index, bone) in skeleton.bones().iter().enumerate() {
			let sample = match by_index[index] {
				Some(sample) if bone.exportable => sample,
				_ => continue,
			};

			let ancestor = skeleton.find_exportable_ancestor(index);
			let mut keys: [Vec<CurveKey>; 6] = [vec![], vec![], vec![], vec![], vec![], vec![]];

			for frame in 0..frames {
				let world = sample.matrices[frame];
				let parent = match ancestor {
					Some(a) => match by_index[a] {
						Some(s) => s.matrices[frame],
						None => skeleton.world_bind(a),
					},
					None => Mat4::identity(),
				};

				let local = parent.inversed() * world;
				let loc = Vec3::new(local.cols[3].x, local.cols[3].y, local.cols[3].z);
				let rot = euler_zxy_from_mat4(&local);

				let f = (range.0 + frame as u32) as f32;
				for (channel, value) in [loc.x, loc.y, loc.z, rot.x, rot.y, rot.z]
					.into_iter()
					.enumerate()
				{
					keys[channel].push(CurveKey {
						frame: f,
						value: value,
						interpolation: Interpolation::Linear,
					});
				}
			}

			let mut channels = Vec::with_capacity(6);
			for (i, keys) in keys.into_iter().enumerate() {
				let context = format!("{}:{}/{}", name, bone.name, CHANNEL_NAMES[i]);
				let eps = if i < 3 {
					epsilon.location
				} else {
					epsilon.rotation
				};
				let curve = Curve {
					extrapolation: crate::envelope::Extrapolation::Constant,
					keys: keys,
				};
				channels.push(curve.to_envelope(fps, eps, &context, diag));
			}

			bones.push(BoneMotion {
				name: bone.name.clone(),
				channels: channels.try_into().unwrap(),
			});
		}

		Ok(Motion {
			name: name.to_string(),
			range: range,
			fps: fps,
			flags: MotionFlags::empty(),
			bone_or_part: u16::MAX,
			speed: 1.0,
			accrue: 2.0,
			falloff: 2.0,
			power: 1.0,
			bones: bones,
		})
	}
}

impl BoneMotion {
	#[cfg(feature = "import")]
	fn read<R>(buf: &mut R, motion: &str, diag: &mut Diagnostics) -> Result<BoneMotion, MotionImportError>
	where
		R: ReadBytesExt,
	{
		let name = buf.read_cstr()?;

		let flags = buf.read_u8()?;
		if flags != 0 {
			// unknown meaning; reported, never silently dropped
			diag.warn(Warning::NonZeroBoneFlags {
				bone: format!("{}:{}", motion, name),
				value: flags,
			});
		}

		let mut disk = Vec::with_capacity(6);
		for _ in 0..6 {
			let envelope = Envelope::read(buf)?;
			if envelope.behaviours != (Behaviour::Repeat, Behaviour::Repeat) {
				diag.warn(Warning::ChannelBehaviour {
					context: format!("{}:{}", motion, name),
					pre: envelope.behaviours.0 as u8,
					post: envelope.behaviours.1 as u8,
				});
			}
			disk.push(envelope);
		}

		let mut channels: Vec<Envelope> = Vec::with_capacity(6);
		for i in 0..6 {
			channels.push(disk[CHANNEL_ORDER[i]].clone());
		}

		Ok(BoneMotion {
			name: name,
			channels: channels.try_into().unwrap(),
		})
	}

	#[cfg(feature = "export")]
	fn write<W>(&self, buf: &mut W) -> Result<(), MotionExportError>
	where
		W: WriteBytesExt,
	{
		buf.write_cstr(&self.name)?;
		buf.write_u8(0)?;

		// CHANNEL_ORDER is an involution, so the same table serializes
		for i in 0..6 {
			self.channels[CHANNEL_ORDER[i]].write(buf)?;
		}

		Ok(())
	}
}

/// Pose-space matrices of one skeleton bone, one per sampled frame.
#[derive(Clone, Debug)]
pub struct BonePose {
	pub bone: usize,
	pub matrices: Vec<Mat4>,
}

/// Per-frame world pose matrices supplied by the caller for baked
/// export.
#[derive(Clone, Debug)]
pub struct BoneWorldSamples {
	pub name: String,
	pub matrices: Vec<Mat4>,
}

/// Key-reduction tolerances, overridable separately for location and
/// rotation channels.
#[derive(Clone, Copy, Debug)]
pub struct ChannelEpsilon {
	pub location: f32,
	pub rotation: f32,
}

impl Default for ChannelEpsilon {
	fn default() -> Self {
		Self {
			location: crate::envelope::DEFAULT_EPSILON,
			rotation: crate::envelope::DEFAULT_EPSILON,
		}
	}
}

/// Host rotation curves in whatever representation the bone uses.
#[derive(Clone, Debug)]
pub enum RotationCurves {
	EulerZxy([Curve; 3]),
	EulerXyz([Curve; 3]),
	EulerYxz([Curve; 3]),
	/// w, x, y, z channel order
	Quaternion([Curve; 4]),
	/// Anything the codec cannot normalize; always a fatal export error
	Other(String),
}

#[derive(Clone, Debug)]
pub struct BoneCurves {
	pub name: String,
	pub location: [Curve; 3],
	pub rotation: RotationCurves,
}

/// Reads a `.skl` file: one motion wrapped in its chunk.
#[cfg(feature = "import")]
pub fn read_skl(data: &[u8], diag: &mut Diagnostics) -> Result<Motion, MotionImportError> {
	let mut iter = ChunkIter::new(data);
	let body = iter.expect(CHUNK_MOTION)?;
	Motion::read(&mut std::io::Cursor::new(body), diag)
}

/// Writes a `.skl` file.
#[cfg(feature = "export")]
pub fn write_skl(motion: &Motion) -> Result<Vec<u8>, MotionExportError> {
	let mut body = vec![];
	motion.write(&mut body)?;

	let mut writer = ChunkWriter::new();
	writer.put(CHUNK_MOTION, &body);
	Ok(writer.into_vec())
}

/// Reads a `.skls` motion collection: a count-prefixed packed list.
#[cfg(feature = "import")]
pub fn read_skls(data: &[u8], diag: &mut Diagnostics) -> Result<Vec<Motion>, MotionImportError> {
	let mut buf = std::io::Cursor::new(data);
	let count = buf.read_u32::<LE>()? as usize;
	let mut motions = Vec::with_capacity(count);

	for _ in 0..count {
		motions.push(Motion::read(&mut buf, diag)?);
	}

	Ok(motions)
}

/// Writes a `.skls` motion collection.
#[cfg(feature = "export")]
pub fn write_skls(motions: &[Motion]) -> Result<Vec<u8>, MotionExportError> {
	let mut out = vec![];
	out.write_u32::<LE>(motions.len() as u32)
		.map_err(MotionExportError::from)?;

	for motion in motions.iter() {
		motion.write(&mut out)?;
	}

	Ok(out)
}

#[cfg(feature = "export")]
fn quat_to_mat4(w: f32, x: f32, y: f32, z: f32) -> Mat4 {
	let n = (w * w + x * x + y * y + z * z).sqrt();
	let (w, x, y, z) = if n > 0.0 {
		(w / n, x / n, y / n, z / n)
	} else {
		(1.0, 0.0, 0.0, 0.0)
	};

	Mat4::new(
		Vec4::new(
			1.0 - 2.0 * (y * y + z * z),
			2.0 * (x * y + w * z),
			2.0 * (x * z - w * y),
			0.0,
		),
		Vec4::new(
			2.0 * (x * y - w * z),
			1.0 - 2.0 * (x * x + z * z),
			2.0 * (y * z + w * x),
			0.0,
		),
		Vec4::new(
			2.0 * (x * z + w * y),
			2.0 * (y * z - w * x),
			1.0 - 2.0 * (x * x + y * y),
			0.0,
		),
		Vec4::new(0.0, 0.0, 0.0, 1.0),
	)
}

#[cfg(feature = "import")]
pub mod import {
	use std::io;
	use thiserror::Error;

	use xrf_core::chunk::ChunkError;

	use crate::envelope::import::EnvelopeImportError;

	#[derive(Error, Debug)]
	pub enum MotionImportError {
		#[error("Chunk error")]
		Chunk {
			#[from]
			source: ChunkError,
		},
		#[error("Envelope error")]
		Envelope {
			#[from]
			source: EnvelopeImportError,
		},
		#[error("I/O error")]
		IO {
			#[from]
			source: io::Error,
		},
		#[error("Unsupported motion version {0}")]
		Version(u16),
	}
}

#[cfg(feature = "export")]
pub mod export {
	use std::io;
	use thiserror::Error;

	use ultraviolet::{
		mat::Mat4,
		vec::Vec3
	};

	use xrf_core::{
		io_ext::StringError,
		skeleton::euler_zxy_from_mat4
	};

	use crate::envelope::{
		Curve,
		CurveKey,
		Extrapolation,
		Interpolation
	};

	use super::{
		quat_to_mat4,
		RotationCurves
	};

	#[derive(Error, Debug)]
	pub enum MotionExportError {
		#[error("Bone {0:?} is not present in the skeleton")]
		BoneNotFound(String),
		#[error("I/O error")]
		IO {
			#[from]
			source: io::Error,
		},
		#[error("String error")]
		String {
			#[from]
			source: StringError,
		},
		#[error("Bone {bone:?} uses unsupported rotation mode {mode:?}")]
		UnsupportedRotationMode {
			bone: String,
			mode: String,
		},
	}

	/// Normalizes any supported rotation representation to ZXY Euler
	/// channels. Non-ZXY representations are resampled at every integer
	/// frame of the range; there is no safe substitute for an unknown
	/// representation, so that case is fatal.
	pub fn normalize_rotation(
		bone: &str,
		rotation: &RotationCurves,
		range: (u32, u32),
	) -> Result<[Curve; 3], MotionExportError> {
		match rotation {
			RotationCurves::EulerZxy(curves) => Ok(curves.clone()),
			RotationCurves::EulerXyz(curves) => Ok(resample(range, |f| {
				let (x, y, z) = (
					curves[0].evaluate(f),
					curves[1].evaluate(f),
					curves[2].evaluate(f),
				);
				Mat4::from_rotation_x(x) * Mat4::from_rotation_y(y) * Mat4::from_rotation_z(z)
			})),
			RotationCurves::EulerYxz(curves) => Ok(resample(range, |f| {
				let (x, y, z) = (
					curves[0].evaluate(f),
					curves[1].evaluate(f),
					curves[2].evaluate(f),
				);
				Mat4::from_rotation_y(y) * Mat4::from_rotation_x(x) * Mat4::from_rotation_z(z)
			})),
			RotationCurves::Quaternion(curves) => Ok(resample(range, |f| {
				quat_to_mat4(
					curves[0].evaluate(f),
					curves[1].evaluate(f),
					curves[2].evaluate(f),
					curves[3].evaluate(f),
				)
			})),
			RotationCurves::Other(mode) => Err(MotionExportError::UnsupportedRotationMode {
				bone: bone.to_string(),
				mode: mode.clone(),
			}),
		}
	}

	fn resample<F>(range: (u32, u32), mut matrix_at: F) -> [Curve; 3]
	where
		F: FnMut(f32) -> Mat4,
	{
		let mut channels: [Vec<CurveKey>; 3] = [vec![], vec![], vec![]];

		for frame in range.0..=range.1 {
			let euler: Vec3 = euler_zxy_from_mat4(&matrix_at(frame as f32));
			for (channel, value) in [euler.x, euler.y, euler.z].into_iter().enumerate() {
				channels[channel].push(CurveKey {
					frame: frame as f32,
					value: value,
					interpolation: Interpolation::Linear,
				});
			}
		}

		channels.map(|keys| Curve {
			extrapolation: Extrapolation::Constant,
			keys: keys,
		})
	}
}

#[cfg(test)]
mod tests {
	use ultraviolet::vec::Vec3;

	use xrf_core::{
		diag::Diagnostics,
		skeleton::{
			BindBone,
			Skeleton
		}
	};

	use crate::envelope::{
		Behaviour,
		Envelope,
		KeyShape,
		RawKey
	};

	use super::*;

	fn flat_envelope(value: f32) -> Envelope {
		Envelope {
			behaviours: (Behaviour::Repeat, Behaviour::Repeat),
			keys: vec![
				RawKey {
					value: value,
					time: 0.0,
					shape: KeyShape::Linear,
					tension: 0.0,
					continuity: 0.0,
					bias: 0.0,
				},
				RawKey {
					value: value,
					time: 1.0,
					shape: KeyShape::Linear,
					tension: 0.0,
					continuity: 0.0,
					bias: 0.0,
				},
			],
		}
	}

	fn test_motion() -> Motion {
		Motion {
			name: "walk".to_string(),
			range: (0, 30),
			fps: 30.0,
			flags: MotionFlags::FX | MotionFlags::NO_MIX,
			bone_or_part: u16::MAX,
			speed: 1.0,
			accrue: 2.0,
			falloff: 2.0,
			power: 1.0,
			bones: vec![BoneMotion {
				name: "root".to_string(),
				channels: [
					flat_envelope(1.0),
					flat_envelope(2.0),
					flat_envelope(3.0),
					flat_envelope(0.0),
					flat_envelope(0.0),
					flat_envelope(0.0),
				],
			}],
		}
	}

	fn one_bone_skeleton() -> Skeleton {
		let mut skeleton = Skeleton::new();
		skeleton
			.push(BindBone {
				name: "root".to_string(),
				parent: None,
				exportable: true,
				offset: Vec3::zero(),
				rotate: Vec3::zero(),
				length: 1.0,
			})
			.unwrap();
		skeleton
	}

	#[test]
	fn test_motion_round_trip() {
		let motion = test_motion();

		let mut out = vec![];
		motion.write(&mut out).unwrap();

		let mut diag = Diagnostics::new();
		let back = Motion::read(&mut std::io::Cursor::new(&out), &mut diag).unwrap();

		assert!(diag.is_empty());
		assert_eq!(back, motion);
	}

	#[test]
	fn test_skl_round_trip() {
		let motion = test_motion();
		let data = write_skl(&motion).unwrap();

		let mut diag = Diagnostics::new();
		let back = read_skl(&data, &mut diag).unwrap();
		assert_eq!(back, motion);
	}

	#[test]
	fn test_skls_round_trip() {
		let motions = vec![test_motion(), test_motion()];
		let data = write_skls(&motions).unwrap();

		let mut diag = Diagnostics::new();
		let back = read_skls(&data, &mut diag).unwrap();
		assert_eq!(back, motions);
	}

	#[test]
	fn test_version_gate() {
		let motion = test_motion();
		let mut out = vec![];
		motion.write(&mut out).unwrap();

		// corrupt the version word, which sits after name, range and fps
		let at = motion.name.len() + 1 + 8 + 4;
		out[at] = 99;
		out[at + 1] = 0;

		let mut diag = Diagnostics::new();
		match Motion::read(&mut std::io::Cursor::new(&out), &mut diag) {
			Err(MotionImportError::Version(99)) => {},
			other => panic!("expected version error, got {:?}", other.err()),
		}
	}

	#[test]
	fn test_marks_are_skipped() {
		let motion = test_motion();
		let mut out = vec![];
		motion.write(&mut out).unwrap();

		// rewrite as the marks version and append one marker
		let at = motion.name.len() + 1 + 8 + 4;
		out[at] = VERSION_MARKS as u8;
		out.extend_from_slice(&1u32.to_le_bytes());
		out.extend_from_slice(b"step\x00");
		out.extend_from_slice(&2u32.to_le_bytes());
		for v in [0.0f32, 0.5, 0.5, 1.0] {
			out.extend_from_slice(&v.to_le_bytes());
		}

		let mut diag = Diagnostics::new();
		let back = Motion::read(&mut std::io::Cursor::new(&out), &mut diag).unwrap();
		assert_eq!(back.bones, motion.bones);
	}

	#[test]
	fn test_missing_bone_reported_once() {
		let mut motion = test_motion();
		motion.bones[0].name = "tail".to_string();

		let skeleton = one_bone_skeleton();
		let mut diag = Diagnostics::new();
		let poses = motion.bake_pose(&skeleton, &mut diag);

		assert!(poses.is_empty());
		assert_eq!(diag.warnings().len(), 1);
	}

	#[test]
	fn test_bake_pose_translation() {
		let motion = test_motion();
		let skeleton = one_bone_skeleton();

		let mut diag = Diagnostics::new();
		let poses = motion.bake_pose(&skeleton, &mut diag);

		assert_eq!(poses.len(), 1);
		assert_eq!(poses[0].matrices.len(), 31);

		// root bone with identity bind: pose matrix carries the channel
		// translation directly
		let m = poses[0].matrices[0];
		assert!((m.cols[3].x - 1.0).abs() < 1e-6);
		assert!((m.cols[3].y - 2.0).abs() < 1e-6);
		assert!((m.cols[3].z - 3.0).abs() < 1e-6);
	}

	#[test]
	fn test_unsupported_rotation_mode_is_fatal() {
		let mut diag = Diagnostics::new();
		let result = Motion::from_bone_curves(
			"wave",
			(0, 10),
			30.0,
			vec![BoneCurves {
				name: "root".to_string(),
				location: [
					Curve {
						extrapolation: crate::envelope::Extrapolation::Constant,
						keys: vec![],
					},
					Curve {
						extrapolation: crate::envelope::Extrapolation::Constant,
						keys: vec![],
					},
					Curve {
						extrapolation: crate::envelope::Extrapolation::Constant,
						keys: vec![],
					},
				],
				rotation: RotationCurves::Other("AXIS_ANGLE".to_string()),
			}],
			ChannelEpsilon::default(),
			&mut diag,
		);

		match result {
			Err(MotionExportError::UnsupportedRotationMode { bone, mode }) => {
				assert_eq!(bone, "root");
				assert_eq!(mode, "AXIS_ANGLE");
			},
			other => panic!("expected rotation mode error, got {:?}", other.err()),
		}
	}

	#[test]
	fn test_quaternion_normalized_to_euler() {
		let half_turn = std::f32::consts::FRAC_PI_4;
		let hold = |value: f32| Curve {
			extrapolation: crate::envelope::Extrapolation::Constant,
			keys: vec![CurveKey {
				frame: 0.0,
				value: value,
				interpolation: Interpolation::Linear,
			}],
		};

		// rotation of pi/2 around Z
		let curves = RotationCurves::Quaternion([
			hold(half_turn.cos()),
			hold(0.0),
			hold(0.0),
			hold(half_turn.sin()),
		]);

		let normalized = export::normalize_rotation("root", &curves, (0, 1)).unwrap();
		assert!((normalized[2].evaluate(0.0) - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
		assert!(normalized[0].evaluate(0.0).abs() < 1e-5);
		assert!(normalized[1].evaluate(0.0).abs() < 1e-5);
	}
}
