use bitflags::bitflags;

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
	diag::{
		Diagnostics,
		Warning
	},
	io_ext::{
		ReadXrExt,
		WriteXrExt
	},
	skeleton::{
		BindBone,
		Skeleton
	}
};

#[cfg(feature = "import")]
use crate::object::import::ObjectImportError;

#[cfg(feature = "export")]
use crate::object::export::ObjectExportError;

/// The only supported per-bone record version
pub const VERSION: u16 = 0x2;

pub mod chunks {
	pub const VERSION: u32 = 0x1;
	pub const DEF: u32 = 0x2;
	pub const BIND_POSE: u32 = 0x3;
	pub const MATERIAL: u32 = 0x4;
	pub const SHAPE: u32 = 0x5;
	pub const IK_JOINT: u32 = 0x6;
	pub const IK_FLAGS: u32 = 0x7;
	pub const BREAK_PARAMS: u32 = 0x8;
	pub const FRICTION: u32 = 0x9;
	pub const MASS: u32 = 0xA;
}

bitflags! {
	#[derive(Default)]
	pub struct ShapeFlags: u16 {
		const NO_PICKABLE = 1;
		const NO_PHYSICS = 2;
		const REMOVE_AFTER_BREAK = 4;
		const NO_FOG_COLLIDER = 8;
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ShapeKind {
	#[default]
	None,
	Box,
	Sphere,
	Cylinder,
}

impl ShapeKind {
	fn tag(self) -> u16 {
		match self {
			ShapeKind::None => 0,
			ShapeKind::Box => 1,
			ShapeKind::Sphere => 2,
			ShapeKind::Cylinder => 3,
		}
	}

	/// Maps a stored tag to a variant. Unknown tags keep the default and
	/// hand the decision back to the caller as a warning.
	fn from_tag(tag: u16, bone: &str, diag: &mut Diagnostics) -> ShapeKind {
		match tag {
			0 => ShapeKind::None,
			1 => ShapeKind::Box,
			2 => ShapeKind::Sphere,
			3 => ShapeKind::Cylinder,
			_ => {
				diag.warn(Warning::UnknownShapeType {
					bone: bone.to_string(),
					tag: tag,
				});
				ShapeKind::default()
			},
		}
	}
}

/// Oriented box: a 3x3 rotation basis plus center and half extents.
/// Shape geometry stays in engine component order; only the bind pose
/// and mass center cross the axis-swap boundary.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Obb {
	pub rotate: [Vec3; 3],
	pub translate: Vec3,
	pub half_size: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Sphere {
	pub center: Vec3,
	pub radius: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Cylinder {
	pub center: Vec3,
	pub direction: Vec3,
	pub height: f32,
	pub radius: f32,
}

/// Physics shape record. All three parameter blocks are present on disk
/// regardless of the active kind, so all three are kept in memory.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BoneShape {
	pub kind: ShapeKind,
	pub flags: ShapeFlags,
	pub obb: Obb,
	pub sphere: Sphere,
	pub cylinder: Cylinder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JointKind {
	#[default]
	Rigid,
	Cloth,
	Joint,
	Wheel,
	None,
	Slider,
}

impl JointKind {
	fn tag(self) -> u32 {
		match self {
			JointKind::Rigid => 0,
			JointKind::Cloth => 1,
			JointKind::Joint => 2,
			JointKind::Wheel => 3,
			JointKind::None => 4,
			JointKind::Slider => 5,
		}
	}

	fn from_tag(tag: u32, bone: &str, diag: &mut Diagnostics) -> JointKind {
		match tag {
			0 => JointKind::Rigid,
			1 => JointKind::Cloth,
			2 => JointKind::Joint,
			3 => JointKind::Wheel,
			4 => JointKind::None,
			5 => JointKind::Slider,
			_ => {
				diag.warn(Warning::UnknownJointType {
					bone: bone.to_string(),
					tag: tag,
				});
				JointKind::default()
			},
		}
	}
}

/// Rotation limit for one joint axis
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct JointAxis {
	pub min: f32,
	pub max: f32,
	pub spring: f32,
	pub damping: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BoneJoint {
	pub kind: JointKind,
	pub axes: [JointAxis; 3],
	pub spring: f32,
	pub damping: f32,
}

/// One fully decoded bone record
#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
	pub name: String,
	pub parent: Option<String>,
	pub vmap: String,
	pub offset: Vec3,
	pub rotate: Vec3,
	pub length: f32,
	pub material: String,
	pub shape: BoneShape,
	pub joint: BoneJoint,
	pub ik_flags: u32,
	pub break_force: f32,
	pub break_torque: f32,
	pub friction: f32,
	pub mass: f32,
	pub center_of_mass: Vec3,
}

impl Default for Bone {
	fn default() -> Bone {
		Bone {
			name: String::new(),
			parent: None,
			vmap: String::new(),
			offset: Vec3::zero(),
			rotate: Vec3::zero(),
			length: 0.5,
			material: "default_object".to_string(),
			shape: BoneShape::default(),
			joint: BoneJoint::default(),
			ik_flags: 0,
			break_force: 0.0,
			break_torque: 0.0,
			friction: 0.0,
			mass: 10.0,
			center_of_mass: Vec3::zero(),
		}
	}
}

impl Bone {
	/// Reads a modern per-bone sub-chunk container.
	#[cfg(feature = "import")]
	pub fn read(data: &[u8], diag: &mut Diagnostics) -> Result<Bone, ObjectImportError> {
		let mut iter = ChunkIter::new(data);

		let version_data = iter.expect(chunks::VERSION)?;
		let version = version_data.as_ref().read_u16::<LE>()?;
		if version != VERSION {
			return Err(ObjectImportError::BoneVersion(version));
		}

		let mut bone = Bone::default();
		for chunk in iter {
			let chunk = chunk?;
			let mut buf = std::io::Cursor::new(chunk.data);

			match chunk.id {
				chunks::DEF => {
					bone.name = buf.read_cstr()?;
					let parent = buf.read_cstr()?;
					bone.parent = if parent.is_empty() { None } else { Some(parent) };
					bone.vmap = buf.read_cstr()?;
				},
				chunks::BIND_POSE => {
					bone.offset = buf.read_vec3_swapped()?;
					bone.rotate = buf.read_vec3_swapped()?;
					bone.length = buf.read_f32::<LE>()?;
				},
				chunks::MATERIAL => bone.material = buf.read_cstr()?,
				chunks::SHAPE => bone.shape = read_shape(&mut buf, &bone.name, diag)?,
				chunks::IK_JOINT => bone.joint = read_joint(&mut buf, &bone.name, diag)?,
				chunks::IK_FLAGS => bone.ik_flags = buf.read_u32::<LE>()?,
				chunks::BREAK_PARAMS => {
					bone.break_force = buf.read_f32::<LE>()?;
					bone.break_torque = buf.read_f32::<LE>()?;
				},
				chunks::FRICTION => bone.friction = buf.read_f32::<LE>()?,
				chunks::MASS => {
					bone.mass = buf.read_f32::<LE>()?;
					bone.center_of_mass = buf.read_vec3_swapped()?;
				},
				other => log::debug!("bone {:?}: unhandled chunk {:#X}", bone.name, other),
			}
		}

		Ok(bone)
	}

	/// Reads one record of the legacy flat bone array. Legacy files carry
	/// no physics data, so those fields keep their defaults.
	#[cfg(feature = "import")]
	pub fn read_legacy<R>(buf: &mut R) -> Result<Bone, ObjectImportError>
	where
		R: ReadBytesExt,
	{
		let name = buf.read_cstr()?;
		let parent = buf.read_cstr()?;
		let vmap = buf.read_cstr()?;

		Ok(Bone {
			name: name,
			parent: if parent.is_empty() { None } else { Some(parent) },
			vmap: vmap,
			offset: buf.read_vec3_swapped()?,
			rotate: buf.read_vec3_swapped()?,
			length: buf.read_f32::<LE>()?,
			..Bone::default()
		})
	}

	#[cfg(feature = "export")]
	pub fn write(&self) -> Result<Vec<u8>, ObjectExportError> {
		let mut writer = ChunkWriter::new();
		writer.put(chunks::VERSION, &VERSION.to_le_bytes());

		let mut body = vec![];
		body.write_cstr(&self.name)?;
		body.write_cstr(self.parent.as_deref().unwrap_or(""))?;
		body.write_cstr(&self.vmap)?;
		writer.put(chunks::DEF, &body);

		let mut body = vec![];
		body.write_vec3_swapped(self.offset)?;
		body.write_vec3_swapped(self.rotate)?;
		body.write_f32::<LE>(self.length)?;
		writer.put(chunks::BIND_POSE, &body);

		let mut body = vec![];
		body.write_cstr(&self.material)?;
		writer.put(chunks::MATERIAL, &body);

		let mut body = vec![];
		write_shape(&mut body, &self.shape)?;
		writer.put(chunks::SHAPE, &body);

		let mut body = vec![];
		write_joint(&mut body, &self.joint)?;
		writer.put(chunks::IK_JOINT, &body);

		writer.put(chunks::IK_FLAGS, &self.ik_flags.to_le_bytes());

		let mut body = vec![];
		body.write_f32::<LE>(self.break_force)?;
		body.write_f32::<LE>(self.break_torque)?;
		writer.put(chunks::BREAK_PARAMS, &body);

		writer.put(chunks::FRICTION, &self.friction.to_le_bytes());

		let mut body = vec![];
		body.write_f32::<LE>(self.mass)?;
		body.write_vec3_swapped(self.center_of_mass)?;
		writer.put(chunks::MASS, &body);

		Ok(writer.into_vec())
	}
}

#[cfg(feature = "import")]
fn read_shape<R>(buf: &mut R, bone: &str, diag: &mut Diagnostics) -> Result<BoneShape, ObjectImportError>
where
	R: ReadBytesExt,
{
	let kind = ShapeKind::from_tag(buf.read_u16::<LE>()?, bone, diag);
	let flags = ShapeFlags::from_bits_truncate(buf.read_u16::<LE>()?);

	let obb = Obb {
		rotate: [buf.read_vec3()?, buf.read_vec3()?, buf.read_vec3()?],
		translate: buf.read_vec3()?,
		half_size: buf.read_vec3()?,
	};
	let sphere = Sphere {
		center: buf.read_vec3()?,
		radius: buf.read_f32::<LE>()?,
	};
	let cylinder = Cylinder {
		center: buf.read_vec3()?,
		direction: buf.read_vec3()?,
		height: buf.read_f32::<LE>()?,
		radius: buf.read_f32::<LE>()?,
	};

	Ok(BoneShape {
		kind: kind,
		flags: flags,
		obb: obb,
		sphere: sphere,
		cylinder: cylinder,
	})
}

#[cfg(feature = "export")]
fn write_shape<W>(buf: &mut W, shape: &BoneShape) -> Result<(), ObjectExportError>
where
	W: WriteBytesExt,
{
	buf.write_u16::<LE>(shape.kind.tag())?;
	buf.write_u16::<LE>(shape.flags.bits())?;

	for axis in shape.obb.rotate.iter() {
		buf.write_vec3(*axis)?;
	}
	buf.write_vec3(shape.obb.translate)?;
	buf.write_vec3(shape.obb.half_size)?;

	buf.write_vec3(shape.sphere.center)?;
	buf.write_f32::<LE>(shape.sphere.radius)?;

	buf.write_vec3(shape.cylinder.center)?;
	buf.write_vec3(shape.cylinder.direction)?;
	buf.write_f32::<LE>(shape.cylinder.height)?;
	buf.write_f32::<LE>(shape.cylinder.radius)?;
	Ok(())
}

#[cfg(feature = "import")]
fn read_joint<R>(buf: &mut R, bone: &str, diag: &mut Diagnostics) -> Result<BoneJoint, ObjectImportError>
where
	R: ReadBytesExt,
{
	let kind = JointKind::from_tag(buf.read_u32::<LE>()?, bone, diag);

	let mut axes = [JointAxis::default(); 3];
	for axis in axes.iter_mut() {
		axis.min = buf.read_f32::<LE>()?;
		axis.max = buf.read_f32::<LE>()?;
		axis.spring = buf.read_f32::<LE>()?;
		axis.damping = buf.read_f32::<LE>()?;
	}

	Ok(BoneJoint {
		kind: kind,
		axes: axes,
		spring: buf.read_f32::<LE>()?,
		damping: buf.read_f32::<LE>()?,
	})
}

#[cfg(feature = "export")]
fn write_joint<W>(buf: &mut W, joint: &BoneJoint) -> Result<(), ObjectExportError>
where
	W: WriteBytesExt,
{
	buf.write_u32::<LE>(joint.kind.tag())?;

	for axis in joint.axes.iter() {
		buf.write_f32::<LE>(axis.min)?;
		buf.write_f32::<LE>(axis.max)?;
		buf.write_f32::<LE>(axis.spring)?;
		buf.write_f32::<LE>(axis.damping)?;
	}

	buf.write_f32::<LE>(joint.spring)?;
	buf.write_f32::<LE>(joint.damping)?;
	Ok(())
}

/// Builds a bind-pose arena from decoded bone records. Parents must
/// precede their children in the input order; duplicate names fail.
pub fn build_skeleton(bones: &[Bone]) -> Result<Skeleton, xrf_core::skeleton::SkeletonError> {
	let mut skeleton = Skeleton::new();

	for bone in bones.iter() {
		let parent = match &bone.parent {
			Some(name) => Some(
				skeleton
					.index_of(name)
					.ok_or_else(|| xrf_core::skeleton::SkeletonError::MissingParent(bone.name.clone()))?,
			),
			None => None,
		};

		skeleton.push(BindBone {
			name: bone.name.clone(),
			parent: parent,
			exportable: true,
			offset: bone.offset,
			rotate: bone.rotate,
			length: bone.length,
		})?;
	}

	Ok(skeleton)
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	pub(crate) fn sample_bone(name: &str, parent: Option<&str>) -> Bone {
		Bone {
			name: name.to_string(),
			parent: parent.map(str::to_string),
			vmap: name.to_string(),
			offset: Vec3::new(0.0, 0.2, 0.0),
			rotate: Vec3::new(0.1, 0.0, -0.3),
			length: 0.4,
			shape: BoneShape {
				kind: ShapeKind::Sphere,
				sphere: Sphere {
					center: Vec3::new(0.0, 0.1, 0.0),
					radius: 0.15,
				},
				..BoneShape::default()
			},
			joint: BoneJoint {
				kind: JointKind::Joint,
				axes: [
					JointAxis {
						min: -1.0,
						max: 1.0,
						spring: 1.0,
						damping: 1.0,
					};
					3
				],
				spring: 1.0,
				damping: 1.0,
			},
			mass: 5.0,
			..Bone::default()
		}
	}

	#[test]
	fn test_bone_round_trip() {
		let bone = sample_bone("calf", Some("thigh"));
		let data = bone.write().unwrap();

		let mut diag = Diagnostics::new();
		let back = Bone::read(&data, &mut diag).unwrap();
		assert_eq!(back, bone);
		assert!(diag.is_empty());
	}

	#[test]
	fn test_unknown_version_is_fatal() {
		let mut writer = ChunkWriter::new();
		writer.put(chunks::VERSION, &3u16.to_le_bytes());
		let data = writer.into_vec();

		let mut diag = Diagnostics::new();
		match Bone::read(&data, &mut diag) {
			Err(ObjectImportError::BoneVersion(3)) => {},
			other => panic!("expected version error, got {:?}", other.err()),
		}
	}

	#[test]
	fn test_unknown_shape_tag_keeps_default() {
		let mut bone = sample_bone("root", None);
		bone.shape.kind = ShapeKind::Cylinder;
		let mut data = bone.write().unwrap();

		// the shape chunk starts with the kind tag; poison it in place
		let shape_body = data
			.windows(4)
			.position(|w| w == chunks::SHAPE.to_le_bytes())
			.unwrap() + 8;
		data[shape_body] = 0xEE;

		let mut diag = Diagnostics::new();
		let back = Bone::read(&data, &mut diag).unwrap();
		assert_eq!(back.shape.kind, ShapeKind::None);
		assert_eq!(
			diag.warnings(),
			&[Warning::UnknownShapeType {
				bone: "root".to_string(),
				tag: 0xEE,
			}]
		);
		// the parameter blocks still decode past the bad tag
		assert_eq!(back.shape.cylinder, bone.shape.cylinder);
	}

	#[test]
	fn test_legacy_record_round_trip() {
		let bone = sample_bone("thigh", None);

		let mut raw = vec![];
		raw.write_cstr(&bone.name).unwrap();
		raw.write_cstr("").unwrap();
		raw.write_cstr(&bone.vmap).unwrap();
		raw.write_vec3_swapped(bone.offset).unwrap();
		raw.write_vec3_swapped(bone.rotate).unwrap();
		raw.write_f32::<LE>(bone.length).unwrap();

		let back = Bone::read_legacy(&mut raw.as_slice()).unwrap();
		assert_eq!(back.name, bone.name);
		assert_eq!(back.parent, None);
		assert_eq!(back.offset, bone.offset);
		assert_eq!(back.rotate, bone.rotate);
		// legacy files carry no physics data
		assert_eq!(back.shape, BoneShape::default());
	}

	#[test]
	fn test_build_skeleton_resolves_parents() {
		let bones = vec![
			sample_bone("root", None),
			sample_bone("thigh", Some("ROOT")),
		];

		let skeleton = build_skeleton(&bones).unwrap();
		assert_eq!(skeleton.bones()[1].parent, Some(0));
	}

	#[test]
	fn test_build_skeleton_missing_parent() {
		let bones = vec![sample_bone("calf", Some("thigh"))];
		assert!(build_skeleton(&bones).is_err());
	}
}
