use thiserror::Error;

use ultraviolet::{
	mat::Mat4,
	vec::Vec3
};

#[derive(Error, Debug, PartialEq)]
pub enum SkeletonError {
	#[error("Duplicate bone name {0:?} (bone names are case-insensitive)")]
	DuplicateBone(String),
	#[error("Bone parent {0:?} does not exist")]
	MissingParent(String),
}

/// Composes a rotation matrix from Euler angles applied in Z, then X,
/// then Y order, the convention every rotation in these formats uses.
pub fn mat4_rotation_zxy(euler: Vec3) -> Mat4 {
	Mat4::from_rotation_z(euler.z) * Mat4::from_rotation_x(euler.x) * Mat4::from_rotation_y(euler.y)
}

/// Extracts ZXY-order Euler angles from a rotation matrix.
/// Inverse of [`mat4_rotation_zxy`] away from the X = ±90° singularity,
/// where Y is pinned to zero.
pub fn euler_zxy_from_mat4(m: &Mat4) -> Vec3 {
	// element (row, col) lives at cols[col][row]
	let m21 = m.cols[1].z;

	if m21.abs() < 0.999_999 {
		Vec3::new(
			m21.asin(),
			(-m.cols[0].z).atan2(m.cols[2].z),
			(-m.cols[1].x).atan2(m.cols[1].y),
		)
	} else if m21 > 0.0 {
		Vec3::new(
			std::f32::consts::FRAC_PI_2,
			0.0,
			m.cols[2].x.atan2(m.cols[0].x),
		)
	} else {
		Vec3::new(
			-std::f32::consts::FRAC_PI_2,
			0.0,
			(-m.cols[2].x).atan2(m.cols[0].x),
		)
	}
}

/// Rest-position definition of one bone, already in authoring-space
/// component order.
#[derive(Clone, Debug, PartialEq)]
pub struct BindBone {
	pub name: String,
	pub parent: Option<usize>,
	/// Bones excluded from export are skipped over when establishing the
	/// effective parent of their descendants.
	pub exportable: bool,
	pub offset: Vec3,
	pub rotate: Vec3,
	pub length: f32,
}

impl BindBone {
	/// Bind transform relative to the parent bone
	pub fn local_bind(&self) -> Mat4 {
		Mat4::from_translation(self.offset) * mat4_rotation_zxy(self.rotate)
	}
}

/// Arena of bones with parent indices. Bone names are identities,
/// compared case-insensitively.
#[derive(Clone, Debug, Default)]
pub struct Skeleton {
	bones: Vec<BindBone>,
}

impl Skeleton {
	pub fn new() -> Skeleton {
		Skeleton::default()
	}

	/// Appends a bone, rejecting case-insensitive duplicates.
	pub fn push(&mut self, bone: BindBone) -> Result<usize, SkeletonError> {
		if self.index_of(&bone.name).is_some() {
			return Err(SkeletonError::DuplicateBone(bone.name));
		}

		if let Some(parent) = bone.parent {
			if parent >= self.bones.len() {
				return Err(SkeletonError::MissingParent(bone.name));
			}
		}

		self.bones.push(bone);
		Ok(self.bones.len() - 1)
	}

	pub fn bones(&self) -> &[BindBone] {
		&self.bones
	}

	pub fn len(&self) -> usize {
		self.bones.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bones.is_empty()
	}

	pub fn index_of(&self, name: &str) -> Option<usize> {
		self.bones
			.iter()
			.position(|bone| bone.name.eq_ignore_ascii_case(name))
	}

	/// Walks up from the bone's parent to the nearest ancestor that is
	/// exportable. Returns `None` for roots and for bones whose whole
	/// ancestry is non-exportable.
	pub fn find_exportable_ancestor(&self, index: usize) -> Option<usize> {
		let mut current = self.bones[index].parent;

		while let Some(i) = current {
			if self.bones[i].exportable {
				return Some(i);
			}
			current = self.bones[i].parent;
		}

		None
	}

	/// Bind transform of one bone in pose (armature) space
	pub fn world_bind(&self, index: usize) -> Mat4 {
		let bone = &self.bones[index];
		match bone.parent {
			Some(parent) => self.world_bind(parent) * bone.local_bind(),
			None => bone.local_bind(),
		}
	}

	/// Inverse bind transforms for every bone, in arena order
	pub fn inverse_binds(&self) -> Vec<Mat4> {
		(0..self.bones.len())
			.map(|i| self.world_bind(i).inversed())
			.collect()
	}
}
