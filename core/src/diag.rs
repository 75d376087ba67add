use std::collections::HashSet;

use thiserror::Error;

/// Non-fatal conditions observed while decoding or encoding. These are
/// accumulated as values instead of being logged through ambient state,
/// so callers decide how to surface them.
#[derive(Error, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Warning {
	#[error("{context}: envelope pre/post behaviours differ ({pre} vs {post}), post forced to pre")]
	BehaviourMismatch {
		context: String,
		pre: u8,
		post: u8,
	},
	#[error("{context}: unexpected channel behaviours ({pre}, {post})")]
	ChannelBehaviour {
		context: String,
		pre: u8,
		post: u8,
	},
	#[error("{motion}: bone {bone:?} is not present in the skeleton, curves dropped")]
	BoneNotInSkeleton {
		motion: String,
		bone: String,
	},
	#[error("{bone}: reserved motion flags byte is {value:#X}, expected 0")]
	NonZeroBoneFlags {
		bone: String,
		value: u8,
	},
	#[error("{bone}: unknown physics shape tag {tag}, keeping default shape")]
	UnknownShapeType {
		bone: String,
		tag: u16,
	},
	#[error("{bone}: unknown IK joint tag {tag}, keeping default joint")]
	UnknownJointType {
		bone: String,
		tag: u32,
	},
	#[error("{context}: key shape {shape} is unsupported, substituted")]
	UnsupportedKeyShape {
		context: String,
		shape: u8,
	},
	#[error("{mesh}: {count} vertices re-allocated through duplicate-face buckets")]
	DuplicateFaceBuckets {
		mesh: String,
		count: usize,
	},
	#[error("{mesh}: smoothing groups are not exactly representable in the mask regime")]
	SmoothingNotRepresentable {
		mesh: String,
	},
}

/// Accumulator threaded through decode/encode calls.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
	warnings: Vec<Warning>,
	seen: HashSet<Warning>,
}

impl Diagnostics {
	pub fn new() -> Diagnostics {
		Diagnostics::default()
	}

	pub fn warn(&mut self, warning: Warning) {
		log::warn!("{}", warning);
		self.warnings.push(warning);
	}

	/// Like [`Diagnostics::warn`], but identical warnings are recorded
	/// only once. Used for per-name conditions that would otherwise
	/// repeat for every reference (missing bones, bucket overflow).
	pub fn warn_once(&mut self, warning: Warning) {
		if self.seen.insert(warning.clone()) {
			self.warn(warning);
		}
	}

	pub fn warnings(&self) -> &[Warning] {
		&self.warnings
	}

	pub fn is_empty(&self) -> bool {
		self.warnings.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_warn_once() {
		let mut diag = Diagnostics::new();
		for _ in 0..3 {
			diag.warn_once(Warning::BoneNotInSkeleton {
				motion: "walk".to_string(),
				bone: "tail".to_string(),
			});
		}
		diag.warn_once(Warning::BoneNotInSkeleton {
			motion: "walk".to_string(),
			bone: "ear".to_string(),
		});

		assert_eq!(diag.warnings().len(), 2);
	}
}
