use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io;

use xrf_core::{
	diag::{
		Diagnostics,
		Warning
	},
	io_ext::{
		ReadXrExt,
		WriteXrExt
	},
	TCB_RANGE
};

#[cfg(feature = "import")]
use import::EnvelopeImportError;

/// Default key-reduction tolerance. Location and rotation channels may
/// override it per axis.
pub const DEFAULT_EPSILON: f32 = 1e-5;

/// Extrapolation behaviour stored as a pre/post pair on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Behaviour {
	Reset = 0,
	Repeat,
	Constant,
	Oscillate,
	OffsetRepeat,
	Linear,
}

impl Behaviour {
	#[cfg(feature = "import")]
	fn read<R>(buf: &mut R) -> Result<Behaviour, EnvelopeImportError>
	where
		R: ReadBytesExt,
	{
		match buf.read_u8()? {
			0 => Ok(Behaviour::Reset),
			1 => Ok(Behaviour::Repeat),
			2 => Ok(Behaviour::Constant),
			3 => Ok(Behaviour::Oscillate),
			4 => Ok(Behaviour::OffsetRepeat),
			5 => Ok(Behaviour::Linear),
			other => Err(EnvelopeImportError::Behaviour(other)),
		}
	}
}

/// Per-key segment shape. The shape describes the segment *entering*
/// the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyShape {
	Tcb = 0,
	/// Legacy alias of [`KeyShape::Tcb`]
	Hermite,
	/// Unsupported; substituted on import with a warning
	Bezier1d,
	Linear,
	Stepped,
	/// Unsupported; substituted on import with a warning
	Bezier2d,
}

impl KeyShape {
	#[cfg(feature = "import")]
	fn read<R>(buf: &mut R) -> Result<KeyShape, EnvelopeImportError>
	where
		R: ReadBytesExt,
	{
		match buf.read_u8()? {
			0 => Ok(KeyShape::Tcb),
			1 => Ok(KeyShape::Hermite),
			2 => Ok(KeyShape::Bezier1d),
			3 => Ok(KeyShape::Linear),
			4 => Ok(KeyShape::Stepped),
			5 => Ok(KeyShape::Bezier2d),
			other => Err(EnvelopeImportError::KeyShape(other)),
		}
	}
}

/// One on-disk keyframe. `time` is in seconds; tension/continuity/bias
/// are only meaningful for TCB/Hermite shapes and are stored quantized
/// into [-32, 32].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawKey {
	pub value: f32,
	pub time: f32,
	pub shape: KeyShape,
	pub tension: f32,
	pub continuity: f32,
	pub bias: f32,
}

/// An on-disk animation curve: extrapolation behaviour pair plus keys.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
	pub behaviours: (Behaviour, Behaviour),
	pub keys: Vec<RawKey>,
}

impl Envelope {
	#[cfg(feature = "import")]
	pub fn read<R>(buf: &mut R) -> Result<Envelope, EnvelopeImportError>
	where
		R: ReadBytesExt,
	{
		let behaviours = (Behaviour::read(buf)?, Behaviour::read(buf)?);
		let count = buf.read_u16::<LE>()? as usize;
		let mut keys = Vec::with_capacity(count);

		for _ in 0..count {
			let value = buf.read_f32::<LE>()?;
			let time = buf.read_f32::<LE>()?;
			let shape = KeyShape::read(buf)?;

			let (tension, continuity, bias) = if shape == KeyShape::Stepped {
				(0.0, 0.0, 0.0)
			} else {
				let t = buf.read_quantized(TCB_RANGE.0, TCB_RANGE.1)?;
				let c = buf.read_quantized(TCB_RANGE.0, TCB_RANGE.1)?;
				let b = buf.read_quantized(TCB_RANGE.0, TCB_RANGE.1)?;
				// four reserved parameter words
				for _ in 0..4 {
					buf.read_u16::<LE>()?;
				}
				(t, c, b)
			};

			keys.push(RawKey {
				value: value,
				time: time,
				shape: shape,
				tension: tension,
				continuity: continuity,
				bias: bias,
			});
		}

		Ok(Envelope {
			behaviours: behaviours,
			keys: keys,
		})
	}

	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W) -> io::Result<()>
	where
		W: WriteBytesExt,
	{
		buf.write_u8(self.behaviours.0 as u8)?;
		buf.write_u8(self.behaviours.1 as u8)?;
		buf.write_u16::<LE>(self.keys.len() as u16)?;

		for key in self.keys.iter() {
			buf.write_f32::<LE>(key.value)?;
			buf.write_f32::<LE>(key.time)?;
			buf.write_u8(key.shape as u8)?;

			if key.shape != KeyShape::Stepped {
				buf.write_quantized(key.tension, TCB_RANGE.0, TCB_RANGE.1)?;
				buf.write_quantized(key.continuity, TCB_RANGE.0, TCB_RANGE.1)?;
				buf.write_quantized(key.bias, TCB_RANGE.0, TCB_RANGE.1)?;
				for _ in 0..4 {
					buf.write_u16::<LE>(0)?;
				}
			}
		}

		Ok(())
	}

	/// Converts the on-disk keys into a plain curve keyed by frame.
	///
	/// Mismatched pre/post behaviours are forced to the pre value with a
	/// warning. Any TCB/Hermite key makes the whole curve get resampled
	/// at one-frame resolution through Kochanek-Bartels evaluation into
	/// linear keys; the faithful spline shape is deliberately lost,
	/// since the curve representation only supports constant and linear
	/// segments.
	#[cfg(feature = "import")]
	pub fn to_curve(&self, fps: f32, context: &str, diag: &mut Diagnostics) -> Curve {
		let (pre, post) = self.behaviours;
		if pre != post {
			diag.warn(Warning::BehaviourMismatch {
				context: context.to_string(),
				pre: pre as u8,
				post: post as u8,
			});
		}

		let extrapolation = match pre {
			Behaviour::Linear => Extrapolation::Linear,
			_ => Extrapolation::Constant,
		};

		let framed: Vec<RawKey> = self
			.keys
			.iter()
			.map(|key| RawKey {
				time: key.time * fps,
				..*key
			})
			.collect();

		let spline = framed
			.iter()
			.any(|key| matches!(key.shape, KeyShape::Tcb | KeyShape::Hermite));

		let keys = if spline {
			bake_spline(&framed)
		} else {
			framed
				.iter()
				.map(|key| CurveKey {
					frame: key.time,
					value: key.value,
					interpolation: match key.shape {
						KeyShape::Stepped => Interpolation::Constant,
						KeyShape::Linear => Interpolation::Linear,
						other => {
							diag.warn(Warning::UnsupportedKeyShape {
								context: context.to_string(),
								shape: other as u8,
							});
							Interpolation::Linear
						},
					},
				})
				.collect()
		};

		Curve {
			extrapolation: extrapolation,
			keys: keys,
		}
	}
}

/// Interpolation of the segment entering a curve key. `Bezier` can only
/// arrive from a host curve; the codec never produces it and substitutes
/// it on export.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interpolation {
	Constant,
	Linear,
	Bezier,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Extrapolation {
	Constant,
	Linear,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurveKey {
	pub frame: f32,
	pub value: f32,
	pub interpolation: Interpolation,
}

/// In-memory animation curve keyed by frame number.
#[derive(Clone, Debug, PartialEq)]
pub struct Curve {
	pub extrapolation: Extrapolation,
	pub keys: Vec<CurveKey>,
}

impl Curve {
	/// Samples the curve at a frame. Constant segments hold the previous
	/// key's value; outside the key range the configured extrapolation
	/// applies.
	pub fn evaluate(&self, frame: f32) -> f32 {
		let keys = &self.keys;
		if keys.is_empty() {
			return 0.0;
		}

		let first = &keys[0];
		let last = &keys[keys.len() - 1];

		if frame <= first.frame {
			return match self.extrapolation {
				Extrapolation::Linear if keys.len() > 1 => {
					let next = &keys[1];
					let slope = (next.value - first.value) / (next.frame - first.frame);
					first.value + slope * (frame - first.frame)
				},
				_ => first.value,
			};
		}

		if frame >= last.frame {
			return match self.extrapolation {
				Extrapolation::Linear if keys.len() > 1 => {
					let prev = &keys[keys.len() - 2];
					let slope = (last.value - prev.value) / (last.frame - prev.frame);
					last.value + slope * (frame - last.frame)
				},
				_ => last.value,
			};
		}

		// keys are ordered by frame, and the bounds checks above ensure
		// the partition point lands strictly inside the key range
		let next = keys.partition_point(|key| key.frame < frame);
		let (a, b) = (&keys[next - 1], &keys[next]);

		match b.interpolation {
			Interpolation::Constant => a.value,
			_ => {
				let s = (frame - a.frame) / (b.frame - a.frame);
				a.value + (b.value - a.value) * s
			},
		}
	}

	/// Converts the curve back into its on-disk form, reducing keys
	/// against `epsilon` first. Non-stepped keys are written with
	/// neutral tension/continuity/bias, so a curve that was baked from a
	/// TCB envelope does not round-trip bit-identically; linear and
	/// stepped curves do.
	#[cfg(feature = "export")]
	pub fn to_envelope(&self, fps: f32, epsilon: f32, context: &str, diag: &mut Diagnostics) -> Envelope {
		let behaviour = match self.extrapolation {
			Extrapolation::Linear => Behaviour::Linear,
			Extrapolation::Constant => Behaviour::Constant,
		};

		let keys = refine(&self.keys, epsilon)
			.into_iter()
			.map(|key| RawKey {
				value: key.value,
				time: key.frame / fps,
				shape: match key.interpolation {
					Interpolation::Constant => KeyShape::Stepped,
					Interpolation::Linear => KeyShape::Linear,
					Interpolation::Bezier => {
						diag.warn(Warning::UnsupportedKeyShape {
							context: context.to_string(),
							shape: KeyShape::Bezier1d as u8,
						});
						KeyShape::Tcb
					},
				},
				tension: 0.0,
				continuity: 0.0,
				bias: 0.0,
			})
			.collect();

		Envelope {
			behaviours: (behaviour, behaviour),
			keys: keys,
		}
	}
}

/// Greedy forward key reduction. A key is dropped only while it, and
/// every key already skipped since the last kept one, stays within
/// `epsilon` of the line from the last kept key to the next candidate;
/// trailing keys are judged against constant extrapolation instead.
/// This is a forward scan, not a globally optimal simplification.
#[cfg(feature = "export")]
pub fn refine(keys: &[CurveKey], epsilon: f32) -> Vec<CurveKey> {
	if keys.len() <= 1 {
		return keys.to_vec();
	}

	let mut kept = vec![keys[0]];
	let mut skipped: Vec<CurveKey> = vec![];

	for i in 1..keys.len() {
		let last = *kept.last().unwrap();
		let anchor = keys.get(i + 1);

		let predict = |frame: f32| match anchor {
			Some(next) if next.frame > last.frame => {
				let slope = (next.value - last.value) / (next.frame - last.frame);
				last.value + slope * (frame - last.frame)
			},
			_ => last.value,
		};

		let within = skipped
			.iter()
			.chain(std::iter::once(&keys[i]))
			.all(|key| (key.value - predict(key.frame)).abs() <= epsilon);

		if within {
			skipped.push(keys[i]);
		} else {
			kept.push(keys[i]);
			skipped.clear();
		}
	}

	kept
}

/// Resamples a key list containing TCB/Hermite shapes into dense
/// linear keys, one per integer frame.
#[cfg(feature = "import")]
fn bake_spline(keys: &[RawKey]) -> Vec<CurveKey> {
	if keys.is_empty() {
		return vec![];
	}

	let start = keys[0].time.floor() as i32;
	let end = keys[keys.len() - 1].time.ceil() as i32;

	(start..=end)
		.map(|frame| CurveKey {
			frame: frame as f32,
			value: sample_spline(keys, frame as f32),
			interpolation: Interpolation::Linear,
		})
		.collect()
}

/// Kochanek-Bartels tangents for the key at `index`, with the standard
/// non-uniform spacing adjustment. Returns `(incoming, outgoing)` as
/// value deltas.
#[cfg(feature = "import")]
fn tcb_tangents(keys: &[RawKey], index: usize) -> (f32, f32) {
	let key = &keys[index];
	let prev = index.checked_sub(1).map(|i| &keys[i]);
	let next = keys.get(index + 1);

	let dp = match (prev, next) {
		(Some(prev), _) => key.value - prev.value,
		(None, Some(next)) => next.value - key.value,
		(None, None) => 0.0,
	};
	let dn = match (next, prev) {
		(Some(next), _) => next.value - key.value,
		(None, Some(prev)) => key.value - prev.value,
		(None, None) => 0.0,
	};

	let t = 1.0 - key.tension;
	let c = key.continuity;
	let b = key.bias;

	let incoming = 0.5 * t * ((1.0 + b) * (1.0 - c) * dp + (1.0 - b) * (1.0 + c) * dn);
	let outgoing = 0.5 * t * ((1.0 + b) * (1.0 + c) * dp + (1.0 - b) * (1.0 - c) * dn);

	let span_prev = prev.map(|p| key.time - p.time);
	let span_next = next.map(|n| n.time - key.time);
	let (sp, sn) = match (span_prev, span_next) {
		(Some(sp), Some(sn)) => (sp, sn),
		(Some(sp), None) => (sp, sp),
		(None, Some(sn)) => (sn, sn),
		(None, None) => (1.0, 1.0),
	};

	let total = sp + sn;
	if total > 0.0 {
		(incoming * 2.0 * sp / total, outgoing * 2.0 * sn / total)
	} else {
		(incoming, outgoing)
	}
}

#[cfg(feature = "import")]
fn sample_spline(keys: &[RawKey], frame: f32) -> f32 {
	let first = &keys[0];
	let last = &keys[keys.len() - 1];

	if frame <= first.time || keys.len() == 1 {
		return first.value;
	}
	if frame >= last.time {
		return last.value;
	}

	let next = keys.partition_point(|key| key.time < frame);
	let (a, b) = (&keys[next - 1], &keys[next]);
	let span = b.time - a.time;
	if span <= 0.0 {
		return b.value;
	}

	// the shape of a segment is carried by the key that ends it
	match b.shape {
		KeyShape::Stepped => a.value,
		KeyShape::Linear | KeyShape::Bezier1d | KeyShape::Bezier2d => {
			let s = (frame - a.time) / span;
			a.value + (b.value - a.value) * s
		},
		KeyShape::Tcb | KeyShape::Hermite => {
			let s = (frame - a.time) / span;
			let s2 = s * s;
			let s3 = s2 * s;

			let h1 = 2.0 * s3 - 3.0 * s2 + 1.0;
			let h2 = -2.0 * s3 + 3.0 * s2;
			let h3 = s3 - 2.0 * s2 + s;
			let h4 = s3 - s2;

			let (_, out_a) = tcb_tangents(keys, next - 1);
			let (in_b, _) = tcb_tangents(keys, next);

			h1 * a.value + h2 * b.value + h3 * out_a + h4 * in_b
		},
	}
}

#[cfg(feature = "import")]
pub mod import {
	use std::io;
	use thiserror::Error;

	#[derive(Error, Debug)]
	pub enum EnvelopeImportError {
		#[error("Unknown envelope behaviour {0}")]
		Behaviour(u8),
		#[error("I/O error")]
		IO {
			#[from]
			source: io::Error,
		},
		#[error("Unknown key shape {0}")]
		KeyShape(u8),
	}
}

#[cfg(test)]
mod tests {
	use xrf_core::diag::{
		Diagnostics,
		Warning
	};

	use super::*;

	fn key(frame: f32, value: f32, interpolation: Interpolation) -> CurveKey {
		CurveKey {
			frame: frame,
			value: value,
			interpolation: interpolation,
		}
	}

	fn raw(time: f32, value: f32, shape: KeyShape) -> RawKey {
		RawKey {
			value: value,
			time: time,
			shape: shape,
			tension: 0.0,
			continuity: 0.0,
			bias: 0.0,
		}
	}

	#[test]
	fn test_linear_stepped_round_trip() {
		let envelope = Envelope {
			behaviours: (Behaviour::Constant, Behaviour::Constant),
			keys: vec![
				raw(0.0, 1.0, KeyShape::Linear),
				raw(0.5, 2.0, KeyShape::Stepped),
				raw(1.0, -3.0, KeyShape::Linear),
			],
		};

		let mut out = vec![];
		envelope.write(&mut out).unwrap();
		let back = Envelope::read(&mut out.as_slice()).unwrap();
		assert_eq!(back, envelope);
	}

	#[test]
	fn test_curve_round_trip_linear_subset() {
		let curve = Curve {
			extrapolation: Extrapolation::Constant,
			keys: vec![
				key(0.0, 1.0, Interpolation::Linear),
				key(10.0, 2.0, Interpolation::Constant),
				key(20.0, -1.0, Interpolation::Linear),
			],
		};

		let mut diag = Diagnostics::new();
		let envelope = curve.to_envelope(30.0, DEFAULT_EPSILON, "test", &mut diag);
		let back = envelope.to_curve(30.0, "test", &mut diag);

		assert!(diag.is_empty());
		assert_eq!(back.extrapolation, curve.extrapolation);
		assert_eq!(back.keys.len(), curve.keys.len());
		for (a, b) in back.keys.iter().zip(curve.keys.iter()) {
			assert!((a.frame - b.frame).abs() < 1e-4);
			assert!((a.value - b.value).abs() < 1e-5);
			assert_eq!(a.interpolation, b.interpolation);
		}
	}

	#[test]
	fn test_behaviour_mismatch_forced_to_pre() {
		let envelope = Envelope {
			behaviours: (Behaviour::Constant, Behaviour::Linear),
			keys: vec![raw(0.0, 0.0, KeyShape::Linear)],
		};

		let mut diag = Diagnostics::new();
		let curve = envelope.to_curve(30.0, "bone/loc.x", &mut diag);

		assert_eq!(curve.extrapolation, Extrapolation::Constant);
		assert_eq!(
			diag.warnings(),
			&[Warning::BehaviourMismatch {
				context: "bone/loc.x".to_string(),
				pre: Behaviour::Constant as u8,
				post: Behaviour::Linear as u8,
			}]
		);
	}

	#[test]
	fn test_tcb_import_bakes_to_dense_linear() {
		// The spline shape is intentionally lost here: TCB keys become a
		// dense linear approximation at one-frame resolution.
		let envelope = Envelope {
			behaviours: (Behaviour::Constant, Behaviour::Constant),
			keys: vec![
				raw(0.0, 0.0, KeyShape::Tcb),
				raw(2.0, 4.0, KeyShape::Tcb),
				raw(4.0, 0.0, KeyShape::Tcb),
			],
		};

		let mut diag = Diagnostics::new();
		// fps 1 keeps the frame numbers equal to the stored times
		let curve = envelope.to_curve(1.0, "test", &mut diag);

		assert_eq!(curve.keys.len(), 5);
		assert!(curve
			.keys
			.iter()
			.all(|key| key.interpolation == Interpolation::Linear));
		assert!((curve.keys[2].value - 4.0).abs() < 1e-6);
		// Catmull-Rom overshoot above the straight chord value of 2.0
		assert!((curve.keys[1].value - 2.5).abs() < 1e-5);
		assert!((curve.keys[3].value - 2.5).abs() < 1e-5);
	}

	#[test]
	fn test_bezier_shape_substituted_with_warning() {
		let envelope = Envelope {
			behaviours: (Behaviour::Constant, Behaviour::Constant),
			keys: vec![
				raw(0.0, 0.0, KeyShape::Linear),
				raw(1.0, 1.0, KeyShape::Bezier1d),
			],
		};

		let mut diag = Diagnostics::new();
		let curve = envelope.to_curve(30.0, "test", &mut diag);

		assert_eq!(curve.keys[1].interpolation, Interpolation::Linear);
		assert_eq!(diag.warnings().len(), 1);
	}

	#[test]
	fn test_refine_keeps_stepped_value_change() {
		let keys = vec![
			key(0.0, 0.0, Interpolation::Constant),
			key(1.0, 0.0, Interpolation::Constant),
			key(2.0, 10.0, Interpolation::Constant),
		];

		// the middle key deviates from the linear chord to the value
		// change behind it, so all three survive
		assert_eq!(refine(&keys, 0.01), keys);
	}

	#[test]
	fn test_refine_drops_repeated_value() {
		let keys = vec![
			key(0.0, 0.0, Interpolation::Constant),
			key(1.0, 0.0, Interpolation::Constant),
		];

		assert_eq!(refine(&keys, 0.01), vec![keys[0]]);
	}

	#[test]
	fn test_refine_idempotent_and_bounded() {
		let keys = vec![
			key(0.0, 0.0, Interpolation::Linear),
			key(1.0, 5.0, Interpolation::Linear),
			key(2.0, 0.0, Interpolation::Linear),
			key(3.0, 0.000001, Interpolation::Linear),
			key(4.0, 0.0, Interpolation::Linear),
		];

		let once = refine(&keys, 1e-3);
		assert_eq!(once.len(), 3);
		assert_eq!(refine(&once, 1e-3), once);

		// dropped keys stay within epsilon of their surviving neighbours
		let reduced = Curve {
			extrapolation: Extrapolation::Constant,
			keys: once,
		};
		for dropped in &keys[3..] {
			assert!((reduced.evaluate(dropped.frame) - dropped.value).abs() <= 1e-3);
		}
	}

	#[test]
	fn test_evaluate_interior_of_long_curve() {
		let curve = Curve {
			extrapolation: Extrapolation::Constant,
			keys: (0..100)
				.map(|i| key(i as f32, i as f32 * 2.0, Interpolation::Linear))
				.collect(),
		};

		assert!((curve.evaluate(37.5) - 75.0).abs() < 1e-5);
		// sampling exactly on a key lands on its value
		assert!((curve.evaluate(41.0) - 82.0).abs() < 1e-5);
	}

	#[test]
	fn test_evaluate_extrapolation() {
		let curve = Curve {
			extrapolation: Extrapolation::Linear,
			keys: vec![
				key(0.0, 0.0, Interpolation::Linear),
				key(2.0, 2.0, Interpolation::Linear),
			],
		};

		assert!((curve.evaluate(1.0) - 1.0).abs() < 1e-6);
		assert!((curve.evaluate(3.0) - 3.0).abs() < 1e-6);
		assert!((curve.evaluate(-1.0) + 1.0).abs() < 1e-6);

		let held = Curve {
			extrapolation: Extrapolation::Constant,
			keys: curve.keys.clone(),
		};
		assert!((held.evaluate(5.0) - 2.0).abs() < 1e-6);
	}
}
