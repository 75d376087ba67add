pub mod chunk;
pub mod diag;
pub mod io_ext;
pub mod skeleton;

/// Quantization range used by TCB spline parameters on disk.
pub const TCB_RANGE: (f32, f32) = (-32.0, 32.0);

/// Converts a raw 16-bit value into a float in `[min, max]`.
pub fn dequantize_u16(raw: u16, min: f32, max: f32) -> f32 {
	raw as f32 * (max - min) / 65536.0 + min
}

/// Converts a float in `[min, max]` back into its raw 16-bit form.
/// Values outside the range are clamped.
pub fn quantize_u16(value: f32, min: f32, max: f32) -> u16 {
	let raw = (value - min) * 65536.0 / (max - min);
	raw.clamp(0.0, 65535.0) as u16
}

/// Swaps the winding of every index triangle in place, `(a, b, c)`
/// becoming `(a, c, b)`. The on-disk handedness differs from the
/// authoring convention, so this runs at both encode and decode.
pub fn swap_winding(indices: &mut [u16]) {
	for triangle in indices.chunks_exact_mut(3) {
		triangle.swap(1, 2);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_quantize_round_trip() {
		for raw in [0u16, 1, 512, 32768, 65535] {
			let v = dequantize_u16(raw, -32.0, 32.0);
			assert_eq!(quantize_u16(v, -32.0, 32.0), raw);
		}
	}

	#[test]
	fn test_quantize_clamps() {
		assert_eq!(quantize_u16(-100.0, -32.0, 32.0), 0);
		assert_eq!(quantize_u16(100.0, -32.0, 32.0), 65535);
	}

	#[test]
	fn test_swap_winding_is_involution() {
		let mut indices = [0u16, 1, 2, 3, 4, 5];
		swap_winding(&mut indices);
		assert_eq!(indices, [0, 2, 1, 3, 5, 4]);
		swap_winding(&mut indices);
		assert_eq!(indices, [0, 1, 2, 3, 4, 5]);
	}
}
