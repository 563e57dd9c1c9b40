//! Scaling and clamping helpers shared by all stroke patterns.

/// Maps `input` from `[original_min, original_max]` onto `[new_begin, new_end]`
/// along a curve. `curve` ranges over `[-10, 10]`; `0` is a straight line,
/// positive values weight the high end of the output, negative the low end.
/// `new_end` may be smaller than `new_begin` to map onto a falling range.
pub fn fscale(
    original_min: f32,
    original_max: f32,
    new_begin: f32,
    new_end: f32,
    input: f32,
    curve: f32,
) -> f32 {
    if original_min > original_max {
        return 0.0;
    }

    // invert and scale, then turn the linear knob into an exponent
    let curve = libm::powf(10.0, curve.clamp(-10.0, 10.0) * -0.1);

    let input = input.clamp(original_min, original_max);
    let original_range = original_max - original_min;
    if original_range <= 0.0 {
        return new_begin;
    }
    let normalized = (input - original_min) / original_range;
    let weighted = libm::powf(normalized, curve);

    if new_end > new_begin {
        new_begin + weighted * (new_end - new_begin)
    } else {
        new_begin - weighted * (new_begin - new_end)
    }
}

/// Integer linear re-mapping with truncating division, the way a
/// microcontroller `map()` works. A degenerate input range maps to `out_min`.
pub fn map_range(x: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> i64 {
    if in_max == in_min {
        return out_min;
    }
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// Keeps a position inside `[0, depth]`. A negative depth collapses the
/// window to `0`.
pub fn clamp_position(position: i32, depth: i32) -> i32 {
    position.clamp(0, depth.max(0))
}

/// Truncates a speed or acceleration into `[0, ceiling]`. Infinite values
/// saturate, NaN becomes `0`.
pub fn clamp_rate(value: f32, ceiling: u32) -> u32 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, ceiling as f32) as u32
}
