//! Colour-space helpers for material and light tinting.

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

/// Converts RGB components in `[0, 1]` to HSV.
///
/// Achromatic colours (all components equal) report a hue of `0`.
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> Hsv {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };

    if delta <= f32::EPSILON {
        return Hsv { h: 0.0, s, v };
    }

    let sector = if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };

    Hsv {
        h: (sector * 60.0).rem_euclid(360.0),
        s,
        v,
    }
}

pub fn hsv_to_rgb(hsv: Hsv) -> [f32; 3] {
    let c = hsv.v * hsv.s;
    let h = hsv.h.rem_euclid(360.0) / 60.0;
    let x = c * (1.0 - (h.rem_euclid(2.0) - 1.0).abs());
    let m = hsv.v - c;

    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    [r + m, g + m, b + m]
}
