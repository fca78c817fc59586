//! RGB / HSV conversion
//!
//! Hue is in degrees `[0, 360)`, saturation and value in percent `[0, 100]`,
//! matching the units of the Kasa protocol.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hsv(self) -> Hsv {
        rgb_to_hsv(self)
    }
}

impl Hsv {
    pub const fn new(h: f32, s: f32, v: f32) -> Self {
        Self { h, s, v }
    }

    pub fn to_rgb(self) -> Rgb {
        hsv_to_rgb(self)
    }
}

pub fn rgb_to_hsv(rgb: Rgb) -> Hsv {
    let r = f32::from(rgb.r);
    let g = f32::from(rgb.g);
    let b = f32::from(rgb.b);

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max / 2.55;
    let s = if max == 0.0 { 0.0 } else { delta / max * 100.0 };

    // achromatic colours have no hue
    let sector = if delta == 0.0 {
        0.0
    } else if max == r {
        (g - b) / delta
    } else if max == g {
        2.0 + (b - r) / delta
    } else {
        4.0 + (r - g) / delta
    };

    let mut h = sector * 60.0;
    if h < 0.0 {
        h += 360.0;
    }

    Hsv { h, s, v }
}

pub fn hsv_to_rgb(hsv: Hsv) -> Rgb {
    let h = if hsv.h.is_finite() { hsv.h.rem_euclid(360.0) } else { 0.0 };
    let s = hsv.s.clamp(0.0, 100.0) / 100.0;
    let v = hsv.v.clamp(0.0, 100.0) / 100.0;

    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    Rgb {
        r: to_channel(r + m),
        g: to_channel(g + m),
        b: to_channel(b + m),
    }
}

fn to_channel(unit: f32) -> u8 {
    (unit * 255.0).round().clamp(0.0, 255.0) as u8
}
