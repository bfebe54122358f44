//! Tags: normalized, colored labels attached to posts.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// A flat label. Names are uppercase, `#`-prefixed, unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    /// Hex RGB (`#RRGGBB`), assigned at creation
    pub color: String,
}

/// Generate a random display color: hue anywhere, saturation 50-100%,
/// lightness 20-60% so white text stays readable on tag chips.
pub fn random_color() -> String {
    let mut rng = rand::thread_rng();
    let h = rng.gen_range(0..360) as f64;
    let s = rng.gen_range(0.5..1.0);
    let l = rng.gen_range(0.2..0.6);
    let (r, g, b) = hsl_to_rgb(h, s, l);
    format!("#{r:02X}{g:02X}{b:02X}")
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = l - c / 2.0;

    let (r, g, b) = match h as u32 {
        0..=59 => (c, x, 0.0),
        60..=119 => (x, c, 0.0),
        120..=179 => (0.0, c, x),
        180..=239 => (0.0, x, c),
        240..=299 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_color_is_hex_rgb() {
        for _ in 0..32 {
            let color = random_color();
            assert_eq!(color.len(), 7);
            assert!(color.starts_with('#'));
            assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn hsl_primaries_convert() {
        assert_eq!(hsl_to_rgb(0.0, 1.0, 0.5), (255, 0, 0));
        assert_eq!(hsl_to_rgb(120.0, 1.0, 0.5), (0, 255, 0));
        assert_eq!(hsl_to_rgb(240.0, 1.0, 0.5), (0, 0, 255));
    }
}
