// src/color.rs

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;

pub const TRANSPARENT: &str = "transparent";
/// Text color used on bright backgrounds.
pub const DARK_TEXT: &str = "#1e293b";
/// Text color used on dark backgrounds.
pub const LIGHT_TEXT: &str = "#ffffff";

const BRIGHTNESS_THRESHOLD: f64 = 128.0;
const BORDER_FACTOR: f64 = 0.7;
const FALLBACK_HEX: &str = "#ffffff";

static RGB_CHANNELS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rgba?\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})").expect("rgb pattern")
});
static RGBA_ALPHA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rgba\(\s*\d{1,3}\s*,\s*\d{1,3}\s*,\s*\d{1,3}\s*,\s*([\d.]+)\s*\)$")
        .expect("rgba pattern")
});

/// Background, border and text colors of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeColor {
    pub bg: String,
    pub border: String,
    pub text: String,
}

impl NodeColor {
    fn preset(bg: &str, border: &str, text: &str) -> Self {
        Self { bg: bg.into(), border: border.into(), text: text.into() }
    }

    pub fn is_fully_transparent(&self) -> bool {
        self.bg == TRANSPARENT && self.border == TRANSPARENT
    }

    /// Opacity of the background.
    pub fn alpha(&self) -> f64 {
        extract_alpha(&self.bg)
    }
}

impl Default for NodeColor {
    fn default() -> Self {
        DEFAULT_NODE_COLOR.color.clone()
    }
}

/// A named entry of the fixed palette. Preset borders and text colors are
/// hand picked and do not follow [`derive_color`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetColor {
    pub name: &'static str,
    pub color: NodeColor,
}

pub static PRESET_COLORS: Lazy<Vec<PresetColor>> = Lazy::new(|| {
    [
        ("transparent", TRANSPARENT, TRANSPARENT, "#334155"),
        ("white", "#ffffff", "#e2e8f0", "#334155"),
        ("blue", "#dbeafe", "#3b82f6", "#1e40af"),
        ("green", "#dcfce7", "#22c55e", "#166534"),
        ("yellow", "#fef9c3", "#eab308", "#854d0e"),
        ("orange", "#ffedd5", "#f97316", "#c2410c"),
        ("red", "#fee2e2", "#ef4444", "#b91c1c"),
        ("purple", "#f3e8ff", "#a855f7", "#7e22ce"),
        ("pink", "#fce7f3", "#ec4899", "#be185d"),
        ("gray", "#f1f5f9", "#64748b", "#334155"),
    ]
    .into_iter()
    .map(|(name, bg, border, text)| PresetColor { name, color: NodeColor::preset(bg, border, text) })
    .collect()
});

/// White, the color of a node that never had one assigned.
pub static DEFAULT_NODE_COLOR: Lazy<PresetColor> = Lazy::new(|| PRESET_COLORS[1].clone());

/// Look up a palette entry by name (case-insensitive).
pub fn preset(name: &str) -> Option<&'static PresetColor> {
    PRESET_COLORS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Whether `color` is exactly one of the palette entries.
pub fn is_preset(color: &NodeColor) -> bool {
    PRESET_COLORS.iter().any(|p| &p.color == color)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Parse `#rrggbb`.
    pub fn parse_hex(hex: &str) -> Result<Self, FlowError> {
        let digits = hex
            .strip_prefix('#')
            .filter(|d| d.len() == 6 && d.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| FlowError::InvalidColor(format!("`{hex}` is not a #rrggbb color")))?;
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| FlowError::InvalidColor(format!("`{hex}`: {e}")))
        };
        Ok(Self { r: channel(0)?, g: channel(2)?, b: channel(4)? })
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Perceptual brightness on a 0..=255 scale.
    pub fn brightness(self) -> f64 {
        (f64::from(self.r) * 299.0 + f64::from(self.g) * 587.0 + f64::from(self.b) * 114.0) / 1000.0
    }

    /// Every channel scaled down by `factor` and floored.
    pub fn darken(self, factor: f64) -> Self {
        let scale = |c: u8| (f64::from(c) * factor).floor().clamp(0.0, 255.0) as u8;
        Self { r: scale(self.r), g: scale(self.g), b: scale(self.b) }
    }
}

fn check_alpha(alpha: f64) -> Result<(), FlowError> {
    if (0.0..=1.0).contains(&alpha) {
        Ok(())
    } else {
        Err(FlowError::InvalidColor(format!("alpha {alpha} is outside [0, 1]")))
    }
}

/// `rgba(r, g, b, alpha)` for a `#rrggbb` color.
pub fn hex_to_rgba(hex: &str, alpha: f64) -> Result<String, FlowError> {
    check_alpha(alpha)?;
    let rgb = Rgb::parse_hex(hex)?;
    Ok(format!("rgba({}, {}, {}, {})", rgb.r, rgb.g, rgb.b, alpha))
}

/// Build a full node color from one base color.
///
/// The border is the base darkened by 30%, the text is dark or light
/// depending on the base brightness, and the background keeps the plain hex
/// (lowercased) unless `alpha` asks for translucency.
pub fn derive_color(hex: &str, alpha: f64) -> Result<NodeColor, FlowError> {
    check_alpha(alpha)?;
    let rgb = Rgb::parse_hex(hex)?;

    let border = rgb.darken(BORDER_FACTOR).to_hex();
    let text = if rgb.brightness() > BRIGHTNESS_THRESHOLD { DARK_TEXT } else { LIGHT_TEXT };
    let bg = if alpha < 1.0 { hex_to_rgba(hex, alpha)? } else { rgb.to_hex() };

    Ok(NodeColor { bg, border, text: text.to_string() })
}

/// Recover the lowercase `#rrggbb` base of a hex or rgb(a) color; `#ffffff`
/// when the string is neither.
pub fn extract_base_hex(color: &str) -> String {
    if let Some(caps) = RGB_CHANNELS.captures(color) {
        let channel = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u8>().ok());
        if let (Some(r), Some(g), Some(b)) = (channel(1), channel(2), channel(3)) {
            return Rgb { r, g, b }.to_hex();
        }
        return FALLBACK_HEX.to_string();
    }
    match Rgb::parse_hex(color) {
        Ok(rgb) => rgb.to_hex(),
        Err(_) => FALLBACK_HEX.to_string(),
    }
}

/// Opacity encoded in a color string: 0 for `transparent`, the alpha channel
/// of an `rgba(...)`, 1 otherwise.
pub fn extract_alpha(color: &str) -> f64 {
    if color == TRANSPARENT {
        return 0.0;
    }
    RGBA_ALPHA
        .captures(color)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|a| a.clamp(0.0, 1.0))
        .unwrap_or(1.0)
}
