//! Pure value computers over a [`ConfigRecord`].
//!
//! The vanilla pond is drawn for a 5x5 footprint. Every computer rescales
//! one of those hard-coded values to the configured size. Scale arithmetic
//! is `f32` and integer results truncate toward zero, the same fixed-point
//! pixel rule the game uses.
//!
//! Each [`Computer`] also names the host helper the patched code calls at
//! runtime (`GamePatches::GetPondSourceRect(BuildingData)`), so a script can
//! either inject a call or fold a scalar into an operand at patch time.

use crate::il::MethodRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Side length of the vanilla footprint, in tiles.
pub const BASE_TILES: i32 = 5;
/// Smallest tile size, in source pixels.
pub const TILE_UNIT: i32 = 16;

/// Class holding the runtime helpers injected calls target.
pub const HOST_CLASS: &str = "GamePatches";

/// Building footprint in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub width: i32,
    pub height: i32,
}

impl ConfigRecord {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn square(size: i32) -> Self {
        Self::new(size, size)
    }

    pub fn validate(&self) -> Result<Self, InvalidConfigError> {
        if self.width < 1 || self.height < 1 {
            return Err(InvalidConfigError {
                width: self.width,
                height: self.height,
            });
        }
        Ok(*self)
    }
}

impl fmt::Display for ConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid config {width}x{height}: width and height must be at least 1")]
pub struct InvalidConfigError {
    pub width: i32,
    pub height: i32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    #[error(transparent)]
    InvalidConfig(#[from] InvalidConfigError),

    #[error("unknown value computer '{name}'{hint}")]
    UnknownComputer { name: String, hint: String },

    #[error("value computer '{name}' requires an argument")]
    MissingArgument { name: &'static str },

    #[error("value computer '{name}' takes no argument")]
    UnexpectedArgument { name: &'static str },

    #[error("value computer '{name}' does not produce a scalar")]
    NotScalar { name: &'static str },

    #[error("{what} does not fit in a 32-bit integer")]
    Overflow { what: &'static str },
}

fn checked(value: Option<i32>, what: &'static str) -> Result<i32, ComputeError> {
    value.ok_or(ComputeError::Overflow { what })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rect({}, {}, {}, {})",
            self.x, self.y, self.width, self.height
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vec2({}, {})", self.x, self.y)
    }
}

/// A computed replacement value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Rect(Rect),
    Vec2(Vec2),
}

impl Value {
    /// Operand text for a scalar value (`64`, `0.8`).
    pub fn literal(&self) -> Option<String> {
        match self {
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Rect(_) | Value::Vec2(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Rect(r) => write!(f, "{r}"),
            Value::Vec2(v) => write!(f, "{v}"),
        }
    }
}

/// `width / 5`; alias of the horizontal scale.
pub fn scale(config: &ConfigRecord) -> Result<f32, InvalidConfigError> {
    scale_x(config)
}

pub fn scale_x(config: &ConfigRecord) -> Result<f32, InvalidConfigError> {
    let config = config.validate()?;
    Ok(config.width as f32 / BASE_TILES as f32)
}

pub fn scale_y(config: &ConfigRecord) -> Result<f32, InvalidConfigError> {
    let config = config.validate()?;
    Ok(config.height as f32 / BASE_TILES as f32)
}

/// `trunc(value * scale_x)`.
pub fn scaled_offset(value: i32, config: &ConfigRecord) -> Result<i32, InvalidConfigError> {
    Ok(truncate(value as f32 * scale_x(config)?))
}

/// `trunc(value * scale_y)`.
pub fn scaled_offset_y(value: i32, config: &ConfigRecord) -> Result<i32, InvalidConfigError> {
    Ok(truncate(value as f32 * scale_y(config)?))
}

fn truncate(value: f32) -> i32 {
    value.trunc() as i32
}

pub fn pixel_width(config: &ConfigRecord) -> Result<i32, ComputeError> {
    checked(config.validate()?.width.checked_mul(TILE_UNIT), "pixel width")
}

pub fn pixel_height(config: &ConfigRecord) -> Result<i32, ComputeError> {
    checked(config.validate()?.height.checked_mul(TILE_UNIT), "pixel height")
}

/// Source rectangle of the pond itself, also used for the menu icon.
pub fn source_rect(config: &ConfigRecord) -> Result<Rect, ComputeError> {
    Ok(Rect::new(0, 0, pixel_width(config)?, pixel_height(config)?))
}

pub fn pond_bottom_source_rect(config: &ConfigRecord) -> Result<Rect, ComputeError> {
    let height = pixel_height(config)?;
    Ok(Rect::new(0, height, pixel_width(config)?, height))
}

pub fn pond_origin(config: &ConfigRecord) -> Result<Vec2, ComputeError> {
    Ok(Vec2::new(0.0, pixel_height(config)? as f32))
}

/// Height of one netting style row: `trunc(48 * height / 5)`.
pub fn netting_height(config: &ConfigRecord) -> Result<i32, InvalidConfigError> {
    let config = config.validate()?;
    Ok(truncate(48.0 * config.height as f32 / BASE_TILES as f32))
}

pub fn netting_source_rect(config: &ConfigRecord, style: i32) -> Result<Rect, ComputeError> {
    let width = pixel_width(config)?;
    let height = netting_height(config)?;
    let y = checked(style.checked_mul(height), "netting row offset")?;
    Ok(Rect::new(width, y, width, height))
}

pub fn netting_source_rect_zero(config: &ConfigRecord) -> Result<Rect, ComputeError> {
    netting_source_rect(config, 0)
}

pub fn bucket_offset(config: &ConfigRecord) -> Result<Vec2, InvalidConfigError> {
    Ok(Vec2::new(65.0 * scale_x(config)?, 59.0 * scale_y(config)?))
}

fn bucket_rect(x: i32, config: &ConfigRecord) -> Result<Rect, InvalidConfigError> {
    Ok(Rect::new(
        scaled_offset(x, config)?,
        scaled_offset_y(160, config)?,
        scaled_offset(15, config)?,
        scaled_offset_y(16, config)?,
    ))
}

pub fn bucket_source_rect(config: &ConfigRecord) -> Result<Rect, InvalidConfigError> {
    bucket_rect(0, config)
}

pub fn gold_bucket_source_rect(config: &ConfigRecord) -> Result<Rect, InvalidConfigError> {
    bucket_rect(145, config)
}

pub fn gold_bucket_empty_source_rect(config: &ConfigRecord) -> Result<Rect, InvalidConfigError> {
    bucket_rect(130, config)
}

/// Tile the output bucket sits on: the bottom-right corner of the footprint.
pub fn item_bucket_tile(
    config: &ConfigRecord,
    tile_x: i32,
    tile_y: i32,
) -> Result<(i32, i32), ComputeError> {
    let config = config.validate()?;
    // width - 1 cannot overflow once validated
    let x = checked(tile_x.checked_add(config.width - 1), "bucket tile x")?;
    let y = checked(tile_y.checked_add(config.height - 1), "bucket tile y")?;
    Ok((x, y))
}

/// Center tile, also where item requests are displayed.
pub fn center_tile(
    config: &ConfigRecord,
    tile_x: i32,
    tile_y: i32,
) -> Result<(i32, i32), ComputeError> {
    let config = config.validate()?;
    let x = checked(tile_x.checked_add(config.width / 2), "center tile x")?;
    let y = checked(tile_y.checked_add(config.height / 2), "center tile y")?;
    Ok((x, y))
}

pub fn building_size(config: &ConfigRecord) -> Result<(i32, i32), InvalidConfigError> {
    let config = config.validate()?;
    Ok((config.width, config.height))
}

/// Named value computers usable from patch scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Computer {
    PondSourceRect,
    PondBottomSourceRect,
    PondOrigin,
    NettingHeight,
    NettingSourceRect,
    NettingSourceRectZero,
    BucketOffset,
    BucketSourceRect,
    GoldBucketSourceRect,
    GoldBucketEmptySourceRect,
    SizeX,
    SizeY,
    PixelWidth,
    PixelHeight,
    Scale,
    ScaleY,
    ScaledOffset,
    ScaledOffsetY,
}

const COMPUTERS: &[Computer] = &[
    Computer::PondSourceRect,
    Computer::PondBottomSourceRect,
    Computer::PondOrigin,
    Computer::NettingHeight,
    Computer::NettingSourceRect,
    Computer::NettingSourceRectZero,
    Computer::BucketOffset,
    Computer::BucketSourceRect,
    Computer::GoldBucketSourceRect,
    Computer::GoldBucketEmptySourceRect,
    Computer::SizeX,
    Computer::SizeY,
    Computer::PixelWidth,
    Computer::PixelHeight,
    Computer::Scale,
    Computer::ScaleY,
    Computer::ScaledOffset,
    Computer::ScaledOffsetY,
];

impl Computer {
    pub fn all() -> impl Iterator<Item = Computer> {
        COMPUTERS.iter().copied()
    }

    /// Script-facing kebab-case name.
    pub fn name(self) -> &'static str {
        self.names().0
    }

    /// Kebab-case name and host helper name.
    fn names(self) -> (&'static str, &'static str) {
        use Computer::*;
        match self {
            PondSourceRect => ("pond-source-rect", "GetPondSourceRect"),
            PondBottomSourceRect => ("pond-bottom-source-rect", "GetPondBottomSourceRect"),
            PondOrigin => ("pond-origin", "GetPondOrigin"),
            NettingHeight => ("netting-height", "GetNettingHeight"),
            NettingSourceRect => ("netting-source-rect", "GetNettingSourceRect"),
            NettingSourceRectZero => ("netting-source-rect-zero", "GetNettingSourceRectZero"),
            BucketOffset => ("bucket-offset", "GetBucketOffset"),
            BucketSourceRect => ("bucket-source-rect", "GetBucketSourceRect"),
            GoldBucketSourceRect => ("gold-bucket-source-rect", "GetGoldBucketSourceRect"),
            GoldBucketEmptySourceRect => {
                ("gold-bucket-empty-source-rect", "GetGoldBucketEmptySourceRect")
            }
            SizeX => ("size-x", "GetSizeX"),
            SizeY => ("size-y", "GetSizeY"),
            PixelWidth => ("pixel-width", "GetPixelWidth"),
            PixelHeight => ("pixel-height", "GetPixelHeight"),
            Scale => ("scale", "GetScaleX"),
            ScaleY => ("scale-y", "GetScaleY"),
            ScaledOffset => ("scaled-offset", "GetScaledOffsetX"),
            ScaledOffsetY => ("scaled-offset-y", "GetScaledOffsetY"),
        }
    }

    pub fn from_name(name: &str) -> Result<Computer, ComputeError> {
        Self::all()
            .find(|c| c.name() == name)
            .ok_or_else(|| ComputeError::UnknownComputer {
                name: name.to_string(),
                hint: Self::suggest(name)
                    .map(|s| format!(" (did you mean '{s}'?)"))
                    .unwrap_or_default(),
            })
    }

    fn suggest(name: &str) -> Option<&'static str> {
        Self::all()
            .map(|c| (c.name(), strsim::jaro_winkler(name, c.name())))
            .filter(|(_, score)| *score > 0.85)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(n, _)| n)
    }

    /// Whether the computer takes an integer argument.
    pub fn takes_argument(self) -> bool {
        matches!(
            self,
            Computer::NettingSourceRect | Computer::ScaledOffset | Computer::ScaledOffsetY
        )
    }

    /// Whether the result can be folded into a single operand.
    pub fn is_scalar(self) -> bool {
        self.return_type() == "i4" || self.return_type() == "r4"
    }

    fn return_type(self) -> &'static str {
        use Computer::*;
        match self {
            PondSourceRect | PondBottomSourceRect | NettingSourceRect | NettingSourceRectZero
            | BucketSourceRect | GoldBucketSourceRect | GoldBucketEmptySourceRect => "Rectangle",
            PondOrigin | BucketOffset => "Vector2",
            NettingHeight | SizeX | SizeY | PixelWidth | PixelHeight | ScaledOffset
            | ScaledOffsetY => "i4",
            Scale | ScaleY => "r4",
        }
    }

    /// Static helper the patched method calls at runtime.
    pub fn host_method(self) -> MethodRef {
        let params: &[&str] = match self {
            Computer::NettingSourceRect => &["BuildingData", "NetInt"],
            Computer::ScaledOffset | Computer::ScaledOffsetY => &["BuildingData", "i4"],
            _ => &["BuildingData"],
        };
        MethodRef::new(Some(self.return_type()), HOST_CLASS, self.names().1, params)
    }

    pub fn evaluate(self, config: &ConfigRecord, arg: Option<i32>) -> Result<Value, ComputeError> {
        let name = self.name();
        let arg = match (self.takes_argument(), arg) {
            (true, Some(v)) => v,
            (true, None) => return Err(ComputeError::MissingArgument { name }),
            (false, Some(_)) => return Err(ComputeError::UnexpectedArgument { name }),
            (false, None) => 0,
        };

        let value = match self {
            Computer::PondSourceRect => Value::Rect(source_rect(config)?),
            Computer::PondBottomSourceRect => Value::Rect(pond_bottom_source_rect(config)?),
            Computer::PondOrigin => Value::Vec2(pond_origin(config)?),
            Computer::NettingHeight => Value::Int(netting_height(config)?),
            Computer::NettingSourceRect => Value::Rect(netting_source_rect(config, arg)?),
            Computer::NettingSourceRectZero => Value::Rect(netting_source_rect_zero(config)?),
            Computer::BucketOffset => Value::Vec2(bucket_offset(config)?),
            Computer::BucketSourceRect => Value::Rect(bucket_source_rect(config)?),
            Computer::GoldBucketSourceRect => Value::Rect(gold_bucket_source_rect(config)?),
            Computer::GoldBucketEmptySourceRect => {
                Value::Rect(gold_bucket_empty_source_rect(config)?)
            }
            Computer::SizeX => Value::Int(building_size(config)?.0),
            Computer::SizeY => Value::Int(building_size(config)?.1),
            Computer::PixelWidth => Value::Int(pixel_width(config)?),
            Computer::PixelHeight => Value::Int(pixel_height(config)?),
            Computer::Scale => Value::Float(scale(config)?),
            Computer::ScaleY => Value::Float(scale_y(config)?),
            Computer::ScaledOffset => Value::Int(scaled_offset(arg, config)?),
            Computer::ScaledOffsetY => Value::Int(scaled_offset_y(arg, config)?),
        };
        Ok(value)
    }

    /// Evaluate and render as operand text; fails for rectangles and vectors.
    pub fn evaluate_literal(
        self,
        config: &ConfigRecord,
        arg: Option<i32>,
    ) -> Result<String, ComputeError> {
        if !self.is_scalar() {
            return Err(ComputeError::NotScalar { name: self.name() });
        }
        let value = self.evaluate(config, arg)?;
        value
            .literal()
            .ok_or(ComputeError::NotScalar { name: self.name() })
    }
}

impl fmt::Display for Computer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
