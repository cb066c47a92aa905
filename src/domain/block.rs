use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Text,
    Table,
    Image,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Table => "table",
            BlockType::Image => "image",
        }
    }

    /// Text and table blocks are merged into vertical strips in Pass 1;
    /// image blocks are always cropped individually.
    pub fn is_strip_eligible(&self) -> bool {
        matches!(self, BlockType::Text | BlockType::Table)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(BlockType::Text),
            "table" => Ok(BlockType::Table),
            "image" => Ok(BlockType::Image),
            other => Err(format!("Invalid block type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Rectangle,
    Polygon,
}

/// A requested region on one PDF page. Blocks come from the client's
/// `blocks.json` and are never mutated by the core; OCR results are attached
/// as separate records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub page_index: u32,
    pub block_type: BlockType,
    #[serde(default = "default_shape")]
    pub shape_type: ShapeType,
    /// Pixel coordinates [x1, y1, x2, y2] on the client's rendered canvas.
    pub coords_px: [f64; 4],
    /// Normalized coordinates [x1, y1, x2, y2] in [0, 1]; authoritative
    /// across re-renders at different DPI.
    pub coords_norm: [f64; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon_points: Option<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

fn default_shape() -> ShapeType {
    ShapeType::Rectangle
}

impl Block {
    /// Project normalized coordinates onto a raster of the given size.
    /// Polygon blocks crop to their bounding box.
    pub fn pixel_rect(&self, raster_width: u32, raster_height: u32) -> (i64, i64, i64, i64) {
        let [x1, y1, x2, y2] = self.coords_norm;
        let w = f64::from(raster_width);
        let h = f64::from(raster_height);
        (
            (x1 * w).floor() as i64,
            (y1 * h).floor() as i64,
            (x2 * w).ceil() as i64,
            (y2 * h).ceil() as i64,
        )
    }

    pub fn is_stamp(&self) -> bool {
        self.category.as_deref() == Some("stamp")
    }
}
