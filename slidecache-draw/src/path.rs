//! Drawable items stored in a [`PathContainer`](crate::PathContainer).

use std::f64::consts::TAU;
use std::ops::Range;

use slidecache_core::{PointF, RectF};

use crate::color::Rgba;

/// Segments used to approximate an ellipse outline.
const ELLIPSE_SEGMENTS: usize = 36;
/// Average glyph advance relative to the font size, for text bounds.
const GLYPH_ADVANCE: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Pressure sensitive pen, one width per point.
    Pen,
    FixedWidthPen,
    Highlighter,
}

impl ToolKind {
    pub fn xml_name(self) -> &'static str {
        match self {
            ToolKind::Pen | ToolKind::FixedWidthPen => "pen",
            ToolKind::Highlighter => "highlighter",
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        match name {
            "pen" => Some(ToolKind::Pen),
            "highlighter" => Some(ToolKind::Highlighter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PenStyle {
    #[default]
    Solid,
    Dash,
    Dot,
    DashDot,
    DashDotDot,
}

impl PenStyle {
    pub fn xml_name(self) -> &'static str {
        match self {
            PenStyle::Solid => "solid",
            PenStyle::Dash => "dash",
            PenStyle::Dot => "dot",
            PenStyle::DashDot => "dashdot",
            PenStyle::DashDotDot => "dashdotdot",
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        [
            PenStyle::Solid,
            PenStyle::Dash,
            PenStyle::Dot,
            PenStyle::DashDot,
            PenStyle::DashDotDot,
        ]
        .into_iter()
        .find(|style| style.xml_name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrushStyle {
    #[default]
    Solid,
    Dense,
    Horizontal,
    Vertical,
    Cross,
    Diagonal,
}

impl BrushStyle {
    pub fn xml_name(self) -> &'static str {
        match self {
            BrushStyle::Solid => "solid",
            BrushStyle::Dense => "dense",
            BrushStyle::Horizontal => "horizontal",
            BrushStyle::Vertical => "vertical",
            BrushStyle::Cross => "cross",
            BrushStyle::Diagonal => "diagonal",
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        [
            BrushStyle::Solid,
            BrushStyle::Dense,
            BrushStyle::Horizontal,
            BrushStyle::Vertical,
            BrushStyle::Cross,
            BrushStyle::Diagonal,
        ]
        .into_iter()
        .find(|style| style.xml_name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brush {
    pub color: Rgba,
    pub style: BrushStyle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawTool {
    pub kind: ToolKind,
    pub color: Rgba,
    pub width: f64,
    pub style: PenStyle,
    pub brush: Option<Brush>,
}

impl DrawTool {
    pub fn new(kind: ToolKind, color: Rgba, width: f64) -> Self {
        Self {
            kind,
            color,
            width,
            style: PenStyle::Solid,
            brush: None,
        }
    }

    pub fn with_brush(mut self, brush: Brush) -> Self {
        self.brush = Some(brush);
        self
    }
}

/// Pen stroke with a width for every point.
#[derive(Debug, Clone, PartialEq)]
pub struct FreehandStroke {
    pub tool: DrawTool,
    pub points: Vec<PointF>,
    pub widths: Vec<f64>,
}

impl FreehandStroke {
    /// Missing widths repeat the last one (or the tool width), extra widths
    /// are dropped.
    pub fn new(tool: DrawTool, points: Vec<PointF>, mut widths: Vec<f64>) -> Self {
        let fill = widths.last().copied().unwrap_or(tool.width);
        widths.resize(points.len(), fill);
        Self {
            tool,
            points,
            widths,
        }
    }

    fn max_width(&self) -> f64 {
        self.widths.iter().copied().fold(self.tool.width, f64::max)
    }
}

/// Stroke drawn with a constant width.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicStroke {
    pub tool: DrawTool,
    pub points: Vec<PointF>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub position: PointF,
    pub font: String,
    pub size: f64,
    pub color: Rgba,
    pub text: String,
}

impl TextBox {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn bounding_rect(&self) -> RectF {
        let lines = self.text.lines().count().max(1) as f64;
        let columns = self
            .text
            .lines()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0) as f64;
        RectF::new(
            self.position.x,
            self.position.y,
            self.position.x + (columns * self.size * GLYPH_ADVANCE).max(self.size),
            self.position.y + lines * self.size,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShapeKind {
    Rectangle(RectF),
    Ellipse(RectF),
    Line(PointF, PointF),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub tool: DrawTool,
    pub kind: ShapeKind,
}

impl Shape {
    /// Closed polyline tracing the shape.
    pub fn outline(&self) -> Vec<PointF> {
        match self.kind {
            ShapeKind::Line(from, to) => vec![from, to],
            ShapeKind::Rectangle(rect) => vec![
                PointF::new(rect.left, rect.top),
                PointF::new(rect.right, rect.top),
                PointF::new(rect.right, rect.bottom),
                PointF::new(rect.left, rect.bottom),
                PointF::new(rect.left, rect.top),
            ],
            ShapeKind::Ellipse(rect) => {
                let center = PointF::new(
                    (rect.left + rect.right) / 2.0,
                    (rect.top + rect.bottom) / 2.0,
                );
                let (rx, ry) = (rect.width() / 2.0, rect.height() / 2.0);
                (0..=ELLIPSE_SEGMENTS)
                    .map(|i| {
                        let angle = TAU * i as f64 / ELLIPSE_SEGMENTS as f64;
                        PointF::new(center.x + rx * angle.cos(), center.y + ry * angle.sin())
                    })
                    .collect()
            }
        }
    }

    pub fn to_stroke(&self) -> BasicStroke {
        BasicStroke {
            tool: self.tool,
            points: self.outline(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Path {
    Freehand(FreehandStroke),
    Basic(BasicStroke),
    Text(TextBox),
    Shape(Shape),
}

/// Result of running the eraser over a single path.
#[derive(Debug, Clone, PartialEq)]
pub enum EraseOutcome {
    Untouched,
    Erased,
    Split(Vec<Path>),
}

impl Path {
    pub fn tool(&self) -> Option<&DrawTool> {
        match self {
            Path::Freehand(stroke) => Some(&stroke.tool),
            Path::Basic(stroke) => Some(&stroke.tool),
            Path::Shape(shape) => Some(&shape.tool),
            Path::Text(_) => None,
        }
    }

    /// Anchor used to decide which page half a path belongs to.
    pub fn first_point(&self) -> Option<PointF> {
        match self {
            Path::Freehand(stroke) => stroke.points.first().copied(),
            Path::Basic(stroke) => stroke.points.first().copied(),
            Path::Text(text) => Some(text.position),
            Path::Shape(shape) => shape.outline().first().copied(),
        }
    }

    pub fn bounding_rect(&self) -> RectF {
        match self {
            Path::Freehand(stroke) => {
                RectF::from_points(&stroke.points).margins_added(stroke.max_width() / 2.0)
            }
            Path::Basic(stroke) => {
                RectF::from_points(&stroke.points).margins_added(stroke.tool.width / 2.0)
            }
            Path::Text(text) => text.bounding_rect(),
            Path::Shape(shape) => {
                RectF::from_points(&shape.outline()).margins_added(shape.tool.width / 2.0)
            }
        }
    }

    /// Removes every point within `radius` of `pos` and splits the path
    /// into the pieces that remain. Pieces shorter than two points vanish.
    /// Text is never erased.
    pub fn split_erase(&self, pos: PointF, radius: f64) -> EraseOutcome {
        match self {
            Path::Text(_) => EraseOutcome::Untouched,
            Path::Freehand(stroke) => match surviving_runs(&stroke.points, pos, radius) {
                None => EraseOutcome::Untouched,
                Some(runs) => collect_pieces(runs, |run| {
                    let widths = stroke
                        .widths
                        .iter()
                        .skip(run.start)
                        .take(run.len())
                        .copied()
                        .collect();
                    Path::Freehand(FreehandStroke::new(
                        stroke.tool,
                        stroke.points[run].to_vec(),
                        widths,
                    ))
                }),
            },
            Path::Basic(stroke) => split_basic(stroke, pos, radius),
            Path::Shape(shape) => split_basic(&shape.to_stroke(), pos, radius),
        }
    }
}

fn split_basic(stroke: &BasicStroke, pos: PointF, radius: f64) -> EraseOutcome {
    match surviving_runs(&stroke.points, pos, radius) {
        None => EraseOutcome::Untouched,
        Some(runs) => collect_pieces(runs, |run| {
            Path::Basic(BasicStroke {
                tool: stroke.tool,
                points: stroke.points[run].to_vec(),
            })
        }),
    }
}

fn collect_pieces(runs: Vec<Range<usize>>, piece: impl Fn(Range<usize>) -> Path) -> EraseOutcome {
    if runs.is_empty() {
        EraseOutcome::Erased
    } else {
        EraseOutcome::Split(runs.into_iter().map(piece).collect())
    }
}

/// `None` if the eraser misses every point, otherwise the ranges of points
/// that survive with at least two points each.
fn surviving_runs(points: &[PointF], pos: PointF, radius: f64) -> Option<Vec<Range<usize>>> {
    let erased: Vec<bool> = points
        .iter()
        .map(|point| point.distance_to(pos) <= radius)
        .collect();
    if !erased.contains(&true) {
        return None;
    }

    let mut runs = Vec::new();
    let mut start = None;
    for (index, hit) in erased.into_iter().chain(std::iter::once(true)).enumerate() {
        match (start, hit) {
            (None, false) => start = Some(index),
            (Some(begin), true) => {
                if index - begin >= 2 {
                    runs.push(begin..index);
                }
                start = None;
            }
            _ => {}
        }
    }
    Some(runs)
}
