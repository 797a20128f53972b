//! Stroke and text elements in the Xournal++ layer format.
//!
//! Solid fills in the stroke color are stored as an alpha-only `fill`
//! attribute. Any other fill goes to `brushcolor`, which Xournal++ ignores.

use std::fmt::Write as _;

use roxmltree::Node;
use slidecache_core::PointF;
use tracing::warn;

use crate::color::Rgba;
use crate::container::PathContainer;
use crate::path::{
    BasicStroke, Brush, BrushStyle, DrawTool, FreehandStroke, Path, PenStyle, TextBox, ToolKind,
};

impl PathContainer {
    /// Writes the visible items as `<stroke>` and `<text>` elements.
    pub fn write_xml(&self, out: &mut String) {
        for (_, path) in self.items() {
            write_path(out, path);
        }
    }

    /// Appends the items stored below `layer` without recording history.
    pub fn load_drawings(&mut self, layer: Node<'_, '_>) -> usize {
        let mut loaded = 0;
        for path in layer.children().filter_map(read_element) {
            self.push_untracked(path);
            loaded += 1;
        }
        loaded
    }

    /// Distributes the items below `layer` between two page halves. Items
    /// starting right of `page_half` go to `right`.
    pub fn load_split(
        layer: Node<'_, '_>,
        left: &mut PathContainer,
        right: &mut PathContainer,
        page_half: f64,
    ) {
        for path in layer.children().filter_map(read_element) {
            match path.first_point() {
                Some(point) if point.x > page_half => right.push_untracked(path),
                _ => left.push_untracked(path),
            };
        }
    }
}

fn write_path(out: &mut String, path: &Path) {
    match path {
        Path::Text(text) => {
            let _ = write!(
                out,
                "<text font=\"{}\" size=\"{}\" color=\"{}\" x=\"{}\" y=\"{}\">{}</text>",
                escape(&text.font),
                text.size,
                text.color,
                text.position.x,
                text.position.y,
                escape(&text.text)
            );
        }
        Path::Freehand(stroke) => {
            let widths: Vec<String> = stroke.widths.iter().map(f64::to_string).collect();
            write_stroke(out, &stroke.tool, &widths.join(" "), &stroke.points);
        }
        Path::Basic(stroke) => {
            write_stroke(out, &stroke.tool, &stroke.tool.width.to_string(), &stroke.points);
        }
        Path::Shape(shape) => {
            write_stroke(out, &shape.tool, &shape.tool.width.to_string(), &shape.outline());
        }
    }
}

fn write_stroke(out: &mut String, tool: &DrawTool, width: &str, points: &[PointF]) {
    let _ = write!(
        out,
        "<stroke tool=\"{}\" color=\"{}\" width=\"{}\"",
        tool.kind.xml_name(),
        tool.color,
        width
    );
    if tool.style != PenStyle::Solid {
        let _ = write!(out, " style=\"{}\"", tool.style.xml_name());
    }
    if let Some(brush) = tool.brush {
        if brush.color.same_rgb(&tool.color) {
            let alpha = brush.color.alpha_f() / (tool.color.alpha_f() + 1e-6);
            if alpha >= 1.0 {
                out.push_str(" fill=\"255\"");
            } else {
                let _ = write!(out, " fill=\"{}\"", (alpha * 255.0 + 0.5) as u8);
            }
        } else {
            let _ = write!(out, " brushcolor=\"{}\"", brush.color);
        }
        if brush.style != BrushStyle::Solid {
            let _ = write!(out, " brushstyle=\"{}\"", brush.style.xml_name());
        }
    }
    out.push('>');
    let coordinates: Vec<String> = points
        .iter()
        .flat_map(|point| [point.x.to_string(), point.y.to_string()])
        .collect();
    out.push_str(&coordinates.join(" "));
    out.push_str("</stroke>");
}

fn read_element(node: Node<'_, '_>) -> Option<Path> {
    match node.tag_name().name() {
        "stroke" => read_stroke(node),
        "text" => read_text(node),
        _ => None,
    }
}

fn read_stroke(node: Node<'_, '_>) -> Option<Path> {
    let tool_name = node.attribute("tool").unwrap_or_default();
    let Some(mut kind) = ToolKind::from_xml_name(tool_name) else {
        warn!(tool = tool_name, "skipping stroke drawn with unknown tool");
        return None;
    };
    let width_attr = node.attribute("width").unwrap_or_default();
    if kind == ToolKind::Pen && !width_attr.trim().contains(' ') {
        kind = ToolKind::FixedWidthPen;
    }

    let color = node
        .attribute("color")
        .and_then(|value| value.parse::<Rgba>().ok())
        .unwrap_or_default();
    let widths: Vec<f64> = width_attr
        .split_whitespace()
        .map(|value| value.parse::<f64>().unwrap_or(0.0))
        .map(|width| if width > 0.0 { width } else { 1.0 })
        .collect();
    let mut tool = DrawTool::new(kind, color, widths.first().copied().unwrap_or(1.0));
    tool.style = node
        .attribute("style")
        .and_then(PenStyle::from_xml_name)
        .unwrap_or_default();
    tool.brush = read_brush(node, color);

    let points = read_coordinates(node.text().unwrap_or_default());
    if points.is_empty() {
        warn!("skipping stroke without coordinates");
        return None;
    }
    Some(match kind {
        ToolKind::Pen => Path::Freehand(FreehandStroke::new(tool, points, widths)),
        _ => Path::Basic(BasicStroke { tool, points }),
    })
}

fn read_brush(node: Node<'_, '_>, stroke: Rgba) -> Option<Brush> {
    let style = node
        .attribute("brushstyle")
        .and_then(BrushStyle::from_xml_name)
        .unwrap_or_default();
    if let Some(color) = node
        .attribute("brushcolor")
        .and_then(|value| value.parse::<Rgba>().ok())
    {
        return Some(Brush { color, style });
    }
    let fill = node
        .attribute("fill")
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0);
    if !(1..=255).contains(&fill) {
        return None;
    }
    let alpha = (fill as f64 * f64::from(stroke.a) / 255.0).round() as u8;
    Some(Brush {
        color: stroke.with_alpha(alpha),
        style,
    })
}

fn read_coordinates(text: &str) -> Vec<PointF> {
    let values: Vec<f64> = text
        .split_whitespace()
        .filter_map(|value| value.parse::<f64>().ok())
        .collect();
    values
        .chunks_exact(2)
        .map(|pair| PointF::new(pair[0], pair[1]))
        .collect()
}

fn read_text(node: Node<'_, '_>) -> Option<Path> {
    let text = node.text().unwrap_or_default();
    if text.is_empty() {
        return None;
    }
    let number = |name: &str| {
        node.attribute(name)
            .and_then(|value| value.parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    Some(Path::Text(TextBox {
        position: PointF::new(number("x"), number("y")),
        font: node.attribute("font").unwrap_or_default().to_owned(),
        size: number("size"),
        color: node
            .attribute("color")
            .and_then(|value| value.parse::<Rgba>().ok())
            .unwrap_or_default(),
        text: text.to_owned(),
    }))
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    use slidecache_core::RectF;

    use crate::path::{Shape, ShapeKind};

    fn layer_xml(body: &str) -> String {
        format!("<layer>{body}</layer>")
    }

    fn load(body: &str) -> PathContainer {
        let source = layer_xml(body);
        let document = roxmltree::Document::parse(&source).unwrap();
        let mut container = PathContainer::with_history_limit(10);
        container.load_drawings(document.root_element());
        container
    }

    fn written(container: &PathContainer) -> String {
        let mut out = String::new();
        container.write_xml(&mut out);
        out
    }

    fn paths(container: &PathContainer) -> Vec<Path> {
        container.items().into_iter().map(|(_, path)| path.clone()).collect()
    }

    #[test]
    fn strokes_and_text_survive_a_round_trip() {
        let mut container = PathContainer::with_history_limit(10);
        let red = Rgba::new(0xff, 0, 0, 0xff);
        container.append(Path::Freehand(FreehandStroke::new(
            DrawTool::new(ToolKind::Pen, red, 0.5),
            vec![PointF::new(1.0, 2.0), PointF::new(3.5, 4.0)],
            vec![0.5, 1.25],
        )));
        let mut highlighter = DrawTool::new(ToolKind::Highlighter, Rgba::new(0, 0, 0xff, 0x80), 8.0);
        highlighter.style = PenStyle::Dash;
        container.append(Path::Basic(BasicStroke {
            tool: highlighter,
            points: vec![PointF::new(0.0, 0.0), PointF::new(10.0, 0.0)],
        }));
        container.append(Path::Text(TextBox {
            position: PointF::new(5.0, 6.0),
            font: "Serif".into(),
            size: 14.0,
            color: red,
            text: "a < b & \"c\"".into(),
        }));

        let reloaded = load(&written(&container));
        assert_eq!(paths(&reloaded), paths(&container));
    }

    #[test]
    fn fill_in_stroke_color_is_stored_as_alpha() {
        let stroke = Rgba::new(0x10, 0x20, 0x30, 0xff);
        let tool = DrawTool::new(ToolKind::FixedWidthPen, stroke, 2.0).with_brush(Brush {
            color: stroke.with_alpha(0x80),
            style: BrushStyle::Solid,
        });
        let mut container = PathContainer::with_history_limit(10);
        container.append(Path::Basic(BasicStroke {
            tool,
            points: vec![PointF::new(0.0, 0.0), PointF::new(1.0, 1.0)],
        }));

        let xml = written(&container);
        assert!(xml.contains("fill=\"128\""), "{xml}");
        assert!(!xml.contains("brushcolor"), "{xml}");
        assert!(xml.contains("color=\"#102030ff\""), "{xml}");

        let reloaded = load(&xml);
        assert_eq!(reloaded.items()[0].1.tool().unwrap().brush, tool.brush);
    }

    #[test]
    fn foreign_fill_color_uses_brushcolor() {
        let tool = DrawTool::new(ToolKind::FixedWidthPen, Rgba::BLACK, 2.0).with_brush(Brush {
            color: Rgba::new(0xff, 0xff, 0, 0x40),
            style: BrushStyle::Cross,
        });
        let mut container = PathContainer::with_history_limit(10);
        container.append(Path::Shape(Shape {
            tool,
            kind: ShapeKind::Rectangle(RectF::new(0.0, 0.0, 4.0, 2.0)),
        }));

        let xml = written(&container);
        assert!(xml.contains("brushcolor=\"#ffff0040\""), "{xml}");
        assert!(xml.contains("brushstyle=\"cross\""), "{xml}");
        assert!(!xml.contains("fill="), "{xml}");

        let reloaded = load(&xml);
        let items = reloaded.items();
        let Path::Basic(stroke) = items[0].1 else {
            panic!("shape should read back as a stroke");
        };
        assert_eq!(stroke.tool.brush, tool.brush);
        assert_eq!(stroke.points.len(), 5);
    }

    #[test]
    fn questionable_input_is_skipped_or_normalised() {
        let container = load(concat!(
            "<stroke tool=\"eraser\" color=\"#000000ff\" width=\"1\">0 0 1 1</stroke>",
            "<text font=\"Sans\" size=\"10\" color=\"#000000ff\" x=\"0\" y=\"0\"></text>",
            "<stroke tool=\"pen\" color=\"#000000ff\" width=\"-3\">0 0 1 1</stroke>",
            "<image/>",
        ));
        let items = container.items();
        assert_eq!(items.len(), 1);
        let Path::Basic(stroke) = items[0].1 else {
            panic!("single width should read as a fixed width stroke");
        };
        assert_eq!(stroke.tool.kind, ToolKind::FixedWidthPen);
        assert_eq!(stroke.tool.width, 1.0);
        assert_eq!(container.history_len(), 0);
    }

    #[test]
    fn split_loading_uses_first_point() {
        let source = layer_xml(concat!(
            "<stroke tool=\"pen\" color=\"#000000ff\" width=\"1\">10 0 90 0</stroke>",
            "<stroke tool=\"pen\" color=\"#000000ff\" width=\"1\">60 0 5 0</stroke>",
            "<text font=\"Sans\" size=\"10\" color=\"#000000ff\" x=\"70\" y=\"0\">x</text>",
        ));
        let document = roxmltree::Document::parse(&source).unwrap();
        let mut left = PathContainer::with_history_limit(10);
        let mut right = PathContainer::with_history_limit(10);
        PathContainer::load_split(document.root_element(), &mut left, &mut right, 50.0);
        assert_eq!(left.len(), 1);
        assert_eq!(right.len(), 2);
    }
}
