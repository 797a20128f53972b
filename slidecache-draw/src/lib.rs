//! Per-slide drawings with transactional undo history and Xournal++ style
//! persistence.

mod color;
mod container;
mod drawings;
mod history;
mod path;
mod xml;

pub use color::{ParseColorError, Rgba};
pub use container::{PathContainer, Scene};
pub use drawings::SlideDrawings;
pub use history::{HistoryState, PathId};
pub use path::{
    BasicStroke, Brush, BrushStyle, DrawTool, EraseOutcome, FreehandStroke, Path, PenStyle,
    Shape, ShapeKind, TextBox, ToolKind,
};

#[derive(Debug, thiserror::Error)]
pub enum DrawError {
    #[error("{operation} called while history is {state:?}")]
    MicroStepMisuse {
        operation: &'static str,
        state: HistoryState,
    },
    #[error("malformed drawings: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
