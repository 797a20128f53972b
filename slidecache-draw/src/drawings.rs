use std::collections::BTreeMap;
use std::fs;
use std::path::Path as FsPath;

use slidecache_core::{PageIndex, PagePart, Preferences, SizeF};
use tracing::{debug, info, warn};

use crate::container::PathContainer;
use crate::DrawError;

/// Drawings of a whole document, one container per page or page half.
#[derive(Debug)]
pub struct SlideDrawings {
    visible_history: usize,
    hidden_history: usize,
    /// Pages are drawn on as two halves instead of a whole.
    split_halves: bool,
    containers: BTreeMap<(PageIndex, PagePart), PathContainer>,
    page_sizes: BTreeMap<PageIndex, SizeF>,
}

impl SlideDrawings {
    pub fn new(preferences: &Preferences) -> Self {
        Self {
            visible_history: preferences.history_length_visible_slides,
            hidden_history: preferences.history_length_hidden_slides,
            split_halves: false,
            containers: BTreeMap::new(),
            page_sizes: BTreeMap::new(),
        }
    }

    pub fn with_split_halves(mut self, split_halves: bool) -> Self {
        self.split_halves = split_halves;
        self
    }

    pub fn set_page_size(&mut self, page: PageIndex, size: SizeF) {
        self.page_sizes.insert(page, size);
    }

    pub fn container(&self, page: PageIndex, part: PagePart) -> Option<&PathContainer> {
        self.containers.get(&(page, part))
    }

    /// Container for `page`, created on first use.
    pub fn container_mut(&mut self, page: PageIndex, part: PagePart) -> &mut PathContainer {
        let limit = self.visible_history;
        self.containers
            .entry((page, part))
            .or_insert_with(|| PathContainer::with_history_limit(limit))
    }

    pub fn pages(&self) -> impl Iterator<Item = (PageIndex, PagePart)> + '_ {
        self.containers.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.values().all(PathContainer::is_empty)
    }

    /// Shortens the history of every container not in `visible`. Visible
    /// containers keep the longer limit.
    pub fn trim_hidden(&mut self, visible: &[(PageIndex, PagePart)]) {
        for (key, container) in &mut self.containers {
            if visible.contains(key) {
                container.set_history_limit(self.visible_history);
            } else {
                container.set_history_limit(self.hidden_history);
            }
        }
    }

    pub fn write_xml(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" standalone=\"no\"?>\n<xournal>\n");
        let mut pages: Vec<PageIndex> = self.containers.keys().map(|(page, _)| *page).collect();
        pages.extend(self.page_sizes.keys().copied());
        pages.sort_unstable();
        pages.dedup();

        for page in pages {
            out.push_str("<page");
            if let Some(size) = self.page_sizes.get(&page) {
                out.push_str(&format!(
                    " width=\"{}\" height=\"{}\"",
                    size.width, size.height
                ));
            }
            out.push_str(&format!(" number=\"{page}\">\n<layer>"));
            for part in [PagePart::FullPage, PagePart::LeftHalf, PagePart::RightHalf] {
                if let Some(container) = self.containers.get(&(page, part)) {
                    container.write_xml(&mut out);
                }
            }
            out.push_str("</layer>\n</page>\n");
        }
        out.push_str("</xournal>\n");
        out
    }

    /// Replaces the drawings of every page found in `source`. Returns the
    /// number of pages read.
    pub fn load_xml(&mut self, source: &str) -> Result<usize, DrawError> {
        let document = roxmltree::Document::parse(source)?;
        let mut loaded = 0;
        for (position, page) in document
            .root_element()
            .children()
            .filter(|node| node.has_tag_name("page"))
            .enumerate()
        {
            let index = page
                .attribute("number")
                .and_then(|value| value.parse::<PageIndex>().ok())
                .unwrap_or(position);
            let size = match (
                page.attribute("width").and_then(|v| v.parse::<f64>().ok()),
                page.attribute("height").and_then(|v| v.parse::<f64>().ok()),
            ) {
                (Some(width), Some(height)) => {
                    let size = SizeF::new(width, height);
                    self.page_sizes.insert(index, size);
                    Some(size)
                }
                _ => None,
            };

            self.containers.retain(|(existing, _), _| *existing != index);
            for layer in page.children().filter(|node| node.has_tag_name("layer")) {
                if self.split_halves {
                    let page_half = match size {
                        Some(size) => size.width / 2.0,
                        None => {
                            warn!(page = index, "page without width, drawings go to the left half");
                            f64::INFINITY
                        }
                    };
                    let mut left = self.take_container(index, PagePart::LeftHalf);
                    let mut right = self.take_container(index, PagePart::RightHalf);
                    PathContainer::load_split(layer, &mut left, &mut right, page_half);
                    self.containers.insert((index, PagePart::LeftHalf), left);
                    self.containers.insert((index, PagePart::RightHalf), right);
                } else {
                    self.container_mut(index, PagePart::FullPage)
                        .load_drawings(layer);
                }
            }
            loaded += 1;
        }
        debug!(pages = loaded, "loaded drawings");
        Ok(loaded)
    }

    pub fn load(&mut self, path: &FsPath) -> Result<usize, DrawError> {
        let source = fs::read_to_string(path)?;
        let pages = self.load_xml(&source)?;
        info!(path = %path.display(), pages, "read drawings");
        Ok(pages)
    }

    pub fn save(&self, path: &FsPath) -> Result<(), DrawError> {
        fs::write(path, self.write_xml())?;
        info!(path = %path.display(), "wrote drawings");
        Ok(())
    }

    fn take_container(&mut self, page: PageIndex, part: PagePart) -> PathContainer {
        self.containers
            .remove(&(page, part))
            .unwrap_or_else(|| PathContainer::with_history_limit(self.visible_history))
    }
}
