//! Page preview: a rendered page, its text layer, and zoom state.

use crate::citation::locate_passage;
use crate::documents::Document;
use crate::error::ChatError;

pub const ZOOM_STEP: f32 = 1.25;
pub const MIN_SCALE: f32 = 0.25;
pub const MAX_SCALE: f32 = 4.0;

/// US Letter in PDF points, used when the renderer knows no better.
const DEFAULT_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    /// Top of the fragment in page points.
    pub y: f32,
}

impl AsRef<str> for TextFragment {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub filename: String,
    pub page: usize,
    pub page_count: usize,
    pub width: f32,
    pub height: f32,
    pub text_layer: Vec<TextFragment>,
}

/// Produces a page and its text layer.
pub trait PageRenderer: Send + Sync {
    fn render(&self, document: &Document, page: usize) -> Result<RenderedPage, ChatError>;
}

/// Builds the text layer from the extracted page text, one fragment per line.
#[derive(Debug, Default)]
pub struct TextLayerRenderer;

impl PageRenderer for TextLayerRenderer {
    fn render(&self, document: &Document, page: usize) -> Result<RenderedPage, ChatError> {
        let text = document.page(page).ok_or_else(|| ChatError::PageOutOfRange {
            filename: document.filename.clone(),
            page,
        })?;
        let (width, height) = DEFAULT_PAGE_SIZE;
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let line_height = height / lines.len().max(1) as f32;
        let text_layer = lines
            .iter()
            .enumerate()
            .map(|(i, line)| TextFragment {
                text: line.trim().to_string(),
                y: i as f32 * line_height,
            })
            .collect();

        Ok(RenderedPage {
            filename: document.filename.clone(),
            page,
            page_count: document.page_count(),
            width,
            height,
            text_layer,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PreviewPanel {
    viewport_width: f32,
    scale: f32,
    page: Option<RenderedPage>,
    highlighted: Option<usize>,
}

impl PreviewPanel {
    pub fn new(viewport_width: f32) -> Self {
        Self {
            viewport_width,
            scale: 1.0,
            page: None,
            highlighted: None,
        }
    }

    /// Show `page`, fitted to the viewport width, and mark the first fragment
    /// matching `passage`. Returns whether anything was marked.
    pub fn open(&mut self, page: RenderedPage, passage: Option<&str>) -> bool {
        self.highlighted = passage.and_then(|p| locate_passage(&page.text_layer, p));
        self.page = Some(page);
        self.fit_to_width();
        self.highlighted.is_some()
    }

    pub fn close(&mut self) {
        self.page = None;
        self.highlighted = None;
    }

    pub fn zoom_in(&mut self) {
        self.scale = (self.scale * ZOOM_STEP).min(MAX_SCALE);
    }

    pub fn zoom_out(&mut self) {
        self.scale = (self.scale / ZOOM_STEP).max(MIN_SCALE);
    }

    pub fn fit_to_width(&mut self) {
        if let Some(page) = &self.page {
            if page.width > 0.0 {
                self.scale = (self.viewport_width / page.width).clamp(MIN_SCALE, MAX_SCALE);
            }
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn page(&self) -> Option<&RenderedPage> {
        self.page.as_ref()
    }

    pub fn highlighted(&self) -> Option<&TextFragment> {
        let page = self.page.as_ref()?;
        page.text_layer.get(self.highlighted?)
    }

    pub fn highlighted_index(&self) -> Option<usize> {
        self.highlighted
    }

    /// Rendered size in viewport units at the current scale.
    pub fn display_size(&self) -> Option<(f32, f32)> {
        self.page
            .as_ref()
            .map(|p| (p.width * self.scale, p.height * self.scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> Document {
        Document::new(
            "report.pdf",
            Vec::new(),
            vec![
                "Cover".into(),
                "Summary\n\nRevenue growth 2023 was 12%\nCosts were flat".into(),
            ],
        )
    }

    #[test]
    fn test_render_out_of_range_page() {
        let err = TextLayerRenderer.render(&document(), 5).unwrap_err();
        assert!(matches!(err, ChatError::PageOutOfRange { page: 5, .. }));
        assert!(TextLayerRenderer.render(&document(), 0).is_err());
    }

    #[test]
    fn test_open_fits_and_highlights() {
        let page = TextLayerRenderer.render(&document(), 2).unwrap();
        assert_eq!(page.text_layer.len(), 3);
        assert_eq!(page.page_count, 2);

        let mut panel = PreviewPanel::new(306.0);
        assert!(panel.open(page, Some("revenue growth 2023")));
        assert!((panel.scale() - 0.5).abs() < 1e-6);
        assert_eq!(panel.highlighted_index(), Some(1));
        assert_eq!(panel.highlighted().unwrap().text, "Revenue growth 2023 was 12%");
        assert_eq!(panel.display_size(), Some((306.0, 396.0)));
    }

    #[test]
    fn test_open_without_match_still_shows_page() {
        let page = TextLayerRenderer.render(&document(), 2).unwrap();
        let mut panel = PreviewPanel::new(612.0);
        assert!(!panel.open(page, Some("dividends")));
        assert!(panel.page().is_some());
        assert!(panel.highlighted().is_none());
    }

    #[test]
    fn test_zoom_is_clamped() {
        let mut panel = PreviewPanel::new(612.0);
        panel.open(TextLayerRenderer.render(&document(), 1).unwrap(), None);
        assert!((panel.scale() - 1.0).abs() < 1e-6);
        panel.zoom_in();
        assert!((panel.scale() - 1.25).abs() < 1e-6);
        for _ in 0..20 {
            panel.zoom_in();
        }
        assert_eq!(panel.scale(), MAX_SCALE);
        for _ in 0..40 {
            panel.zoom_out();
        }
        assert_eq!(panel.scale(), MIN_SCALE);
        panel.fit_to_width();
        assert!((panel.scale() - 1.0).abs() < 1e-6);
        assert_eq!(panel.display_size(), Some((612.0, 792.0)));
    }
}
