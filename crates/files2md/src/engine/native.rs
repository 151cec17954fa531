//! In-process conversion without layout analysis or OCR.

use std::path::Path;

use tracing::{info_span, warn};

use crate::error::RenderError;

use super::{ConversionEngine, EngineFactory, RenderOptions};

pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputFormat {
    Pdf,
    Text,
}

impl InputFormat {
    fn from_path(path: &Path) -> Result<Self, RenderError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "txt" | "text" | "md" | "markdown" => Ok(Self::Text),
            _ => Err(RenderError::UnsupportedFormat(extension)),
        }
    }
}

/// Renders text files verbatim and PDFs through embedded-text extraction.
/// Always runs on the CPU regardless of the requested device.
#[derive(Debug, Default)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ConversionEngine for NativeEngine {
    fn render(&mut self, input: &Path, _options: &RenderOptions) -> Result<String, RenderError> {
        match InputFormat::from_path(input)? {
            InputFormat::Text => {
                std::fs::read_to_string(input).map_err(|e| RenderError::ReadInput {
                    path: input.to_path_buf(),
                    source: e,
                })
            }
            InputFormat::Pdf => render_pdf(input),
        }
    }
}

fn render_pdf(path: &Path) -> Result<String, RenderError> {
    let _span = info_span!("engine.native_pdf").entered();

    let bytes = std::fs::read(path).map_err(|e| RenderError::ReadInput {
        path: path.to_path_buf(),
        source: e,
    })?;
    let doc = lopdf::Document::load_mem(&bytes).map_err(|e| RenderError::Pdf(e.to_string()))?;

    let pages: Vec<String> = doc
        .get_pages()
        .into_keys()
        .map(|page_num| match doc.extract_text(&[page_num]) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("No text extracted from page {} of {}: {}", page_num, path.display(), e);
                String::new()
            }
        })
        .collect();

    Ok(pages.join(PAGE_BREAK))
}

#[derive(Debug, Default)]
pub struct NativeEngineFactory;

impl NativeEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl EngineFactory for NativeEngineFactory {
    fn build(&self, _options: &RenderOptions) -> Result<Box<dyn ConversionEngine>, RenderError> {
        Ok(Box::new(NativeEngine::new()))
    }
}
