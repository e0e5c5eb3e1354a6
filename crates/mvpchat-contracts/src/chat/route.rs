use std::path::{Path, PathBuf};

use crate::models::Capability;

/// Lower-cased substring that sends a text turn to the image model.
pub const IMAGE_GENERATION_TRIGGER: &str = "generate image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub mime: String,
}

impl Attachment {
    pub fn new(path: impl Into<PathBuf>, mime: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mime: mime.into(),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mime = mime_for_path(&path).to_string();
        Self { path, mime }
    }

    pub fn is_image(&self) -> bool {
        self.mime
            .trim()
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Turn {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl Turn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Attachments the vision route can use, in the order they were attached.
    pub fn images(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|item| item.is_image())
    }

    pub fn first_image(&self) -> Option<&Attachment> {
        self.images().next()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Vision,
    ImageGeneration,
    Text,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vision => "vision",
            Self::ImageGeneration => "image_generation",
            Self::Text => "text",
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Vision => Capability::Vision,
            Self::ImageGeneration => Capability::Image,
            Self::Text => Capability::Text,
        }
    }
}

/// Attachment check first, then the generation trigger, then plain text.
pub fn classify_route(turn: &Turn) -> Route {
    if turn.first_image().is_some() {
        return Route::Vision;
    }
    if turn.text.to_lowercase().contains(IMAGE_GENERATION_TRIGGER) {
        return Route::ImageGeneration;
    }
    Route::Text
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_route, Attachment, Route, Turn};

    #[test]
    fn plain_text_routes_to_text() {
        assert_eq!(classify_route(&Turn::text("Tell me a joke")), Route::Text);
    }

    #[test]
    fn generation_trigger_is_case_insensitive() {
        assert_eq!(
            classify_route(&Turn::text("Please GENERATE Image of a lighthouse")),
            Route::ImageGeneration
        );
        assert_eq!(
            classify_route(&Turn::text("generate an image")),
            Route::Text
        );
    }

    #[test]
    fn attachment_takes_precedence_over_generation_trigger() {
        let turn = Turn::text("generate image like this one")
            .with_attachment(Attachment::from_path("cat.png"));
        assert_eq!(classify_route(&turn), Route::Vision);
    }

    #[test]
    fn non_image_attachments_are_ignored() {
        let turn = Turn::text("summarize").with_attachment(Attachment::from_path("notes.txt"));
        assert_eq!(turn.images().count(), 0);
        assert_eq!(classify_route(&turn), Route::Text);
    }

    #[test]
    fn only_image_top_level_types_count_as_images() {
        assert!(Attachment::new("a.png", "image/png").is_image());
        assert!(Attachment::new("a.svg", "Image/SVG+xml").is_image());
        assert!(!Attachment::new("a.bin", "application/x-image-bundle").is_image());
        assert!(!Attachment::new("a.bin", "application/octet-stream").is_image());
        assert!(!Attachment::new("a", "image").is_image());
    }

    #[test]
    fn first_image_skips_non_image_attachments() {
        let turn = Turn::text("what is this")
            .with_attachment(Attachment::from_path("notes.txt"))
            .with_attachment(Attachment::from_path("a.JPG"))
            .with_attachment(Attachment::from_path("b.png"));
        let first = turn.first_image().unwrap();
        assert_eq!(first.path.to_string_lossy(), "a.JPG");
        assert_eq!(first.mime, "image/jpeg");
    }
}
