use std::sync::Arc;

/// Lifecycle points the fixup engine reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupEventKind {
    /// Emitted before an image copy begins
    CopyImageStart,
    /// Emitted after an image copy finished, successfully or not
    CopyImageEnd,
}

/// An immutable progress record delivered to the observer.
///
/// Events are consumed synchronously in emission order and never persisted.
#[derive(Debug, Clone)]
pub struct FixupEvent {
    pub kind: FixupEventKind,
    /// The source reference of the image being copied
    pub source_image: String,
    /// Present on a failed `CopyImageEnd`
    pub error: Option<String>,
}

impl FixupEvent {
    pub fn start(source_image: impl Into<String>) -> Self {
        Self {
            kind: FixupEventKind::CopyImageStart,
            source_image: source_image.into(),
            error: None,
        }
    }

    pub fn end(source_image: impl Into<String>, error: Option<String>) -> Self {
        Self {
            kind: FixupEventKind::CopyImageEnd,
            source_image: source_image.into(),
            error,
        }
    }
}

/// Synchronous observer for fixup progress.
///
/// The handler returns `()` so a misbehaving observer has no way to inject a
/// failure into the engine's control flow; whatever fallible work it does is
/// its own to log.
pub type EventHandler = Arc<dyn Fn(&FixupEvent) + Send + Sync>;
