use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::storage::{Draft, DraftRepository, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftSummary {
    pub id: i64,
    pub date: String,
    pub title: String,
    pub preview: String,
}

impl DraftSummary {
    pub fn from_draft(draft: &Draft, preview_chars: usize) -> Self {
        Self {
            id: draft.id,
            date: draft.date.clone(),
            title: draft.title.clone(),
            preview: truncate_preview(&draft.content.preview(), preview_chars),
        }
    }
}

/// What a list view shows. A read failure yields no rows plus the error,
/// so the caller can render an empty list and a notice.
#[derive(Debug, Default)]
pub struct Listing {
    pub drafts: Vec<DraftSummary>,
    pub error: Option<StorageError>,
}

pub async fn load_listing<R: DraftRepository>(repo: &R, preview_chars: usize) -> Listing {
    match repo.list().await {
        Ok(drafts) => Listing {
            drafts: drafts
                .iter()
                .map(|draft| DraftSummary::from_draft(draft, preview_chars))
                .collect(),
            error: None,
        },
        Err(err) => {
            tracing::warn!(error = %err, "listing drafts failed");
            Listing {
                drafts: Vec::new(),
                error: Some(err),
            }
        }
    }
}

// Single line, cut on a grapheme boundary; 0 disables the cut.
fn truncate_preview(text: &str, max: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if max == 0 || flattened.graphemes(true).count() <= max {
        return flattened;
    }
    let mut cut: String = flattened.graphemes(true).take(max).collect();
    cut.push('\u{2026}');
    cut
}
