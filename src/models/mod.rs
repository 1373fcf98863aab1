//! Core data model shared by every pipeline stage.
//!
//! Sources and collections are owned by the source store; transcript rows are
//! owned by the orchestrator for the lifetime of a generation. Quality checks
//! only live in memory during a repair loop.

mod collection;
mod panel;
mod quality;
mod source;
mod summary;

pub use collection::WebSourceCollection;
pub use panel::{
    PanelAudio, PanelDiscussion, PanelTranscript, ProcessState, TranscriptMetadata,
};
pub use quality::{QualityIssue, TranscriptQualityCheck};
pub use source::{md5_hex, NewsArticle, ResolveState, WebSource};
pub use summary::{RawReference, SummaryReference, SummarySubject, TranscriptSummary};
