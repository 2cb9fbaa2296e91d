mod article;
mod chat;
mod summary;

pub use article::{Article, Source};
pub use chat::{ChatMessage, Role};
pub use summary::{PartialSummary, Summary, HIGHLIGHTS_MAX, HIGHLIGHTS_MIN};
