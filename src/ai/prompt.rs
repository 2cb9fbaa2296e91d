use std::sync::OnceLock;

use regex::Regex;

use crate::models::Article;

const MISSING: &str = "N/A";
const ARTICLE_SEPARATOR: &str = "\n\n";

fn truncation_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*…?\s*\[\+\d+ chars\]\s*$").expect("valid regex"))
}

fn html_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("valid regex"))
}

/// Normalises article text for a prompt: line endings, stray HTML, the `[+N chars]`
/// marker news APIs append, and a hard cap of `max_chars` characters.
pub fn clean_text(raw: &str, max_chars: usize) -> String {
    let mut text = raw.trim().replace("\r\n", "\n");

    if html_tag().is_match(&text) {
        match html2text::from_read(text.as_bytes(), 10_000) {
            Ok(plain) => text = plain.trim().to_string(),
            Err(e) => tracing::debug!("Failed to convert HTML to text: {}", e),
        }
    }

    let text = truncation_marker().replace(&text, "");

    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect()
    } else {
        text.into_owned()
    }
}

/// Builds the prompts sent for a batch of articles.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    /// Leading articles included in summarization prompts.
    pub article_limit: usize,
    pub max_article_chars: usize,
}

impl PromptBuilder {
    pub fn new(article_limit: usize, max_article_chars: usize) -> Self {
        Self {
            article_limit,
            max_article_chars,
        }
    }

    pub fn article_block(&self, article: &Article) -> String {
        let author = article
            .author
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(MISSING);
        let content = article
            .body()
            .map(|b| clean_text(b, self.max_article_chars))
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| MISSING.to_string());

        format!(
            "Title: {}\nSource: {}\nAuthor: {}\nContent: {}",
            article.title.trim(),
            article.source.name,
            author,
            content
        )
    }

    pub fn articles_context(&self, articles: &[Article]) -> String {
        articles
            .iter()
            .map(|a| self.article_block(a))
            .collect::<Vec<_>>()
            .join(ARTICLE_SEPARATOR)
    }

    fn bounded<'a>(&self, articles: &'a [Article]) -> &'a [Article] {
        &articles[..articles.len().min(self.article_limit)]
    }

    pub fn text_summary(&self, articles: &[Article]) -> String {
        format!(
            "Summarize the following news articles into key points:\n\n{}",
            self.articles_context(self.bounded(articles))
        )
    }

    pub fn structured_summary(&self, articles: &[Article]) -> String {
        format!(
            "Create a summary card for the following news articles. Give a short headline, \
             a concise summary, and between 2 and 4 highlights.\n\n{}",
            self.articles_context(self.bounded(articles))
        )
    }

    /// Opening chat prompt: every article, the summary already shown, then the question.
    pub fn chat_opening(&self, articles: &[Article], summary: &str, question: &str) -> String {
        format!(
            "Here are the full news articles for context:\n\n{}\n\n\
             Here is the summary you provided:\n{}\n\n\
             User Question: {}",
            self.articles_context(articles),
            summary,
            question
        )
    }
}
