use std::sync::Arc;

use futures::future::{AbortHandle, AbortRegistration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use news_digest::activity::{Activity, ActivityKind, ActivitySink, TracingActivitySink};
use news_digest::ai::{ClaudeBackend, LanguageModel, PromptBuilder, Snapshot, SummarizationService};
use news_digest::chat::{ChatHandle, ChatOrchestrator, Submission};
use news_digest::config::Config;
use news_digest::error::{AppError, Result};
use news_digest::models::{Article, PartialSummary, Role, Summary};
use news_digest::news::{ArticleSource, NewsApiClient};

const WRAP_WIDTH: usize = 80;

fn print_wrapped(text: &str) {
    for paragraph in text.split('\n') {
        println!("{}", textwrap::fill(paragraph, WRAP_WIDTH));
    }
}

/// Aborts the paired registration when Ctrl-C arrives. Abort the returned task once the
/// guarded work is done.
fn abort_on_ctrl_c() -> (AbortRegistration, JoinHandle<()>) {
    let (handle, registration) = AbortHandle::new_pair();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.abort();
        }
    });
    (registration, watcher)
}

pub struct App {
    config: Config,
    model_version: String,
    model: Arc<dyn LanguageModel>,
    summarizer: SummarizationService,
    prompts: PromptBuilder,
    source: Option<Box<dyn ArticleSource>>,
    activity: Box<dyn ActivitySink>,
}

impl App {
    pub fn new(config: &Config) -> Self {
        let backend = ClaudeBackend::new(config);
        let model_version = backend.model_version().to_string();
        let model: Arc<dyn LanguageModel> = Arc::new(backend);
        let prompts = PromptBuilder::new(config.summary_article_limit, config.max_article_chars);
        let summarizer = SummarizationService::new(Arc::clone(&model), prompts);

        let source = config
            .news_api_key
            .as_ref()
            .filter(|key| !key.trim().is_empty())
            .map(|key| Box::new(NewsApiClient::new(key.clone())) as Box<dyn ArticleSource>);

        Self {
            config: config.clone(),
            model_version,
            model,
            summarizer,
            prompts,
            source,
            activity: Box::new(TracingActivitySink),
        }
    }

    async fn articles(&self, query: Option<&str>) -> Result<Vec<Article>> {
        let Some(source) = &self.source else {
            return Err(AppError::Config(format!(
                "news_api_key is not set in {}",
                Config::config_path().display()
            )));
        };

        match query {
            Some(query) => source.search(query, self.config.page_size).await,
            None => {
                source
                    .top_headlines(&self.config.country, None, self.config.page_size)
                    .await
            }
        }
    }

    pub async fn check(&self) -> Result<()> {
        match self.summarizer.gate().check_availability().await {
            Ok(()) => println!("AI available ({})", self.model_version),
            Err(reason) => println!("AI unavailable: {}", reason),
        }
        Ok(())
    }

    pub async fn list(&self, query: Option<&str>) -> Result<()> {
        let articles = self.articles(query).await?;
        if articles.is_empty() {
            println!("No articles found");
        }
        for (n, article) in articles.iter().enumerate() {
            let when = article
                .published_at()
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("{:>3}. {} ({}, {})", n + 1, article.title, article.source.name, when);
        }
        Ok(())
    }

    pub async fn read(&self, number: usize, query: Option<&str>) -> Result<()> {
        let articles = self.articles(query).await?;
        let article = number
            .checked_sub(1)
            .and_then(|i| articles.get(i))
            .ok_or_else(|| AppError::Config(format!("No article number {}", number)))?;

        println!("{}", article.title);
        println!(
            "{} | {}",
            article.source.name,
            article.author.as_deref().unwrap_or("Unknown")
        );
        println!("{}\n", article.url);
        if let Some(body) = article.body() {
            print_wrapped(body);
        }

        self.activity.record(Activity::new(
            ActivityKind::ArticleViewed,
            Some(article.title.clone()),
        ));
        Ok(())
    }

    pub async fn summarize(&self, query: Option<&str>, structured: bool) -> Result<()> {
        let articles = self.articles(query).await?;
        let (registration, watcher) = abort_on_ctrl_c();

        let result = if structured {
            let mut fields = 0;
            let mut progress = |partial: &PartialSummary| {
                let now = partial.populated().len();
                if now != fields {
                    fields = now;
                    eprint!(".");
                }
            };
            self.summarizer
                .summarize_structured_streaming(&articles, registration, &mut progress)
                .await
                .map(|summary| {
                    eprintln!();
                    print_summary_card(&summary);
                })
        } else {
            self.summarizer
                .summarize_text_abortable(&articles, registration)
                .await
                .map(|text| print_wrapped(&text))
        };
        watcher.abort();

        result?;
        self.activity
            .record(Activity::new(ActivityKind::SummaryGenerated, None));
        Ok(())
    }

    pub async fn chat(&self, query: Option<&str>) -> Result<()> {
        let articles = self.articles(query).await?;

        let (registration, watcher) = abort_on_ctrl_c();
        let summary = self
            .summarizer
            .summarize_text_abortable(&articles, registration)
            .await;
        watcher.abort();
        let summary = summary?;

        self.activity
            .record(Activity::new(ActivityKind::SummaryGenerated, None));
        print_wrapped(&summary);
        println!("\nAsk about the news (/quit to exit).");

        let orchestrator =
            ChatOrchestrator::new(Arc::clone(&self.model), self.prompts, articles, summary);
        let (handle, task) = ChatHandle::spawn(orchestrator);
        let mut state = handle.subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim() == "/quit" {
                break;
            }

            let before = handle.snapshot().messages.len();
            let abort = match handle.send(&line) {
                Submission::Accepted(abort) => abort,
                Submission::Ignored => continue,
                Submission::Busy => {
                    println!("Still working on the last question...");
                    continue;
                }
                Submission::Closed => break,
            };

            let watcher = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    abort.abort();
                }
            });
            let snapshot = state
                .wait_for(|s| !s.busy && s.messages.len() > before)
                .await
                .map_err(|e| anyhow::anyhow!("Chat task stopped: {}", e))?
                .clone();
            watcher.abort();

            match (snapshot.messages.last(), snapshot.last_error) {
                (_, Some(error)) => eprintln!("Error: {}", error),
                (Some(message), None) if message.role() == Role::Assistant => {
                    println!();
                    print_wrapped(message.content());
                    println!();
                }
                _ => eprintln!("(cancelled)"),
            }
        }

        drop(handle);
        join_chat_task(task).await;
        Ok(())
    }
}

/// Waits for the chat task to wind down. A panicked task is logged, not propagated.
async fn join_chat_task(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Chat task ended abnormally: {}", e);
            false
        }
    }
}

fn print_summary_card(summary: &Summary) {
    match &summary.icon {
        Some(icon) => println!("{} {}\n", icon, summary.headline),
        None => println!("{}\n", summary.headline),
    }
    print_wrapped(&summary.summary_text);
    println!();
    for highlight in &summary.highlights {
        let options = textwrap::Options::new(WRAP_WIDTH)
            .initial_indent("  • ")
            .subsequent_indent("    ");
        println!("{}", textwrap::fill(highlight, options));
    }
    if let Some(cta) = &summary.call_to_action {
        println!("\n{}", cta);
    }
}
