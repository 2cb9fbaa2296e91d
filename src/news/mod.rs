mod client;

pub use client::{ArticleSource, NewsApiClient};
