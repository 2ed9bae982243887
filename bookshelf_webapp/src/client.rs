use anyhow::{bail, Context};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::policies::ExponentialBackoff;
use reqwest_retry::RetryTransientMiddleware;
use reqwest_tracing::TracingMiddleware;

use bookshelf_repository::api::{
    BookId, BookSummary, BooksCountResponse, LikesCountResponse,
};

/// Client of the bookshelf JSON API
pub struct BookshelfClient {
    url: String,
    client: ClientWithMiddleware,
}

impl BookshelfClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn health(&self) -> anyhow::Result<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.url))
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    pub async fn books_count(&self) -> anyhow::Result<i64> {
        let response = self
            .client
            .get(format!("{}/api/booksCount", self.url))
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Failed to count books {}", response.status())
        }
        let count: BooksCountResponse = response.json().await?;
        Ok(count.books_count)
    }

    /// Books whose author contains `author`, ignoring case
    pub async fn list_books_by_author(&self, author: &str) -> anyhow::Result<Vec<BookSummary>> {
        let response = self
            .client
            .get(format!("{}/api/books", self.url))
            .query(&[("start_with", author)])
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Failed to list books {}", response.status())
        }
        Ok(response.json().await?)
    }

    pub async fn list_books_page(&self, offset: i64, limit: i64) -> anyhow::Result<Vec<BookSummary>> {
        let response = self
            .client
            .get(format!("{}/api/books", self.url))
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Failed to list books {}", response.status())
        }
        Ok(response.json().await?)
    }

    pub async fn likes_count(&self, book_id: BookId) -> anyhow::Result<i64> {
        let response = self
            .client
            .get(format!("{}/api/likes_count", self.url))
            .query(&[("book_id", book_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            bail!("Failed to count likes of book {} {}", book_id, error)
        }
        let count: LikesCountResponse = response.json().await?;
        Ok(count.count)
    }
}
