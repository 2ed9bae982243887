use paperclip::actix::Apiv2Schema;
use serde::{Deserialize, Serialize};

pub type BookId = i32;
pub type ImageId = i32;
/// Subject identifier issued by the OAuth provider
pub type UserId = String;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Editable part of a book record
pub struct BookDetails {
    pub title: String,
    pub author: String,
    pub description: String,
    pub has_been_read: bool,
    pub goodreads_link: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Struct representing a patch to book details. Allows to specify only a few fields and patch the current details
pub struct BookDetailsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_been_read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goodreads_link: Option<String>,
}

impl From<BookDetails> for BookDetailsPatch {
    fn from(details: BookDetails) -> Self {
        Self {
            title: Some(details.title),
            author: Some(details.author),
            description: Some(details.description),
            has_been_read: Some(details.has_been_read),
            goodreads_link: Some(details.goodreads_link),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Image attached to a book, `image` holds the base64 encoded bytes
pub struct BookImage {
    pub image_id: ImageId,
    pub book_id: BookId,
    pub image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Full book record as stored in the repository
pub struct Book {
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    pub description: String,
    pub has_been_read: bool,
    pub goodreads_link: String,
    /// Date the book was catalogued, formatted as YYYY-MM-DD
    pub added_on: String,
    pub images: Vec<BookImage>,
}

impl Book {
    pub fn new(book_id: BookId, details: BookDetails, added_on: String) -> Self {
        Self {
            book_id,
            title: details.title,
            author: details.author,
            description: details.description,
            has_been_read: details.has_been_read,
            goodreads_link: details.goodreads_link,
            added_on,
            images: vec![],
        }
    }

    pub fn details(&self) -> BookDetails {
        BookDetails {
            title: self.title.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
            has_been_read: self.has_been_read,
            goodreads_link: self.goodreads_link.clone(),
        }
    }
}

impl std::fmt::Display for Book {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}) \"{}\" by \"{}\"", self.book_id, self.title, self.author)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum BookSearchType {
    ByTitle,
    ByAuthor,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Unknown search type {0:?}")]
pub struct UnknownSearchType(pub String);

impl std::str::FromStr for BookSearchType {
    type Err = UnknownSearchType;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "bytitle" => Ok(BookSearchType::ByTitle),
            "byauthor" => Ok(BookSearchType::ByAuthor),
            _ => Err(UnknownSearchType(input.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct UserDetails {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub oauth_identifier: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "kebab-case")]
pub enum LikeStatus {
    Liked,
    NotLiked,
    Unauthenticated,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct LikeStatusResponse {
    pub status: LikeStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct LikeRequest {
    pub book_id: BookId,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
#[serde(rename_all = "camelCase")]
pub struct BooksCountResponse {
    pub books_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
pub struct LikesCountResponse {
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Apiv2Schema)]
/// Element of the book listing returned by /api/books
pub struct BookSummary {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub description: String,
    pub images: Vec<BookImage>,
}

impl From<Book> for BookSummary {
    fn from(book: Book) -> Self {
        Self {
            id: book.book_id,
            title: book.title,
            author: book.author,
            description: book.description,
            images: book.images,
        }
    }
}

/// Current local date in the format stored in `added_on`
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod api_tests {
    use super::*;

    #[test]
    fn search_type_is_parsed_case_insensitively() {
        assert_eq!("byTitle".parse(), Ok(BookSearchType::ByTitle));
        assert_eq!(" BYAUTHOR ".parse(), Ok(BookSearchType::ByAuthor));
        assert_eq!(
            "byPublisher".parse::<BookSearchType>(),
            Err(UnknownSearchType("byPublisher".to_string()))
        );
    }

    #[test]
    fn like_status_uses_kebab_case() {
        let json = serde_json::to_string(&LikeStatusResponse {
            status: LikeStatus::NotLiked,
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"not-liked"}"#);
    }

    #[test]
    fn books_count_uses_camel_case() {
        let json = serde_json::to_string(&BooksCountResponse { books_count: 3 }).unwrap();
        assert_eq!(json, r#"{"booksCount":3}"#);
    }

    #[test]
    fn today_is_iso_date() {
        let date = today();
        assert_eq!(date.len(), 10);
        assert!(chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_ok());
    }
}
