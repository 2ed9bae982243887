//! Loading of the library seed file.
//!
//! The file is TOML with one `[[book]]` table per record:
//!
//! ```toml
//! [[book]]
//! id = 1
//! title = "El Principito"
//! author = "Antoine de Saint-Exupéry"
//! description = ""
//! has_been_read = true
//! added_on = "2023-11-02"
//! goodreads_link = ""
//! image_names = ["principito.jpg"]
//! ```
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::api::{Book, BookDetails, BookId};

#[derive(thiserror::Error, Debug)]
pub enum LibraryError {
    #[error("Failed to read library file {path}: {source}")]
    ReadFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse library file {path}: {source}")]
    ParseFailure {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to read image {path} of book {book_id}: {source}")]
    ImageFailure {
        book_id: BookId,
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct LibraryBook {
    pub id: BookId,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub has_been_read: bool,
    #[serde(default)]
    pub added_on: Option<String>,
    #[serde(default)]
    pub goodreads_link: String,
    #[serde(default)]
    pub image_names: Vec<String>,
}

impl LibraryBook {
    pub fn details(&self) -> BookDetails {
        BookDetails {
            title: self.title.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
            has_been_read: self.has_been_read,
            goodreads_link: self.goodreads_link.clone(),
        }
    }

    /// Book record without images, used by the search tool
    pub fn to_book(&self) -> Book {
        Book::new(
            self.id,
            self.details(),
            self.added_on.clone().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize, Eq, PartialEq)]
pub struct Library {
    #[serde(default)]
    pub book: Vec<LibraryBook>,
}

/// Library record with its image files already read, ready to be inserted into a repository
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SeedBook {
    pub book_id: BookId,
    pub details: BookDetails,
    pub added_on: String,
    pub images: Vec<Vec<u8>>,
}

impl Library {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LibraryError::ReadFailure {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| LibraryError::ParseFailure {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn books(&self) -> Vec<Book> {
        self.book.iter().map(LibraryBook::to_book).collect()
    }

    /// Reads the images of every book from `images_dir`.
    /// Books without `added_on` get today's date.
    pub fn into_seed_books(self, images_dir: impl AsRef<Path>) -> Result<Vec<SeedBook>, LibraryError> {
        let images_dir = images_dir.as_ref();
        self.book
            .into_iter()
            .map(|book| {
                let images = book
                    .image_names
                    .iter()
                    .map(|image_name| {
                        let path = images_dir.join(image_name);
                        tracing::debug!("Reading image {} for book {}", path.display(), book.id);
                        std::fs::read(&path).map_err(|source| LibraryError::ImageFailure {
                            book_id: book.id,
                            path,
                            source,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(SeedBook {
                    book_id: book.id,
                    details: book.details(),
                    added_on: book.added_on.clone().unwrap_or_else(crate::api::today),
                    images,
                })
            })
            .collect()
    }
}
