use base64::Engine;

pub use in_memory_books_repository::InMemoryBookRepository;
pub use postgres_books_repository::{PostgresBooksRepository, PostgresBooksRepositoryConfig};
pub use sqlite_books_repository::SqliteBooksRepository;

use crate::api::{
    Book, BookDetails, BookDetailsPatch, BookId, BookImage, BookSearchType, ImageId, UserDetails,
};
use crate::library::SeedBook;

mod in_memory_books_repository;
mod postgres_books_repository;
mod sqlite_books_repository;

#[derive(thiserror::Error, Debug)]
pub enum BookRepositoryError {
    #[error("Book {0} not found")]
    NotFound(BookId),

    #[error("Image {0} not found")]
    ImageNotFound(ImageId),

    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Email {0} already belongs to another user")]
    EmailInUse(String),

    #[error("Failed to deserialize book: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Sqlite failure {0}")]
    SqliteFailure(#[from] rusqlite::Error),

    #[error("Other error {0}")]
    Other(String),
}

#[async_trait::async_trait]
pub trait BookRepository: Send + Sync {
    /// Checks that the storage is reachable
    async fn ping(&self) -> Result<(), BookRepositoryError>;
    /// Inserts library records keeping their ids, records with an already existing id are skipped.
    /// Returns the number of inserted books
    async fn seed_books(&self, books: Vec<SeedBook>) -> Result<usize, BookRepositoryError>;
    /// Adds book to repository, returns an id assigned to the book
    async fn create_book(
        &self,
        details: BookDetails,
        image: Option<Vec<u8>>,
    ) -> Result<BookId, BookRepositoryError>;
    /// Updates book in the repository, returns true if book was updated and false if it was not found
    async fn update_book(
        &self,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> Result<bool, BookRepositoryError>;
    /// Retrieves the book together with its images
    async fn get_book(&self, book_id: BookId) -> Result<Book, BookRepositoryError>;
    async fn get_book_count(&self) -> Result<i64, BookRepositoryError>;
    /// Lists all books with their images ordered by author
    async fn list_books(&self) -> Result<Vec<Book>, BookRepositoryError>;
    /// Page of books ordered by title, images are not loaded
    async fn get_books_with_pagination(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Book>, BookRepositoryError>;
    /// Case-insensitive substring search ordered by title, images are loaded
    async fn search_books(
        &self,
        text: &str,
        search_type: BookSearchType,
    ) -> Result<Vec<Book>, BookRepositoryError>;
    /// Distinct authors in ascending order
    async fn get_all_authors(&self) -> Result<Vec<String>, BookRepositoryError>;
    /// Attaches an image to the book, empty data is ignored and returns None
    async fn add_image_to_book(
        &self,
        book_id: BookId,
        image: Vec<u8>,
    ) -> Result<Option<ImageId>, BookRepositoryError>;
    async fn get_images_by_book_id(
        &self,
        book_id: BookId,
    ) -> Result<Vec<BookImage>, BookRepositoryError>;
    /// Returns false if there was no such image
    async fn remove_image(&self, image_id: ImageId) -> Result<bool, BookRepositoryError>;
    /// Inserts the user or refreshes email and name of an existing one
    async fn add_user(&self, user: UserDetails) -> Result<(), BookRepositoryError>;
    async fn get_user(&self, user_id: &str) -> Result<Option<UserDetails>, BookRepositoryError>;
    async fn like_book(&self, book_id: BookId, user_id: &str) -> Result<(), BookRepositoryError>;
    /// Returns false if the book was not liked by the user
    async fn unlike_book(&self, book_id: BookId, user_id: &str)
        -> Result<bool, BookRepositoryError>;
    async fn liked_by(&self, book_id: BookId, user_id: &str) -> Result<bool, BookRepositoryError>;
    async fn likes_count(&self, book_id: BookId) -> Result<i64, BookRepositoryError>;
}

/// Converts a stored blob into the form served to clients, empty blobs are dropped
pub(crate) fn encode_image(image_id: ImageId, book_id: BookId, data: &[u8]) -> Option<BookImage> {
    if data.is_empty() {
        return None;
    }
    Some(BookImage {
        image_id,
        book_id,
        image: base64::engine::general_purpose::STANDARD.encode(data),
    })
}

pub(crate) const SQL_SCHEMA_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_books_title ON books (title);
    CREATE INDEX IF NOT EXISTS idx_books_author ON books (author);
    CREATE INDEX IF NOT EXISTS idx_books_added_on ON books (added_on);
    CREATE INDEX IF NOT EXISTS idx_book_images_book_id ON book_images (book_id);
";

#[cfg(test)]
pub(crate) mod repository_test_cases {
    //! Behaviour shared by every backend, each backend test module runs these against its own repository

    use super::*;

    pub fn details(title: &str, author: &str) -> BookDetails {
        BookDetails {
            title: title.to_string(),
            author: author.to_string(),
            description: format!("{} description", title),
            has_been_read: false,
            goodreads_link: "".to_string(),
        }
    }

    pub fn user(user_id: &str) -> UserDetails {
        UserDetails {
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
            name: user_id.to_uppercase(),
            oauth_identifier: "Auth0".to_string(),
        }
    }

    pub async fn add_book_and_get_it(repo: &dyn BookRepository) {
        let not_existing_book_id = 20000;
        let book_not_found = repo.get_book(not_existing_book_id).await;
        assert!(matches!(
            book_not_found,
            Err(BookRepositoryError::NotFound(20000))
        ));

        let book_details = details("Rayuela", "Julio Cortázar");
        let id = repo
            .create_book(book_details.clone(), Some(vec![1, 2, 3]))
            .await
            .expect("Failed to add book");

        let book = repo.get_book(id).await.expect("Failed to get book");
        assert_eq!(book.details(), book_details);
        assert_eq!(book.added_on, crate::api::today());
        assert_eq!(book.images.len(), 1);
        assert_eq!(book.images[0].image, "AQID");
        assert_eq!(book.images[0].book_id, id);

        let second_id = repo
            .create_book(details("Ficciones", "Borges"), None)
            .await
            .expect("Failed to add book");
        assert_ne!(id, second_id);
        assert!(repo.get_book(second_id).await.unwrap().images.is_empty());
        assert_eq!(repo.get_book_count().await.unwrap(), 2);
    }

    pub async fn add_book_patch_and_get_it(repo: &dyn BookRepository) {
        let result = repo
            .update_book(2000, BookDetailsPatch::default())
            .await
            .expect("Failed to update");
        // false means nothing to update
        assert!(!result);

        let book_details = details("xx", "sss");
        let id = repo
            .create_book(book_details.clone(), None)
            .await
            .expect("Failed to add book");

        let patch_title_only = BookDetailsPatch {
            title: Some("patchedTitle".to_string()),
            ..BookDetailsPatch::default()
        };
        assert!(repo
            .update_book(id, patch_title_only)
            .await
            .expect("Failed to patch"));

        let expected_with_patch_title = BookDetails {
            title: "patchedTitle".to_string(),
            ..book_details.clone()
        };
        assert_eq!(
            repo.get_book(id).await.unwrap().details(),
            expected_with_patch_title
        );

        let all_fields = BookDetails {
            title: "a".to_string(),
            author: "b".to_string(),
            description: "c".to_string(),
            has_been_read: true,
            goodreads_link: "https://www.goodreads.com/book/show/1".to_string(),
        };
        assert!(repo
            .update_book(id, all_fields.clone().into())
            .await
            .expect("Failed to patch"));
        assert_eq!(repo.get_book(id).await.unwrap().details(), all_fields);
    }

    pub async fn seed_keeps_ids_and_skips_existing(repo: &dyn BookRepository) {
        let seed = vec![
            SeedBook {
                book_id: 10,
                details: details("Rayuela", "Julio Cortázar"),
                added_on: "2023-11-02".to_string(),
                images: vec![vec![7, 7], vec![]],
            },
            SeedBook {
                book_id: 11,
                details: details("Ficciones", "Jorge Luis Borges"),
                added_on: "2023-11-03".to_string(),
                images: vec![],
            },
        ];

        assert_eq!(repo.seed_books(seed.clone()).await.unwrap(), 2);
        assert_eq!(repo.seed_books(seed).await.unwrap(), 0);
        assert_eq!(repo.get_book_count().await.unwrap(), 2);

        let rayuela = repo.get_book(10).await.unwrap();
        assert_eq!(rayuela.added_on, "2023-11-02");
        assert_eq!(rayuela.images.len(), 1);

        let created = repo
            .create_book(details("Nuevo", "Autor"), None)
            .await
            .unwrap();
        assert!(created > 11, "created id {} collides with seeded ids", created);
    }

    pub async fn list_paginate_and_search(repo: &dyn BookRepository) {
        assert!(repo.list_books().await.unwrap().is_empty());
        assert!(repo.get_all_authors().await.unwrap().is_empty());

        let zorba = repo
            .create_book(details("Zorba", "Nikos Kazantzakis"), Some(vec![9]))
            .await
            .unwrap();
        let andes = repo
            .create_book(details("Andes", "Zapata"), None)
            .await
            .unwrap();
        let ficciones = repo
            .create_book(details("Ficciones", "Borges"), None)
            .await
            .unwrap();
        let aleph = repo
            .create_book(details("El Aleph", "Borges"), None)
            .await
            .unwrap();

        let by_author: Vec<_> = repo
            .list_books()
            .await
            .unwrap()
            .iter()
            .map(|b| b.book_id)
            .collect();
        assert_eq!(by_author, vec![aleph, ficciones, zorba, andes]);
        let listed = repo.list_books().await.unwrap();
        assert_eq!(listed[2].images.len(), 1);

        let page: Vec<_> = repo
            .get_books_with_pagination(1, 2)
            .await
            .unwrap()
            .iter()
            .map(|b| b.book_id)
            .collect();
        assert_eq!(page, vec![aleph, ficciones]);
        assert!(repo
            .get_books_with_pagination(10, 2)
            .await
            .unwrap()
            .is_empty());

        let found: Vec<_> = repo
            .search_books("BORGES", BookSearchType::ByAuthor)
            .await
            .unwrap()
            .iter()
            .map(|b| b.book_id)
            .collect();
        assert_eq!(found, vec![aleph, ficciones]);

        let rayuela = repo
            .create_book(details("Rayuela", "Julio Cortázar"), None)
            .await
            .unwrap();
        let found: Vec<_> = repo
            .search_books("CORTÁZAR", BookSearchType::ByAuthor)
            .await
            .unwrap()
            .iter()
            .map(|b| b.book_id)
            .collect();
        assert_eq!(found, vec![rayuela]);

        let found = repo
            .search_books("orb", BookSearchType::ByTitle)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].book_id, zorba);
        assert_eq!(found[0].images.len(), 1);

        assert_eq!(
            repo.search_books("", BookSearchType::ByTitle)
                .await
                .unwrap()
                .len(),
            5
        );

        assert_eq!(
            repo.get_all_authors().await.unwrap(),
            vec!["Borges", "Julio Cortázar", "Nikos Kazantzakis", "Zapata"]
        );
    }

    pub async fn add_and_remove_images(repo: &dyn BookRepository) {
        let id = repo
            .create_book(details("Rayuela", "Cortázar"), None)
            .await
            .unwrap();

        assert_eq!(repo.add_image_to_book(id, vec![]).await.unwrap(), None);
        assert!(matches!(
            repo.add_image_to_book(5000, vec![1]).await,
            Err(BookRepositoryError::NotFound(5000))
        ));

        let first = repo
            .add_image_to_book(id, b"first".to_vec())
            .await
            .unwrap()
            .expect("image id");
        let second = repo
            .add_image_to_book(id, b"second".to_vec())
            .await
            .unwrap()
            .expect("image id");

        let images = repo.get_images_by_book_id(id).await.unwrap();
        assert_eq!(
            images.iter().map(|i| i.image_id).collect::<Vec<_>>(),
            vec![first, second]
        );
        assert_eq!(images[0].image, "Zmlyc3Q=");

        assert!(repo.remove_image(first).await.unwrap());
        assert!(!repo.remove_image(first).await.unwrap());
        let images = repo.get_images_by_book_id(id).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].image_id, second);
        assert!(repo.get_images_by_book_id(5000).await.unwrap().is_empty());
    }

    pub async fn users_and_likes(repo: &dyn BookRepository) {
        assert_eq!(repo.get_user("auth0|1").await.unwrap(), None);
        repo.add_user(user("auth0|1")).await.unwrap();
        repo.add_user(user("auth0|2")).await.unwrap();

        let refreshed = UserDetails {
            email: "new@example.com".to_string(),
            name: "New".to_string(),
            ..user("auth0|1")
        };
        repo.add_user(refreshed.clone()).await.unwrap();
        assert_eq!(repo.get_user("auth0|1").await.unwrap(), Some(refreshed));

        let id = repo
            .create_book(details("Rayuela", "Cortázar"), None)
            .await
            .unwrap();
        let other = repo
            .create_book(details("Ficciones", "Borges"), None)
            .await
            .unwrap();

        assert!(!repo.liked_by(id, "auth0|1").await.unwrap());
        repo.like_book(id, "auth0|1").await.unwrap();
        repo.like_book(id, "auth0|1").await.unwrap();
        repo.like_book(id, "auth0|2").await.unwrap();
        assert!(repo.liked_by(id, "auth0|1").await.unwrap());
        assert!(!repo.liked_by(other, "auth0|1").await.unwrap());
        assert_eq!(repo.likes_count(id).await.unwrap(), 2);
        assert_eq!(repo.likes_count(other).await.unwrap(), 0);

        assert!(matches!(
            repo.like_book(5000, "auth0|1").await,
            Err(BookRepositoryError::NotFound(5000))
        ));

        assert!(repo.unlike_book(id, "auth0|1").await.unwrap());
        assert!(!repo.unlike_book(id, "auth0|1").await.unwrap());
        assert!(!repo.liked_by(id, "auth0|1").await.unwrap());
        assert_eq!(repo.likes_count(id).await.unwrap(), 1);
    }

    pub async fn users_need_distinct_emails_and_likes_need_users(repo: &dyn BookRepository) {
        repo.add_user(user("auth0|1")).await.unwrap();
        let same_email = UserDetails {
            email: "auth0|1@example.com".to_string(),
            ..user("auth0|2")
        };
        assert!(matches!(
            repo.add_user(same_email).await,
            Err(BookRepositoryError::EmailInUse(_))
        ));
        assert_eq!(repo.get_user("auth0|2").await.unwrap(), None);

        // accounts without an email do not collide with each other
        let no_email = |user_id: &str| UserDetails {
            email: "".to_string(),
            ..user(user_id)
        };
        repo.add_user(no_email("twitter|1")).await.unwrap();
        repo.add_user(no_email("twitter|2")).await.unwrap();
        assert_eq!(
            repo.get_user("twitter|2").await.unwrap(),
            Some(no_email("twitter|2"))
        );

        let id = repo
            .create_book(details("Rayuela", "Cortázar"), None)
            .await
            .unwrap();
        assert!(matches!(
            repo.like_book(id, "auth0|unknown").await,
            Err(BookRepositoryError::UserNotFound(_))
        ));
        assert_eq!(repo.likes_count(id).await.unwrap(), 0);
        repo.like_book(id, "twitter|1").await.unwrap();
        assert_eq!(repo.likes_count(id).await.unwrap(), 1);
    }
}
