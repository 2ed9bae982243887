use std::path::Path;

use anyhow::Context;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::api::{
    today, Book, BookDetails, BookDetailsPatch, BookId, BookImage, BookSearchType, ImageId,
    UserDetails,
};
use crate::books_repository::{encode_image, BookRepository, BookRepositoryError, SQL_SCHEMA_INDEXES};
use crate::library::SeedBook;

const BOOK_COLUMNS: &str = "id, title, author, description, read, added_on, goodreads_link";

/// Repository backed by an embedded SQLite database file.
///
/// `rusqlite::Connection` is not `Sync`, so every operation locks the connection.
pub struct SqliteBooksRepository {
    connection: parking_lot::Mutex<Connection>,
}

impl SqliteBooksRepository {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        tracing::info!("Opening sqlite database {}", path.display());
        let connection = Connection::open(path)
            .with_context(|| format!("Failed to open sqlite database {}", path.display()))?;
        Self::init(connection)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let connection =
            Connection::open_in_memory().context("Failed to open in-memory sqlite database")?;
        Self::init(connection)
    }

    fn init(connection: Connection) -> anyhow::Result<Self> {
        // built-in lower() only folds ASCII
        connection
            .create_scalar_function(
                "unicode_lower",
                1,
                FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
                |ctx| Ok(ctx.get::<String>(0)?.to_lowercase()),
            )
            .context("Failed to register unicode_lower")?;
        connection
            .execute_batch(
                "
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS books (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            title           TEXT NOT NULL,
            author          TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            read            BOOLEAN NOT NULL DEFAULT 0,
            added_on        TEXT NOT NULL DEFAULT (date('now')),
            goodreads_link  TEXT NOT NULL DEFAULT ''
            );
        CREATE TABLE IF NOT EXISTS book_images (
            image_id        INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id         INTEGER NOT NULL REFERENCES books(id),
            image           BLOB NOT NULL,
            added_on        TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
        CREATE TABLE IF NOT EXISTS users (
            user_id          TEXT PRIMARY KEY,
            email            TEXT UNIQUE,
            name             TEXT,
            oauth_identifier TEXT NOT NULL
            );
        CREATE TABLE IF NOT EXISTS book_likes (
            like_id         INTEGER PRIMARY KEY AUTOINCREMENT,
            book_id         INTEGER NOT NULL REFERENCES books(id),
            user_id         TEXT NOT NULL REFERENCES users(user_id),
            created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(book_id, user_id)
            );
        ",
            )
            .context("Failed to setup tables")?;
        connection
            .execute_batch(SQL_SCHEMA_INDEXES)
            .context("Failed to setup indexes")?;

        Ok(Self {
            connection: parking_lot::Mutex::new(connection),
        })
    }
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book::new(
        row.get(0)?,
        BookDetails {
            title: row.get(1)?,
            author: row.get(2)?,
            description: row.get(3)?,
            has_been_read: row.get(4)?,
            goodreads_link: row.get(6)?,
        },
        row.get(5)?,
    ))
}

fn images_of(connection: &Connection, book_id: BookId) -> rusqlite::Result<Vec<BookImage>> {
    let mut stmt = connection.prepare(
        "SELECT image_id, book_id, image FROM book_images WHERE book_id = ?1 ORDER BY image_id",
    )?;
    let rows = stmt.query_map(params![book_id], |row| {
        let image_id: ImageId = row.get(0)?;
        let book_id: BookId = row.get(1)?;
        let data: Vec<u8> = row.get(2)?;
        Ok(encode_image(image_id, book_id, &data))
    })?;
    let mut images = vec![];
    for image in rows {
        images.extend(image?);
    }
    Ok(images)
}

fn query_books(
    connection: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    load_images: bool,
) -> Result<Vec<Book>, BookRepositoryError> {
    let mut stmt = connection.prepare(sql)?;
    let books = stmt
        .query_map(params, book_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    if !load_images {
        return Ok(books);
    }
    books
        .into_iter()
        .map(|mut book| {
            book.images = images_of(connection, book.book_id)?;
            Ok(book)
        })
        .collect()
}

fn book_exists(connection: &Connection, book_id: BookId) -> Result<(), BookRepositoryError> {
    let exists: bool = connection.query_row(
        "SELECT EXISTS(SELECT 1 FROM books WHERE id = ?1)",
        params![book_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(BookRepositoryError::NotFound(book_id))
    }
}

fn user_exists(connection: &Connection, user_id: &str) -> Result<(), BookRepositoryError> {
    let exists: bool = connection.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE user_id = ?1)",
        params![user_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(BookRepositoryError::UserNotFound(user_id.to_string()))
    }
}

fn insert_image(
    connection: &Connection,
    book_id: BookId,
    image: &[u8],
) -> rusqlite::Result<Option<ImageId>> {
    if image.is_empty() {
        return Ok(None);
    }
    connection.execute(
        "INSERT INTO book_images (book_id, image) VALUES (?1, ?2)",
        params![book_id, image],
    )?;
    Ok(Some(connection.last_insert_rowid() as ImageId))
}

#[async_trait::async_trait]
impl BookRepository for SqliteBooksRepository {
    async fn ping(&self) -> Result<(), BookRepositoryError> {
        self.connection
            .lock()
            .query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    async fn seed_books(&self, books: Vec<SeedBook>) -> Result<usize, BookRepositoryError> {
        let mut connection = self.connection.lock();
        let transaction = connection.transaction()?;
        let mut inserted = 0;
        for seed in books {
            if book_exists(&transaction, seed.book_id).is_ok() {
                tracing::info!("Book with id {} already exists, skipping", seed.book_id);
                continue;
            }
            transaction.execute(
                "INSERT INTO books (id, title, author, description, read, added_on, goodreads_link)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    seed.book_id,
                    seed.details.title,
                    seed.details.author,
                    seed.details.description,
                    seed.details.has_been_read,
                    seed.added_on,
                    seed.details.goodreads_link
                ],
            )?;
            for image in &seed.images {
                insert_image(&transaction, seed.book_id, image)?;
            }
            inserted += 1;
        }
        transaction.commit()?;
        Ok(inserted)
    }

    async fn create_book(
        &self,
        details: BookDetails,
        image: Option<Vec<u8>>,
    ) -> Result<BookId, BookRepositoryError> {
        let connection = self.connection.lock();
        connection.execute(
            "INSERT INTO books (title, author, description, read, added_on, goodreads_link)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                details.title,
                details.author,
                details.description,
                details.has_been_read,
                today(),
                details.goodreads_link
            ],
        )?;
        let book_id = connection.last_insert_rowid() as BookId;
        if let Some(image) = image {
            insert_image(&connection, book_id, &image)?;
        }
        Ok(book_id)
    }

    async fn update_book(
        &self,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> Result<bool, BookRepositoryError> {
        let updated = self.connection.lock().execute(
            "UPDATE books SET
                title = COALESCE(?1, title),
                author = COALESCE(?2, author),
                description = COALESCE(?3, description),
                read = COALESCE(?4, read),
                goodreads_link = COALESCE(?5, goodreads_link)
             WHERE id = ?6",
            params![
                patch.title,
                patch.author,
                patch.description,
                patch.has_been_read,
                patch.goodreads_link,
                book_id
            ],
        )?;
        Ok(updated > 0)
    }

    async fn get_book(&self, book_id: BookId) -> Result<Book, BookRepositoryError> {
        let connection = self.connection.lock();
        let mut book = connection
            .query_row(
                &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1"),
                params![book_id],
                book_from_row,
            )
            .optional()?
            .ok_or(BookRepositoryError::NotFound(book_id))?;
        book.images = images_of(&connection, book_id)?;
        Ok(book)
    }

    async fn get_book_count(&self) -> Result<i64, BookRepositoryError> {
        Ok(self
            .connection
            .lock()
            .query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?)
    }

    async fn list_books(&self) -> Result<Vec<Book>, BookRepositoryError> {
        query_books(
            &self.connection.lock(),
            &format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY author, title"),
            [],
            true,
        )
    }

    async fn get_books_with_pagination(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Book>, BookRepositoryError> {
        query_books(
            &self.connection.lock(),
            &format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY title, id LIMIT ?1 OFFSET ?2"),
            params![limit.max(0), offset.max(0)],
            false,
        )
    }

    async fn search_books(
        &self,
        text: &str,
        search_type: BookSearchType,
    ) -> Result<Vec<Book>, BookRepositoryError> {
        let column = match search_type {
            BookSearchType::ByTitle => "title",
            BookSearchType::ByAuthor => "author",
        };
        query_books(
            &self.connection.lock(),
            &format!(
                "SELECT {BOOK_COLUMNS} FROM books WHERE instr(unicode_lower({column}), unicode_lower(?1)) > 0 ORDER BY title, id"
            ),
            params![text],
            true,
        )
    }

    async fn get_all_authors(&self) -> Result<Vec<String>, BookRepositoryError> {
        let connection = self.connection.lock();
        let mut stmt = connection.prepare("SELECT DISTINCT author FROM books ORDER BY author")?;
        let authors = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(authors)
    }

    async fn add_image_to_book(
        &self,
        book_id: BookId,
        image: Vec<u8>,
    ) -> Result<Option<ImageId>, BookRepositoryError> {
        if image.is_empty() {
            return Ok(None);
        }
        let connection = self.connection.lock();
        book_exists(&connection, book_id)?;
        Ok(insert_image(&connection, book_id, &image)?)
    }

    async fn get_images_by_book_id(
        &self,
        book_id: BookId,
    ) -> Result<Vec<BookImage>, BookRepositoryError> {
        Ok(images_of(&self.connection.lock(), book_id)?)
    }

    async fn remove_image(&self, image_id: ImageId) -> Result<bool, BookRepositoryError> {
        let removed = self
            .connection
            .lock()
            .execute("DELETE FROM book_images WHERE image_id = ?1", params![image_id])?;
        Ok(removed > 0)
    }

    async fn add_user(&self, user: UserDetails) -> Result<(), BookRepositoryError> {
        let connection = self.connection.lock();
        let email_taken: bool = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 AND user_id <> ?2)",
            params![user.email, user.user_id],
            |row| row.get(0),
        )?;
        if email_taken {
            return Err(BookRepositoryError::EmailInUse(user.email));
        }
        // a missing email is stored as NULL, which UNIQUE does not compare
        connection.execute(
            "INSERT INTO users (user_id, email, name, oauth_identifier) VALUES (?1, NULLIF(?2, ''), ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET email = excluded.email, name = excluded.name",
            params![user.user_id, user.email, user.name, user.oauth_identifier],
        )?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserDetails>, BookRepositoryError> {
        Ok(self
            .connection
            .lock()
            .query_row(
                "SELECT user_id, COALESCE(email, ''), COALESCE(name, ''), oauth_identifier FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserDetails {
                        user_id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                        oauth_identifier: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    async fn like_book(&self, book_id: BookId, user_id: &str) -> Result<(), BookRepositoryError> {
        let connection = self.connection.lock();
        book_exists(&connection, book_id)?;
        user_exists(&connection, user_id)?;
        connection.execute(
            "INSERT INTO book_likes (book_id, user_id) VALUES (?1, ?2)
             ON CONFLICT(book_id, user_id) DO NOTHING",
            params![book_id, user_id],
        )?;
        Ok(())
    }

    async fn unlike_book(
        &self,
        book_id: BookId,
        user_id: &str,
    ) -> Result<bool, BookRepositoryError> {
        let removed = self.connection.lock().execute(
            "DELETE FROM book_likes WHERE book_id = ?1 AND user_id = ?2",
            params![book_id, user_id],
        )?;
        Ok(removed > 0)
    }

    async fn liked_by(&self, book_id: BookId, user_id: &str) -> Result<bool, BookRepositoryError> {
        Ok(self.connection.lock().query_row(
            "SELECT EXISTS(SELECT 1 FROM book_likes WHERE book_id = ?1 AND user_id = ?2)",
            params![book_id, user_id],
            |row| row.get(0),
        )?)
    }

    async fn likes_count(&self, book_id: BookId) -> Result<i64, BookRepositoryError> {
        Ok(self.connection.lock().query_row(
            "SELECT COUNT(*) FROM book_likes WHERE book_id = ?1",
            params![book_id],
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod sqlite_book_repository_tests {
    use crate::books_repository::repository_test_cases;
    use crate::books_repository::{BookRepository, SqliteBooksRepository};

    fn repo() -> SqliteBooksRepository {
        SqliteBooksRepository::open_in_memory().expect("Failed to open sqlite")
    }

    #[tokio::test]
    async fn test_add_book_and_get_it() {
        repository_test_cases::add_book_and_get_it(&repo()).await;
    }

    #[tokio::test]
    async fn test_add_book_patch_and_get_it() {
        repository_test_cases::add_book_patch_and_get_it(&repo()).await;
    }

    #[tokio::test]
    async fn test_seed_keeps_ids_and_skips_existing() {
        repository_test_cases::seed_keeps_ids_and_skips_existing(&repo()).await;
    }

    #[tokio::test]
    async fn test_list_paginate_and_search() {
        repository_test_cases::list_paginate_and_search(&repo()).await;
    }

    #[tokio::test]
    async fn test_add_and_remove_images() {
        repository_test_cases::add_and_remove_images(&repo()).await;
    }

    #[tokio::test]
    async fn test_users_and_likes() {
        repository_test_cases::users_and_likes(&repo()).await;
    }

    #[tokio::test]
    async fn test_users_need_distinct_emails_and_likes_need_users() {
        repository_test_cases::users_need_distinct_emails_and_likes_need_users(&repo()).await;
    }

    #[tokio::test]
    /// Data written through one connection is visible after reopening the file
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("bookshelf.db");

        let id = {
            let repo = SqliteBooksRepository::open(&path).expect("Failed to open sqlite");
            repo.ping().await.expect("Ping failed");
            repo.create_book(
                repository_test_cases::details("Rayuela", "Cortázar"),
                Some(vec![1]),
            )
            .await
            .expect("Failed to add book")
        };

        let repo = SqliteBooksRepository::open(&path).expect("Failed to reopen sqlite");
        let book = repo.get_book(id).await.expect("Failed to get book");
        assert_eq!(book.title, "Rayuela");
        assert_eq!(book.images.len(), 1);
    }
}
