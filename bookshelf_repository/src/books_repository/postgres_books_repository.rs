use anyhow::Context;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{
    today, Book, BookDetails, BookDetailsPatch, BookId, BookImage, BookSearchType, ImageId,
    UserDetails,
};
use crate::books_repository::{encode_image, BookRepository, BookRepositoryError, SQL_SCHEMA_INDEXES};
use crate::library::SeedBook;

const BOOK_COLUMNS: &str = "id, title, author, description, read, added_on, goodreads_link";

pub struct PostgresBooksRepository {
    client: Client,
}

pub struct PostgresBooksRepositoryConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl PostgresBooksRepository {
    pub async fn init(config: PostgresBooksRepositoryConfig) -> anyhow::Result<Self> {
        let connection_str = format!(
            "postgresql://{}:{}@{}:{}/{}",
            config.username, config.password, config.hostname, config.port, config.database
        );
        tracing::info!(
            "Postgres connection: {}@{}:{}/{}",
            config.username,
            config.hostname,
            config.port,
            config.database
        );
        let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
            .await
            .context("Failed to start postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Postgres connection error: {}", e);
            }
        });

        client
            .batch_execute(
                "
        CREATE TABLE IF NOT EXISTS books (
            id              SERIAL PRIMARY KEY,
            title           TEXT NOT NULL,
            author          TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            read            BOOLEAN NOT NULL DEFAULT FALSE,
            added_on        TEXT NOT NULL DEFAULT to_char(CURRENT_DATE, 'YYYY-MM-DD'),
            goodreads_link  TEXT NOT NULL DEFAULT ''
            );
        CREATE TABLE IF NOT EXISTS book_images (
            image_id        SERIAL PRIMARY KEY,
            book_id         INTEGER NOT NULL REFERENCES books(id),
            image           BYTEA NOT NULL,
            added_on        TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
        CREATE TABLE IF NOT EXISTS users (
            user_id          TEXT PRIMARY KEY,
            email            TEXT UNIQUE,
            name             TEXT,
            oauth_identifier TEXT NOT NULL
            );
        CREATE TABLE IF NOT EXISTS book_likes (
            like_id         SERIAL PRIMARY KEY,
            book_id         INTEGER NOT NULL REFERENCES books(id),
            user_id         TEXT NOT NULL REFERENCES users(user_id),
            created_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(book_id, user_id)
            );
        ",
            )
            .await
            .context("Failed to setup tables")?;

        client
            .batch_execute(SQL_SCHEMA_INDEXES)
            .await
            .context("Failed to setup indexes")?;

        Ok(Self { client })
    }

    async fn images_of(&self, book_id: BookId) -> Result<Vec<BookImage>, BookRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "SELECT image_id, book_id, image FROM book_images WHERE book_id = $1 ORDER BY image_id",
            )
            .await?;

        let rows = self.client.query(&stmt, &[&book_id]).await?;

        rows.iter()
            .map(|row| -> Result<Option<BookImage>, BookRepositoryError> {
                let image_id: ImageId = row.try_get(0)?;
                let book_id: BookId = row.try_get(1)?;
                let data: Vec<u8> = row.try_get(2)?;
                Ok(encode_image(image_id, book_id, &data))
            })
            .filter_map(Result::transpose)
            .collect()
    }

    async fn query_books(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        load_images: bool,
    ) -> Result<Vec<Book>, BookRepositoryError> {
        let stmt: Statement = self.client.prepare(sql).await?;
        let rows = self.client.query(&stmt, params).await?;

        let mut books = rows
            .iter()
            .map(book_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        if load_images {
            for book in books.iter_mut() {
                book.images = self.images_of(book.book_id).await?;
            }
        }
        Ok(books)
    }

    async fn book_exists(&self, book_id: BookId) -> Result<(), BookRepositoryError> {
        let row = self
            .client
            .query_one("SELECT EXISTS(SELECT 1 FROM books WHERE id = $1)", &[&book_id])
            .await?;
        if row.try_get(0)? {
            Ok(())
        } else {
            Err(BookRepositoryError::NotFound(book_id))
        }
    }

    async fn user_exists(&self, user_id: &str) -> Result<(), BookRepositoryError> {
        let row = self
            .client
            .query_one("SELECT EXISTS(SELECT 1 FROM users WHERE user_id = $1)", &[&user_id])
            .await?;
        if row.try_get(0)? {
            Ok(())
        } else {
            Err(BookRepositoryError::UserNotFound(user_id.to_string()))
        }
    }

    async fn insert_image(
        &self,
        book_id: BookId,
        image: &[u8],
    ) -> Result<Option<ImageId>, BookRepositoryError> {
        if image.is_empty() {
            return Ok(None);
        }
        let row = self
            .client
            .query_one(
                "INSERT INTO book_images (book_id, image) VALUES ($1, $2) RETURNING image_id",
                &[&book_id, &image],
            )
            .await?;
        Ok(Some(row.try_get(0)?))
    }
}

fn book_from_row(row: &Row) -> Result<Book, tokio_postgres::Error> {
    Ok(Book::new(
        row.try_get(0)?,
        BookDetails {
            title: row.try_get(1)?,
            author: row.try_get(2)?,
            description: row.try_get(3)?,
            has_been_read: row.try_get(4)?,
            goodreads_link: row.try_get(6)?,
        },
        row.try_get(5)?,
    ))
}

#[async_trait::async_trait]
impl BookRepository for PostgresBooksRepository {
    async fn ping(&self) -> Result<(), BookRepositoryError> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn seed_books(&self, books: Vec<SeedBook>) -> Result<usize, BookRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO books (id, title, author, description, read, added_on, goodreads_link)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO NOTHING RETURNING id",
            )
            .await?;

        let mut inserted = 0;
        for seed in books {
            let rows = self
                .client
                .query(
                    &stmt,
                    &[
                        &seed.book_id,
                        &seed.details.title,
                        &seed.details.author,
                        &seed.details.description,
                        &seed.details.has_been_read,
                        &seed.added_on,
                        &seed.details.goodreads_link,
                    ],
                )
                .await?;
            if rows.is_empty() {
                tracing::info!("Book with id {} already exists, skipping", seed.book_id);
                continue;
            }
            for image in &seed.images {
                self.insert_image(seed.book_id, image).await?;
            }
            inserted += 1;
        }

        if inserted > 0 {
            // Explicit ids do not advance the SERIAL sequence
            self.client
                .execute(
                    "SELECT setval(pg_get_serial_sequence('books', 'id'), (SELECT COALESCE(MAX(id), 1) FROM books))",
                    &[],
                )
                .await?;
        }
        Ok(inserted)
    }

    async fn create_book(
        &self,
        details: BookDetails,
        image: Option<Vec<u8>>,
    ) -> Result<BookId, BookRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "INSERT INTO books (title, author, description, read, added_on, goodreads_link)
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[
                    &details.title,
                    &details.author,
                    &details.description,
                    &details.has_been_read,
                    &today(),
                    &details.goodreads_link,
                ],
            )
            .await?;

        let book_id: BookId = rows
            .first()
            .ok_or_else(|| BookRepositoryError::Other("Id not returned".to_string()))?
            .try_get(0)?;

        if let Some(image) = image {
            self.insert_image(book_id, &image).await?;
        }
        Ok(book_id)
    }

    async fn update_book(
        &self,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> Result<bool, BookRepositoryError> {
        let stmt: Statement = self
            .client
            .prepare(
                "UPDATE books SET
                    title = COALESCE($1, title),
                    author = COALESCE($2, author),
                    description = COALESCE($3, description),
                    read = COALESCE($4, read),
                    goodreads_link = COALESCE($5, goodreads_link)
                 WHERE id = $6 RETURNING id",
            )
            .await?;

        let rows = self
            .client
            .query(
                &stmt,
                &[
                    &patch.title,
                    &patch.author,
                    &patch.description,
                    &patch.has_been_read,
                    &patch.goodreads_link,
                    &book_id,
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn get_book(&self, book_id: BookId) -> Result<Book, BookRepositoryError> {
        let mut books = self
            .query_books(
                &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = $1"),
                &[&book_id],
                true,
            )
            .await?;
        books.pop().ok_or(BookRepositoryError::NotFound(book_id))
    }

    async fn get_book_count(&self) -> Result<i64, BookRepositoryError> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM books", &[])
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn list_books(&self) -> Result<Vec<Book>, BookRepositoryError> {
        self.query_books(
            &format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY author, title"),
            &[],
            true,
        )
        .await
    }

    async fn get_books_with_pagination(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Book>, BookRepositoryError> {
        self.query_books(
            &format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY title, id LIMIT $1 OFFSET $2"),
            &[&limit.max(0), &offset.max(0)],
            false,
        )
        .await
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
        self.query_books(
            &format!(
                "SELECT {BOOK_COLUMNS} FROM books WHERE strpos(lower({column}), lower($1)) > 0 ORDER BY title, id"
            ),
            &[&text],
            true,
        )
        .await
    }

    async fn get_all_authors(&self) -> Result<Vec<String>, BookRepositoryError> {
        let rows = self
            .client
            .query("SELECT DISTINCT author FROM books ORDER BY author", &[])
            .await?;
        rows.iter().map(|row| Ok(row.try_get(0)?)).collect()
    }

    async fn add_image_to_book(
        &self,
        book_id: BookId,
        image: Vec<u8>,
    ) -> Result<Option<ImageId>, BookRepositoryError> {
        if image.is_empty() {
            return Ok(None);
        }
        self.book_exists(book_id).await?;
        self.insert_image(book_id, &image).await
    }

    async fn get_images_by_book_id(
        &self,
        book_id: BookId,
    ) -> Result<Vec<BookImage>, BookRepositoryError> {
        self.images_of(book_id).await
    }

    async fn remove_image(&self, image_id: ImageId) -> Result<bool, BookRepositoryError> {
        let removed = self
            .client
            .execute("DELETE FROM book_images WHERE image_id = $1", &[&image_id])
            .await?;
        Ok(removed > 0)
    }

    async fn add_user(&self, user: UserDetails) -> Result<(), BookRepositoryError> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND user_id <> $2)",
                &[&user.email, &user.user_id],
            )
            .await?;
        if row.try_get(0)? {
            return Err(BookRepositoryError::EmailInUse(user.email));
        }
        // a missing email is stored as NULL, which UNIQUE does not compare
        self.client
            .execute(
                "INSERT INTO users (user_id, email, name, oauth_identifier) VALUES ($1, NULLIF($2, ''), $3, $4)
                 ON CONFLICT (user_id) DO UPDATE SET email = EXCLUDED.email, name = EXCLUDED.name",
                &[&user.user_id, &user.email, &user.name, &user.oauth_identifier],
            )
            .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserDetails>, BookRepositoryError> {
        let rows = self
            .client
            .query(
                "SELECT user_id, COALESCE(email, ''), COALESCE(name, ''), oauth_identifier FROM users WHERE user_id = $1",
                &[&user_id],
            )
            .await?;

        rows.first()
            .map(|row| -> Result<UserDetails, BookRepositoryError> {
                Ok(UserDetails {
                    user_id: row.try_get(0)?,
                    email: row.try_get(1)?,
                    name: row.try_get(2)?,
                    oauth_identifier: row.try_get(3)?,
                })
            })
            .transpose()
    }

    async fn like_book(&self, book_id: BookId, user_id: &str) -> Result<(), BookRepositoryError> {
        self.book_exists(book_id).await?;
        self.user_exists(user_id).await?;
        self.client
            .execute(
                "INSERT INTO book_likes (book_id, user_id) VALUES ($1, $2)
                 ON CONFLICT (book_id, user_id) DO NOTHING",
                &[&book_id, &user_id],
            )
            .await?;
        Ok(())
    }

    async fn unlike_book(
        &self,
        book_id: BookId,
        user_id: &str,
    ) -> Result<bool, BookRepositoryError> {
        let removed = self
            .client
            .execute(
                "DELETE FROM book_likes WHERE book_id = $1 AND user_id = $2",
                &[&book_id, &user_id],
            )
            .await?;
        Ok(removed > 0)
    }

    async fn liked_by(&self, book_id: BookId, user_id: &str) -> Result<bool, BookRepositoryError> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM book_likes WHERE book_id = $1 AND user_id = $2)",
                &[&book_id, &user_id],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn likes_count(&self, book_id: BookId) -> Result<i64, BookRepositoryError> {
        let row = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM book_likes WHERE book_id = $1",
                &[&book_id],
            )
            .await?;
        Ok(row.try_get(0)?)
    }
}
