use std::sync::Arc;

use anyhow::Context;

use bookshelf_repository::books_repository::{
    BookRepository, InMemoryBookRepository, PostgresBooksRepository,
    PostgresBooksRepositoryConfig, SqliteBooksRepository,
};
use bookshelf_repository::library::Library;

use crate::settings::{DbMode, DbSettings, LibrarySettings};

/// Opens the backend selected by `db.mode`
pub async fn init_repository(settings: &DbSettings) -> anyhow::Result<Arc<dyn BookRepository>> {
    tracing::info!("Using {:?} book repository", settings.mode);
    Ok(match settings.mode {
        DbMode::Memory => Arc::new(InMemoryBookRepository::default()),
        DbMode::Sqlite => Arc::new(SqliteBooksRepository::open(&settings.sqlite_path)?),
        DbMode::Postgres => Arc::new(
            PostgresBooksRepository::init(PostgresBooksRepositoryConfig {
                hostname: settings.host.clone(),
                port: settings.port,
                username: settings.username.clone(),
                password: settings.password.clone(),
                database: settings.name.clone(),
            })
            .await
            .context("Failed to init postgres")?,
        ),
    })
}

/// Loads the library file into the repository, returns the number of new books
pub async fn seed_from_library(
    books_repository: &dyn BookRepository,
    settings: &LibrarySettings,
) -> anyhow::Result<usize> {
    let seed_books = Library::from_file(&settings.path)?.into_seed_books(&settings.images_dir)?;
    let inserted = books_repository
        .seed_books(seed_books)
        .await
        .context("Failed to seed books")?;
    tracing::info!("Seeded {} books from {}", inserted, settings.path);
    Ok(inserted)
}

#[cfg(test)]
mod startup_tests {
    use super::*;

    fn db_settings(mode: DbMode, sqlite_path: &str) -> DbSettings {
        DbSettings {
            mode,
            sqlite_path: sqlite_path.to_string(),
            host: "127.0.0.1".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            name: "postgres".to_string(),
        }
    }

    #[tokio::test]
    async fn seeding_sqlite_twice_inserts_once() {
        let directory = tempfile::tempdir().unwrap();
        std::fs::write(directory.path().join("cover.jpg"), [0xff, 0xd8, 0xff]).unwrap();
        let library_path = directory.path().join("books_db.toml");
        std::fs::write(
            &library_path,
            r#"
[[book]]
id = 3
title = "Cien años de soledad"
author = "Gabriel García Márquez"
image_names = ["cover.jpg"]

[[book]]
id = 4
title = "La casa de los espíritus"
author = "Isabel Allende"
"#,
        )
        .unwrap();
        let library = LibrarySettings {
            path: library_path.to_str().unwrap().to_string(),
            images_dir: directory.path().to_str().unwrap().to_string(),
            seed_on_startup: Some(true),
        };
        let sqlite_path = directory.path().join("bookshelf.db");
        let books_repository =
            init_repository(&db_settings(DbMode::Sqlite, sqlite_path.to_str().unwrap()))
                .await
                .unwrap();

        assert_eq!(
            seed_from_library(books_repository.as_ref(), &library)
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            seed_from_library(books_repository.as_ref(), &library)
                .await
                .unwrap(),
            0
        );
        let book = books_repository.get_book(3).await.unwrap();
        assert_eq!(book.images.len(), 1);
        assert_eq!(book.images[0].image, "/9j/");
    }

    #[tokio::test]
    async fn missing_library_file_is_an_error() {
        let books_repository = init_repository(&db_settings(DbMode::Memory, ""))
            .await
            .unwrap();
        let library = LibrarySettings {
            path: "does/not/exist.toml".to_string(),
            images_dir: "images".to_string(),
            seed_on_startup: None,
        };
        assert!(seed_from_library(books_repository.as_ref(), &library)
            .await
            .is_err());
    }
}
