//! Tests run against a live webapp, enabled with the `system_tests` feature.
//! The server is expected at `BOOKSHELF_URL` (default `http://127.0.0.1:8180`)
//! and to be seeded with `library/books_db.toml`.

#[cfg(all(test, feature = "system_tests"))]
mod system_tests;
