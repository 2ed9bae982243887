use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use bookshelf_repository::api::{Book, BookSearchType};
use bookshelf_repository::library::Library;
use bookshelf_repository::search::filter_books;

const BY_TITLE: &[BookSearchType] = &[BookSearchType::ByTitle];
const BY_AUTHOR: &[BookSearchType] = &[BookSearchType::ByAuthor];
const BY_TITLE_OR_AUTHOR: &[BookSearchType] = &[BookSearchType::ByTitle, BookSearchType::ByAuthor];

/// Search the books documented in the library file
#[derive(clap::Parser, Debug)]
#[command(name = "bookshelf-search")]
struct Cli {
    /// Search by title
    #[arg(long)]
    title: Option<String>,
    /// Search by author
    #[arg(long)]
    author: Option<String>,
    /// Library file to search
    #[arg(long, default_value = "library/books_db.toml")]
    library: PathBuf,
    /// Searched in both titles and authors
    query: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

impl Cli {
    /// First non-empty of `--title`, `--author` and the bare query
    fn search(&self) -> Option<(&str, &'static [BookSearchType])> {
        if let Some(title) = non_empty(&self.title) {
            Some((title, BY_TITLE))
        } else if let Some(author) = non_empty(&self.author) {
            Some((author, BY_AUTHOR))
        } else {
            non_empty(&self.query).map(|query| (query, BY_TITLE_OR_AUTHOR))
        }
    }
}

fn describe(book: &Book) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "\"{}\" by {}", book.title, book.author);
    if !book.description.is_empty() {
        let _ = writeln!(output, "{}", book.description);
    }
    let _ = writeln!(output, "id: {}", book.book_id);
    let _ = writeln!(output, "Added on: {}", book.added_on);
    let _ = writeln!(
        output,
        "Read: {}",
        if book.has_been_read { "yes" } else { "no" }
    );
    output
}

fn report(books: &[Book], query: &str, search_types: &[BookSearchType]) -> String {
    let found = filter_books(books, query, search_types);
    let mut output = String::new();
    for book in &found {
        let _ = writeln!(output, "{}", describe(book));
    }
    let _ = writeln!(
        output,
        "{} books found (from {} books documented).",
        found.len(),
        books.len()
    );
    output
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let Some((query, search_types)) = cli.search() else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let library = Library::from_file(&cli.library)
        .with_context(|| format!("Failed to load library {}", cli.library.display()))?;
    let books = library.books();
    tracing::debug!("Loaded {} books", books.len());
    print!("{}", report(&books, query, search_types));
    Ok(())
}

#[cfg(test)]
mod search_cli_tests {
    use super::*;

    const LIBRARY: &str = r#"
[[book]]
id = 1
title = "El túnel"
author = "Ernesto Sabato"
description = "Juan Pablo Castel confiesa"
has_been_read = true
added_on = "2023-01-10"

[[book]]
id = 2
title = "Sobre héroes y tumbas"
author = "Ernesto Sabato"
added_on = "2023-02-11"

[[book]]
id = 3
title = "Ernesto"
author = "Umberto Saba"
added_on = "2023-03-12"
"#;

    fn books() -> Vec<Book> {
        Library::parse(LIBRARY).unwrap().books()
    }

    #[test]
    fn title_flag_wins_over_query() {
        let cli = Cli::parse_from(["bookshelf-search", "--title", "túnel", "sabato"]);
        let (query, search_types) = cli.search().unwrap();
        assert_eq!(query, "túnel");
        assert_eq!(search_types, BY_TITLE);
    }

    #[test]
    fn no_arguments_means_no_search() {
        let cli = Cli::parse_from(["bookshelf-search"]);
        assert!(cli.search().is_none());
        assert_eq!(cli.library, PathBuf::from("library/books_db.toml"));
    }

    #[test]
    fn query_searches_titles_and_authors() {
        let output = report(&books(), "ernesto", BY_TITLE_OR_AUTHOR);
        assert!(output.ends_with("3 books found (from 3 books documented).\n"));

        let output = report(&books(), "ernesto", BY_AUTHOR);
        assert!(output.ends_with("2 books found (from 3 books documented).\n"));
    }

    #[test]
    fn book_is_described_with_read_flag() {
        let output = describe(&books()[0]);
        assert_eq!(
            output,
            "\"El túnel\" by Ernesto Sabato\nJuan Pablo Castel confiesa\nid: 1\nAdded on: 2023-01-10\nRead: yes\n"
        );
    }
}
