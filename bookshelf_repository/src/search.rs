use crate::api::{Book, BookSearchType};

/// Case-insensitive substring match on the field selected by `search_type`.
/// An empty query matches every book.
pub fn matches(book: &Book, query: &str, search_type: BookSearchType) -> bool {
    let field = match search_type {
        BookSearchType::ByTitle => &book.title,
        BookSearchType::ByAuthor => &book.author,
    };
    field.to_lowercase().contains(&query.to_lowercase())
}

/// Books matching `query` on any of `search_types`, ordered by title
pub fn filter_books<'a>(
    books: impl IntoIterator<Item = &'a Book>,
    query: &str,
    search_types: &[BookSearchType],
) -> Vec<Book> {
    let mut found: Vec<Book> = books
        .into_iter()
        .filter(|book| {
            search_types
                .iter()
                .any(|&search_type| matches(book, query, search_type))
        })
        .cloned()
        .collect();
    found.sort_by(|a, b| a.title.cmp(&b.title).then(a.book_id.cmp(&b.book_id)));
    found
}
