use rand::Rng;

use bookshelf_repository::library::Library;
use bookshelf_webapp::client::BookshelfClient;

fn client() -> BookshelfClient {
    let url = std::env::var("BOOKSHELF_URL").unwrap_or("http://127.0.0.1:8180".to_string());
    BookshelfClient::new(&url).expect("Failed to create client")
}

fn library() -> Library {
    Library::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/../library/books_db.toml"))
        .expect("Failed to load library")
}

#[tokio::test]
async fn server_is_healthy() {
    assert!(client().health().await.expect("Health check failed"));
}

#[tokio::test]
/// Every book of the library is served, the server may hold more added through the admin pages
async fn library_books_are_served() {
    let client = client();
    let library = library();

    let books_count = client.books_count().await.expect("Failed to count books");
    assert!(books_count >= library.book.len() as i64);

    let book = &library.book[rand::thread_rng().gen_range(0..library.book.len())];
    let by_author = client
        .list_books_by_author(&book.author.to_uppercase())
        .await
        .expect("Failed to list books by author");
    assert!(by_author.iter().any(|summary| summary.id == book.id));
    assert!(by_author
        .iter()
        .all(|summary| summary.author.to_lowercase().contains(&book.author.to_lowercase())));
}

#[tokio::test]
async fn pages_cover_all_books_once() {
    let client = client();
    let books_count = client.books_count().await.expect("Failed to count books");
    let page_size = rand::thread_rng().gen_range(1..=5);

    let mut ids = vec![];
    let mut offset = 0;
    loop {
        let page = client
            .list_books_page(offset, page_size)
            .await
            .expect("Failed to list page");
        assert!(page.len() as i64 <= page_size);
        if page.is_empty() {
            break;
        }
        ids.extend(page.iter().map(|summary| summary.id));
        offset += page_size;
    }

    assert_eq!(ids.len() as i64, books_count);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len() as i64, books_count);
}

#[tokio::test]
async fn likes_are_counted_per_book() {
    let client = client();
    let book = &library().book[0];
    let likes = client
        .likes_count(book.id)
        .await
        .expect("Failed to count likes");
    assert!(likes >= 0);
}
