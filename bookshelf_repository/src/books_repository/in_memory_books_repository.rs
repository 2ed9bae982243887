use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};

use serde_json::json;

use crate::api::{
    today, Book, BookDetails, BookDetailsPatch, BookId, BookImage, BookSearchType, ImageId,
    UserDetails, UserId,
};
use crate::books_repository::{encode_image, BookRepository, BookRepositoryError};
use crate::library::SeedBook;
use crate::search;

struct StoredImage {
    book_id: BookId,
    data: Vec<u8>,
}

pub struct InMemoryBookRepository {
    book_sequence_generator: AtomicI32,
    image_sequence_generator: AtomicI32,
    books: parking_lot::RwLock<HashMap<BookId, Book>>,
    // BTreeMap keeps images of a book in insertion order
    images: parking_lot::RwLock<BTreeMap<ImageId, StoredImage>>,
    likes: parking_lot::RwLock<HashMap<BookId, BTreeSet<UserId>>>,
    users: parking_lot::RwLock<HashMap<UserId, UserDetails>>,
}

impl Default for InMemoryBookRepository {
    fn default() -> Self {
        Self {
            book_sequence_generator: AtomicI32::new(1),
            image_sequence_generator: AtomicI32::new(1),
            books: Default::default(),
            images: Default::default(),
            likes: Default::default(),
            users: Default::default(),
        }
    }
}

impl InMemoryBookRepository {
    fn images_of(&self, book_id: BookId) -> Vec<BookImage> {
        self.images
            .read()
            .iter()
            .filter(|(_, stored)| stored.book_id == book_id)
            .filter_map(|(&image_id, stored)| encode_image(image_id, book_id, &stored.data))
            .collect()
    }

    fn with_images(&self, mut book: Book) -> Book {
        book.images = self.images_of(book.book_id);
        book
    }

    fn insert_image(&self, book_id: BookId, data: Vec<u8>) -> Option<ImageId> {
        if data.is_empty() {
            return None;
        }
        let image_id = self.image_sequence_generator.fetch_add(1, Ordering::Relaxed);
        self.images
            .write()
            .insert(image_id, StoredImage { book_id, data });
        Some(image_id)
    }

    fn book_exists(&self, book_id: BookId) -> Result<(), BookRepositoryError> {
        if self.books.read().contains_key(&book_id) {
            Ok(())
        } else {
            Err(BookRepositoryError::NotFound(book_id))
        }
    }
}

#[async_trait::async_trait]
impl BookRepository for InMemoryBookRepository {
    async fn ping(&self) -> Result<(), BookRepositoryError> {
        Ok(())
    }

    async fn seed_books(&self, books: Vec<SeedBook>) -> Result<usize, BookRepositoryError> {
        let mut inserted = 0;
        for seed in books {
            {
                let mut locked_books = self.books.write();
                if locked_books.contains_key(&seed.book_id) {
                    tracing::info!("Book with id {} already exists, skipping", seed.book_id);
                    continue;
                }
                locked_books.insert(
                    seed.book_id,
                    Book::new(seed.book_id, seed.details, seed.added_on),
                );
            }
            self.book_sequence_generator
                .fetch_max(seed.book_id.saturating_add(1), Ordering::Relaxed);
            for image in seed.images {
                self.insert_image(seed.book_id, image);
            }
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn create_book(
        &self,
        details: BookDetails,
        image: Option<Vec<u8>>,
    ) -> Result<BookId, BookRepositoryError> {
        let id = loop {
            let id = self.book_sequence_generator.fetch_add(1, Ordering::Relaxed);
            // a concurrent seed may already hold this id
            if let Entry::Vacant(slot) = self.books.write().entry(id) {
                slot.insert(Book::new(id, details, today()));
                break id;
            }
        };
        if let Some(image) = image {
            self.insert_image(id, image);
        }
        Ok(id)
    }

    async fn update_book(
        &self,
        book_id: BookId,
        patch: BookDetailsPatch,
    ) -> Result<bool, BookRepositoryError> {
        let mut locked_books = self.books.write();
        if let Some(book) = locked_books.get_mut(&book_id) {
            let mut result_details = json!(book.details());
            json_patch::merge(&mut result_details, &json!(patch));
            let result_details: BookDetails = serde_json::from_value(result_details)?;
            let added_on = std::mem::take(&mut book.added_on);
            *book = Book::new(book_id, result_details, added_on);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get_book(&self, book_id: BookId) -> Result<Book, BookRepositoryError> {
        let book = self
            .books
            .read()
            .get(&book_id)
            .cloned()
            .ok_or(BookRepositoryError::NotFound(book_id))?;
        Ok(self.with_images(book))
    }

    async fn get_book_count(&self) -> Result<i64, BookRepositoryError> {
        Ok(self.books.read().len() as i64)
    }

    async fn list_books(&self) -> Result<Vec<Book>, BookRepositoryError> {
        let mut books: Vec<Book> = self.books.read().values().cloned().collect();
        books.sort_by(|a, b| {
            a.author
                .cmp(&b.author)
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(books.into_iter().map(|book| self.with_images(book)).collect())
    }

    async fn get_books_with_pagination(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Book>, BookRepositoryError> {
        let mut books: Vec<Book> = self.books.read().values().cloned().collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.book_id.cmp(&b.book_id)));
        Ok(books
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn search_books(
        &self,
        text: &str,
        search_type: BookSearchType,
    ) -> Result<Vec<Book>, BookRepositoryError> {
        let found = search::filter_books(self.books.read().values(), text, &[search_type]);
        Ok(found.into_iter().map(|book| self.with_images(book)).collect())
    }

    async fn get_all_authors(&self) -> Result<Vec<String>, BookRepositoryError> {
        let authors: BTreeSet<String> = self
            .books
            .read()
            .values()
            .map(|book| book.author.clone())
            .collect();
        Ok(authors.into_iter().collect())
    }

    async fn add_image_to_book(
        &self,
        book_id: BookId,
        image: Vec<u8>,
    ) -> Result<Option<ImageId>, BookRepositoryError> {
        if image.is_empty() {
            return Ok(None);
        }
        self.book_exists(book_id)?;
        Ok(self.insert_image(book_id, image))
    }

    async fn get_images_by_book_id(
        &self,
        book_id: BookId,
    ) -> Result<Vec<BookImage>, BookRepositoryError> {
        Ok(self.images_of(book_id))
    }

    async fn remove_image(&self, image_id: ImageId) -> Result<bool, BookRepositoryError> {
        Ok(self.images.write().remove(&image_id).is_some())
    }

    async fn add_user(&self, user: UserDetails) -> Result<(), BookRepositoryError> {
        let mut locked_users = self.users.write();
        if !user.email.is_empty()
            && locked_users
                .values()
                .any(|other| other.email == user.email && other.user_id != user.user_id)
        {
            return Err(BookRepositoryError::EmailInUse(user.email));
        }
        match locked_users.get_mut(&user.user_id) {
            Some(existing) => {
                existing.email = user.email;
                existing.name = user.name;
            }
            None => {
                locked_users.insert(user.user_id.clone(), user);
            }
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserDetails>, BookRepositoryError> {
        Ok(self.users.read().get(user_id).cloned())
    }

    async fn like_book(&self, book_id: BookId, user_id: &str) -> Result<(), BookRepositoryError> {
        self.book_exists(book_id)?;
        if !self.users.read().contains_key(user_id) {
            return Err(BookRepositoryError::UserNotFound(user_id.to_string()));
        }
        self.likes
            .write()
            .entry(book_id)
            .or_default()
            .insert(user_id.to_string());
        Ok(())
    }

    async fn unlike_book(
        &self,
        book_id: BookId,
        user_id: &str,
    ) -> Result<bool, BookRepositoryError> {
        Ok(self
            .likes
            .write()
            .get_mut(&book_id)
            .map(|users| users.remove(user_id))
            .unwrap_or_default())
    }

    async fn liked_by(&self, book_id: BookId, user_id: &str) -> Result<bool, BookRepositoryError> {
        Ok(self
            .likes
            .read()
            .get(&book_id)
            .map(|users| users.contains(user_id))
            .unwrap_or_default())
    }

    async fn likes_count(&self, book_id: BookId) -> Result<i64, BookRepositoryError> {
        Ok(self
            .likes
            .read()
            .get(&book_id)
            .map(|users| users.len() as i64)
            .unwrap_or_default())
    }
}
