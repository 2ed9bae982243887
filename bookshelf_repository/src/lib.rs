pub mod api;
pub mod books_repository;
pub mod library;
pub mod search;
