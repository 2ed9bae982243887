use std::sync::Arc;

use actix_web::web::Data;
use actix_web::{Error, HttpResponse};
use paperclip::actix::{api_v2_operation, web, Apiv2Schema};
use serde::Deserialize;

use bookshelf_repository::api::{
    BookId, BookSearchType, BookSummary, BooksCountResponse, LikeRequest, LikeStatus,
    LikeStatusResponse, LikesCountResponse,
};
use bookshelf_repository::books_repository::{BookRepository, BookRepositoryError};

use crate::auth::SessionUser;

pub const DEFAULT_PAGE_SIZE: i64 = 20;

#[api_v2_operation]
pub async fn health(books_repository: Data<Arc<dyn BookRepository>>) -> Result<HttpResponse, Error> {
    Ok(match books_repository.ping().await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(err) => {
            tracing::error!("Health check failed {}", err);
            HttpResponse::ServiceUnavailable().finish()
        }
    })
}

#[api_v2_operation]
pub async fn books_count(
    books_repository: Data<Arc<dyn BookRepository>>,
) -> Result<HttpResponse, Error> {
    Ok(match books_repository.get_book_count().await {
        Ok(books_count) => HttpResponse::Ok().json(BooksCountResponse { books_count }),
        Err(err) => {
            tracing::error!("Counting books failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[derive(Debug, Deserialize, Apiv2Schema)]
pub struct ListBooksQuery {
    /// Part of the author name
    pub start_with: Option<String>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[api_v2_operation]
/// Books by author, or a page of all books ordered by title when `offset` or `limit` is given
pub async fn list_books(
    books_repository: Data<Arc<dyn BookRepository>>,
    query: web::Query<ListBooksQuery>,
) -> Result<HttpResponse, Error> {
    let query = query.into_inner();
    let books = if query.offset.is_some() || query.limit.is_some() {
        books_repository
            .get_books_with_pagination(
                query.offset.unwrap_or_default(),
                query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            )
            .await
    } else {
        books_repository
            .search_books(
                query.start_with.as_deref().unwrap_or_default(),
                BookSearchType::ByAuthor,
            )
            .await
    };
    Ok(match books {
        Ok(books) => {
            HttpResponse::Ok().json(books.into_iter().map(BookSummary::from).collect::<Vec<_>>())
        }
        Err(err) => {
            tracing::error!("Listing books failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn check_like(
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
    book_id: web::Path<BookId>,
) -> Result<web::Json<LikeStatusResponse>, Error> {
    let status = match user.user_id() {
        None => LikeStatus::Unauthenticated,
        Some(user_id) => match books_repository.liked_by(book_id.into_inner(), user_id).await {
            Ok(true) => LikeStatus::Liked,
            Ok(false) => LikeStatus::NotLiked,
            Err(err) => {
                tracing::error!("Checking like failed {}", err);
                LikeStatus::Error
            }
        },
    };
    Ok(web::Json(LikeStatusResponse { status }))
}

#[derive(Debug, Deserialize, Apiv2Schema)]
pub struct LikesCountQuery {
    pub book_id: Option<String>,
}

#[api_v2_operation]
pub async fn likes_count(
    books_repository: Data<Arc<dyn BookRepository>>,
    query: web::Query<LikesCountQuery>,
) -> Result<HttpResponse, Error> {
    let Some(book_id) = query.book_id.as_deref() else {
        return Ok(HttpResponse::BadRequest().body("book_id is required"));
    };
    let Ok(book_id) = book_id.trim().parse::<BookId>() else {
        return Ok(HttpResponse::BadRequest().body("Invalid book_id"));
    };
    Ok(match books_repository.likes_count(book_id).await {
        Ok(count) => HttpResponse::Ok().json(LikesCountResponse { count }),
        Err(err) => {
            tracing::error!("Counting likes failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

#[api_v2_operation]
pub async fn like_book(
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
    request: web::Form<LikeRequest>,
) -> Result<HttpResponse, Error> {
    let Some(user_id) = user.user_id() else {
        return Ok(HttpResponse::Unauthorized().body("Unauthorized"));
    };
    Ok(
        match books_repository.like_book(request.book_id, user_id).await {
            Ok(()) => HttpResponse::Ok().body("Liked successfully"),
            Err(BookRepositoryError::NotFound(_)) => HttpResponse::NotFound().finish(),
            // session outlived the stored user
            Err(BookRepositoryError::UserNotFound(_)) => {
                HttpResponse::Unauthorized().body("Unauthorized")
            }
            Err(err) => {
                tracing::error!("Like failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}

#[api_v2_operation]
pub async fn unlike_book(
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
    request: web::Json<LikeRequest>,
) -> Result<HttpResponse, Error> {
    let Some(user_id) = user.user_id() else {
        return Ok(HttpResponse::Unauthorized().body("Unauthorized"));
    };
    Ok(
        match books_repository.unlike_book(request.book_id, user_id).await {
            Ok(_) => HttpResponse::Ok().body("Unliked successfully"),
            Err(err) => {
                tracing::error!("Unlike failed {}", err);
                HttpResponse::InternalServerError().finish()
            }
        },
    )
}
