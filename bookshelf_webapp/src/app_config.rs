use paperclip::actix::web;

use crate::{handlers, pages};

/// JSON API, documented at `/apispec/v2`
pub fn config_api(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(handlers::health)))
        .service(
            web::scope("/api")
                .service(web::resource("/booksCount").route(web::get().to(handlers::books_count)))
                .service(web::resource("/books").route(web::get().to(handlers::list_books)))
                .service(
                    web::resource("/check_like/{book_id}")
                        .route(web::get().to(handlers::check_like)),
                )
                .service(web::resource("/likes_count").route(web::get().to(handlers::likes_count)))
                .service(
                    web::resource("/like")
                        .route(web::post().to(handlers::like_book))
                        .route(web::delete().to(handlers::unlike_book)),
                ),
        );
}

/// HTML pages, form posts and login flow
pub fn config_pages(cfg: &mut actix_web::web::ServiceConfig) {
    use actix_web::web;

    cfg.route("/", web::get().to(pages::index))
        .route("/about", web::get().to(pages::about))
        .route("/contact", web::get().to(pages::contact))
        .route("/error", web::get().to(pages::error))
        .route("/allbooks", web::get().to(pages::all_books))
        .route("/books_by_author", web::get().to(pages::books_by_author))
        .route("/search_books", web::get().to(pages::search_books))
        .route("/book_info", web::get().to(pages::book_info))
        .route("/addbook", web::post().to(pages::add_book))
        .route("/modify", web::post().to(pages::modify_book))
        .route("/removeimage", web::post().to(pages::remove_image))
        .route("/login", web::get().to(pages::login))
        .route("/auth/callback", web::get().to(pages::auth_callback))
        .route("/logout", web::get().to(pages::logout))
        .service(
            web::scope("/admin")
                .route("/add", web::get().to(pages::admin_add))
                .route("/modify", web::get().to(pages::admin_modify))
                .route("/initdb", web::get().to(pages::init_db)),
        );
}
