use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::http::header::{ContentType, LOCATION};
use actix_web::http::StatusCode;
use actix_web::web::{Data, Form, Query};
use actix_web::{HttpRequest, HttpResponse};
use itertools::Itertools;
use serde::Deserialize;
use serde_json::json;
use tera::Context;

use bookshelf_repository::api::{Book, BookId, BookSearchType, ImageId, UnknownSearchType};
use bookshelf_repository::books_repository::{BookRepository, BookRepositoryError};
use bookshelf_repository::library::Library;

use crate::auth::{
    new_oauth_state, removal_cookie, OAuthClient, SessionKey, SessionUser, OAUTH_STATE_COOKIE,
    SESSION_COOKIE,
};
use crate::captcha::CaptchaVerifier;
use crate::forms::BookForm;
use crate::settings::LibrarySettings;
use crate::templates::{page_context, Templates};

/// Everything the HTML pages need besides the repository
pub struct Site {
    pub templates: Templates,
    pub site_key: String,
    pub admin_user_id: String,
    pub library: LibrarySettings,
}

impl Site {
    pub fn context(&self, user: &SessionUser) -> Context {
        page_context(&self.site_key, user.is_logged_in(), self.is_admin(user))
    }

    pub fn is_admin(&self, user: &SessionUser) -> bool {
        user.user_id() == Some(self.admin_user_id.as_str())
    }

    fn render(&self, name: &str, context: &Context) -> HttpResponse {
        self.render_with_status(StatusCode::OK, name, context)
    }

    fn render_with_status(&self, status: StatusCode, name: &str, context: &Context) -> HttpResponse {
        match self.templates.render(name, context) {
            Ok(html) => HttpResponse::build(status)
                .content_type(ContentType::html())
                .body(html),
            Err(err) => {
                tracing::error!("Rendering {} failed {:?}", name, err);
                HttpResponse::InternalServerError().body("Internal server error")
            }
        }
    }

    pub fn error_page(&self, user: &SessionUser, status: StatusCode, message: &str) -> HttpResponse {
        let mut context = self.context(user);
        context.insert("status", &status.as_u16());
        context.insert("message", message);
        self.render_with_status(status, "error.html", &context)
    }

    fn forbidden(&self, user: &SessionUser) -> HttpResponse {
        self.error_page(user, StatusCode::FORBIDDEN, "Only the administrator can do that")
    }

    fn repository_failure(&self, user: &SessionUser, err: BookRepositoryError) -> HttpResponse {
        match err {
            BookRepositoryError::NotFound(book_id) => self.error_page(
                user,
                StatusCode::NOT_FOUND,
                &format!("Book {} does not exist", book_id),
            ),
            BookRepositoryError::ImageNotFound(image_id) => self.error_page(
                user,
                StatusCode::NOT_FOUND,
                &format!("Image {} does not exist", image_id),
            ),
            BookRepositoryError::EmailInUse(email) => self.error_page(
                user,
                StatusCode::CONFLICT,
                &format!("{} is already linked to another account", email),
            ),
            err => {
                tracing::error!("Repository operation failed {}", err);
                self.error_page(
                    user,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The catalogue is not available right now",
                )
            }
        }
    }
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((LOCATION, location))
        .finish()
}

fn search_type_name(search_type: BookSearchType) -> &'static str {
    match search_type {
        BookSearchType::ByTitle => "byTitle",
        BookSearchType::ByAuthor => "byAuthor",
    }
}

/// Parses comma separated search types, dropping repeats. Defaults to title search.
pub fn parse_search_types<'a>(
    values: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<BookSearchType>, UnknownSearchType> {
    let mut search_types: Vec<BookSearchType> = values
        .into_iter()
        .flat_map(|value| value.split(','))
        .filter(|value| !value.trim().is_empty())
        .map(str::parse::<BookSearchType>)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .unique()
        .collect();
    if search_types.is_empty() {
        search_types.push(BookSearchType::ByTitle);
    }
    Ok(search_types)
}

fn parse_book_id(value: Option<&str>) -> Option<BookId> {
    value.and_then(|value| value.trim().parse().ok())
}

pub async fn index(site: Data<Site>, user: SessionUser) -> HttpResponse {
    site.render("index.html", &site.context(&user))
}

pub async fn about(site: Data<Site>, user: SessionUser) -> HttpResponse {
    site.render("about.html", &site.context(&user))
}

pub async fn contact(site: Data<Site>, user: SessionUser) -> HttpResponse {
    site.render("contact.html", &site.context(&user))
}

pub async fn error(site: Data<Site>, user: SessionUser) -> HttpResponse {
    site.error_page(
        &user,
        StatusCode::INTERNAL_SERVER_ERROR,
        "Something went wrong",
    )
}

pub async fn all_books(
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
) -> HttpResponse {
    match books_repository.list_books().await {
        Ok(books) => {
            let mut context = site.context(&user);
            context.insert("books", &books);
            site.render("all_books.html", &context)
        }
        Err(err) => site.repository_failure(&user, err),
    }
}

pub async fn books_by_author(
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
) -> HttpResponse {
    match books_repository.get_all_authors().await {
        Ok(authors) => {
            let mut context = site.context(&user);
            context.insert("authors", &authors);
            site.render("books_by_author.html", &context)
        }
        Err(err) => site.repository_failure(&user, err),
    }
}

pub async fn search_books(
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
    query: Query<Vec<(String, String)>>,
) -> HttpResponse {
    let text = query
        .iter()
        .find(|(key, _)| key == "textSearch")
        .map(|(_, value)| value.trim())
        .unwrap_or_default();
    let search_types = query
        .iter()
        .filter(|(key, _)| key == "searchType")
        .map(|(_, value)| value.as_str());
    let search_types = match parse_search_types(search_types) {
        Ok(search_types) => search_types,
        Err(err) => return site.error_page(&user, StatusCode::BAD_REQUEST, &err.to_string()),
    };

    let mut books: Vec<Book> = vec![];
    for &search_type in &search_types {
        match books_repository.search_books(text, search_type).await {
            Ok(found) => books.extend(found),
            Err(err) => return site.repository_failure(&user, err),
        }
    }
    let books: Vec<Book> = books.into_iter().unique_by(|book| book.book_id).collect();

    let mut context = site.context(&user);
    context.insert("books", &books);
    context.insert("search_text", text);
    context.insert(
        "search_types",
        &search_types
            .iter()
            .map(|&search_type| search_type_name(search_type))
            .collect::<Vec<_>>(),
    );
    site.render("search.html", &context)
}

#[derive(Debug, Deserialize)]
pub struct BookInfoQuery {
    pub id: Option<String>,
}

pub async fn book_info(
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
    query: Query<BookInfoQuery>,
) -> HttpResponse {
    let Some(book_id) = parse_book_id(query.id.as_deref()) else {
        return redirect("/error");
    };
    let book = match books_repository.get_book(book_id).await {
        Ok(book) => book,
        Err(err) => return site.repository_failure(&user, err),
    };
    let likes_count = match books_repository.likes_count(book_id).await {
        Ok(count) => count,
        Err(err) => return site.repository_failure(&user, err),
    };

    let mut context = site.context(&user);
    context.insert("book", &book);
    context.insert("likes_count", &likes_count);
    site.render("book_info.html", &context)
}

pub async fn admin_add(site: Data<Site>, user: SessionUser) -> HttpResponse {
    if !site.is_admin(&user) {
        return site.forbidden(&user);
    }
    site.render("add_book.html", &site.context(&user))
}

#[derive(Debug, Deserialize)]
pub struct ModifyQuery {
    pub book_id: Option<String>,
}

pub async fn admin_modify(
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
    query: Query<ModifyQuery>,
) -> HttpResponse {
    if !site.is_admin(&user) {
        return site.forbidden(&user);
    }
    let Some(book_id) = parse_book_id(query.book_id.as_deref()) else {
        return site.error_page(&user, StatusCode::BAD_REQUEST, "Invalid book id");
    };
    match books_repository.get_book(book_id).await {
        Ok(book) => {
            let mut context = site.context(&user);
            context.insert("book", &book);
            site.render("modify_book.html", &context)
        }
        Err(err) => site.repository_failure(&user, err),
    }
}

/// Parses the posted book form and checks its captcha, on failure returns the page to show
async fn read_book_form(
    request: &HttpRequest,
    site: &Site,
    captcha: &dyn CaptchaVerifier,
    user: &SessionUser,
    payload: Multipart,
) -> Result<BookForm, HttpResponse> {
    let form = BookForm::from_multipart(payload).await.map_err(|err| {
        tracing::warn!("Rejected book form {}", err);
        site.error_page(user, StatusCode::BAD_REQUEST, &err.to_string())
    })?;

    let remote_ip = request.peer_addr().map(|address| address.ip().to_string());
    match captcha
        .verify(&form.captcha_token, remote_ip.as_deref())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            return Err(site.error_page(
                user,
                StatusCode::BAD_REQUEST,
                "Captcha verification failed",
            ))
        }
        Err(err) => {
            tracing::error!("Captcha verification failed {}", err);
            return Err(site.error_page(
                user,
                StatusCode::BAD_GATEWAY,
                "Captcha could not be verified",
            ));
        }
    }

    form.validate()
        .map_err(|message| site.error_page(user, StatusCode::BAD_REQUEST, message))?;
    Ok(form)
}

pub async fn add_book(
    request: HttpRequest,
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    captcha: Data<Arc<dyn CaptchaVerifier>>,
    user: SessionUser,
    payload: Multipart,
) -> HttpResponse {
    if !site.is_admin(&user) {
        return site.forbidden(&user);
    }
    let form = match read_book_form(&request, &site, captcha.get_ref().as_ref(), &user, payload).await
    {
        Ok(form) => form,
        Err(response) => return response,
    };
    match books_repository.create_book(form.details, form.image).await {
        Ok(book_id) => {
            tracing::info!("Added book {}", book_id);
            redirect(&format!("/book_info?id={}", book_id))
        }
        Err(err) => site.repository_failure(&user, err),
    }
}

pub async fn modify_book(
    request: HttpRequest,
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    captcha: Data<Arc<dyn CaptchaVerifier>>,
    user: SessionUser,
    payload: Multipart,
) -> HttpResponse {
    if !site.is_admin(&user) {
        return site.forbidden(&user);
    }
    let form = match read_book_form(&request, &site, captcha.get_ref().as_ref(), &user, payload).await
    {
        Ok(form) => form,
        Err(response) => return response,
    };
    let Some(book_id) = parse_book_id(form.book_id.as_deref()) else {
        return site.error_page(&user, StatusCode::BAD_REQUEST, "Invalid book id");
    };

    match books_repository
        .update_book(book_id, form.details.into())
        .await
    {
        Ok(true) => {}
        Ok(false) => return site.repository_failure(&user, BookRepositoryError::NotFound(book_id)),
        Err(err) => return site.repository_failure(&user, err),
    }
    if let Some(image) = form.image {
        if let Err(err) = books_repository.add_image_to_book(book_id, image).await {
            return site.repository_failure(&user, err);
        }
    }
    tracing::info!("Modified book {}", book_id);
    redirect(&format!("/book_info?id={}", book_id))
}

#[derive(Debug, Deserialize)]
pub struct RemoveImageForm {
    pub image_id: ImageId,
    pub book_id: Option<BookId>,
}

pub async fn remove_image(
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
    form: Form<RemoveImageForm>,
) -> HttpResponse {
    if !site.is_admin(&user) {
        return site.forbidden(&user);
    }
    match books_repository.remove_image(form.image_id).await {
        Ok(true) => match form.book_id {
            Some(book_id) => redirect(&format!("/admin/modify?book_id={}", book_id)),
            None => redirect("/allbooks"),
        },
        Ok(false) => {
            site.repository_failure(&user, BookRepositoryError::ImageNotFound(form.image_id))
        }
        Err(err) => site.repository_failure(&user, err),
    }
}

pub async fn init_db(
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    user: SessionUser,
) -> HttpResponse {
    if !site.is_admin(&user) {
        return site.forbidden(&user);
    }
    let seed_books = Library::from_file(&site.library.path)
        .and_then(|library| library.into_seed_books(&site.library.images_dir));
    let seed_books = match seed_books {
        Ok(seed_books) => seed_books,
        Err(err) => {
            tracing::error!("Loading library failed {}", err);
            return HttpResponse::InternalServerError().json(json!({"status": "error"}));
        }
    };
    match books_repository.seed_books(seed_books).await {
        Ok(inserted) => {
            tracing::info!("Seeded {} books from {}", inserted, site.library.path);
            HttpResponse::Ok().json(json!({"status": "OK", "inserted": inserted}))
        }
        Err(err) => {
            tracing::error!("Seeding failed {}", err);
            HttpResponse::InternalServerError().json(json!({"status": "error"}))
        }
    }
}

pub async fn login(
    site: Data<Site>,
    session_key: Data<SessionKey>,
    oauth: Data<OAuthClient>,
    user: SessionUser,
) -> HttpResponse {
    let state = new_oauth_state();
    match oauth.authorize_url(&state) {
        Ok(url) => HttpResponse::Found()
            .cookie(session_key.signed_cookie(OAUTH_STATE_COOKIE, state))
            .append_header((LOCATION, url))
            .finish(),
        Err(err) => {
            tracing::error!("Login failed {:?}", err);
            site.error_page(&user, StatusCode::INTERNAL_SERVER_ERROR, "Login is not available")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub async fn auth_callback(
    request: HttpRequest,
    site: Data<Site>,
    books_repository: Data<Arc<dyn BookRepository>>,
    session_key: Data<SessionKey>,
    oauth: Data<OAuthClient>,
    user: SessionUser,
    query: Query<CallbackQuery>,
) -> HttpResponse {
    if let Some(error) = &query.error {
        tracing::warn!(
            "Identity provider refused login {} {}",
            error,
            query.error_description.as_deref().unwrap_or_default()
        );
        return site.error_page(&user, StatusCode::UNAUTHORIZED, "Login was cancelled");
    }
    let expected_state = session_key.verified_value(&request, OAUTH_STATE_COOKIE);
    if expected_state.is_none() || expected_state != query.state {
        return site.error_page(&user, StatusCode::BAD_REQUEST, "Invalid login state");
    }
    let Some(code) = query.code.as_deref() else {
        return site.error_page(&user, StatusCode::BAD_REQUEST, "Missing authorization code");
    };

    let user_details = match oauth.authenticate(code).await {
        Ok(user_details) => user_details,
        Err(err) => {
            tracing::error!("Exchanging authorization code failed {}", err);
            return site.error_page(&user, StatusCode::BAD_GATEWAY, "Login failed");
        }
    };
    let user_id = user_details.user_id.clone();
    if let Err(err) = books_repository.add_user(user_details).await {
        return site.repository_failure(&user, err);
    }
    tracing::info!("User {} logged in", user_id);

    HttpResponse::SeeOther()
        .cookie(session_key.session_cookie(&user_id))
        .cookie(removal_cookie(OAUTH_STATE_COOKIE))
        .append_header((LOCATION, "/"))
        .finish()
}

pub async fn logout() -> HttpResponse {
    HttpResponse::SeeOther()
        .cookie(removal_cookie(SESSION_COOKIE))
        .append_header((LOCATION, "/"))
        .finish()
}

#[cfg(test)]
mod pages_tests {
    use super::*;

    #[test]
    fn search_types_are_deduplicated_in_order() {
        assert_eq!(
            parse_search_types(["byAuthor,byTitle", "byauthor"]),
            Ok(vec![BookSearchType::ByAuthor, BookSearchType::ByTitle])
        );
    }

    #[test]
    fn search_defaults_to_title() {
        assert_eq!(parse_search_types([]), Ok(vec![BookSearchType::ByTitle]));
        assert_eq!(parse_search_types([" , "]), Ok(vec![BookSearchType::ByTitle]));
    }

    #[test]
    fn unknown_search_type_is_an_error() {
        assert_eq!(
            parse_search_types(["byTitle,byYear"]),
            Err(UnknownSearchType("byYear".to_string()))
        );
    }

    #[test]
    fn email_conflict_is_reported_as_conflict() {
        let site = Site {
            templates: Templates::new().unwrap(),
            site_key: "site-key".to_string(),
            admin_user_id: "auth0|admin".to_string(),
            library: LibrarySettings {
                path: "library/books_db.toml".to_string(),
                images_dir: "images".to_string(),
                seed_on_startup: None,
            },
        };
        let response = site.repository_failure(
            &SessionUser(None),
            BookRepositoryError::EmailInUse("reader@example.com".to_string()),
        );
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn book_ids_are_parsed_leniently() {
        assert_eq!(parse_book_id(Some(" 12 ")), Some(12));
        assert_eq!(parse_book_id(Some("twelve")), None);
        assert_eq!(parse_book_id(None), None);
    }
}
