use anyhow::Context as _;
use chrono::Datelike;
use tera::{Context, Tera};

const TEMPLATES: [(&str, &str); 11] = [
    ("base.html", include_str!("../templates/base.html")),
    ("index.html", include_str!("../templates/index.html")),
    ("about.html", include_str!("../templates/about.html")),
    ("contact.html", include_str!("../templates/contact.html")),
    ("error.html", include_str!("../templates/error.html")),
    ("all_books.html", include_str!("../templates/all_books.html")),
    (
        "books_by_author.html",
        include_str!("../templates/books_by_author.html"),
    ),
    ("search.html", include_str!("../templates/search.html")),
    ("book_info.html", include_str!("../templates/book_info.html")),
    ("add_book.html", include_str!("../templates/add_book.html")),
    ("modify_book.html", include_str!("../templates/modify_book.html")),
];

/// HTML templates compiled into the binary
pub struct Templates {
    tera: Tera,
}

impl Templates {
    pub fn new() -> anyhow::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES)
            .context("Failed to parse templates")?;
        Ok(Self { tera })
    }

    pub fn render(&self, name: &str, context: &Context) -> Result<String, tera::Error> {
        self.tera.render(name, context)
    }
}

/// Variables every page layout expects
pub fn page_context(site_key: &str, logged_in: bool, is_admin: bool) -> Context {
    let mut context = Context::new();
    context.insert("year", &chrono::Local::now().year());
    context.insert("site_key", site_key);
    context.insert("logged_in", &logged_in);
    context.insert("is_admin", &is_admin);
    context
}
