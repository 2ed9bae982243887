use actix_multipart::{Multipart, MultipartError};
use futures_util::TryStreamExt;

use bookshelf_repository::api::BookDetails;

use crate::captcha::CAPTCHA_FORM_FIELD;

pub const MAX_FIELD_SIZE: usize = 10 << 20;

#[derive(thiserror::Error, Debug)]
pub enum FormError {
    #[error("Invalid multipart payload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Field {0} is larger than {MAX_FIELD_SIZE} bytes")]
    TooLarge(String),
    #[error("Field {0} is not valid UTF-8")]
    NotUtf8(String),
}

/// Fields of the add and modify book forms
#[derive(Debug, Default)]
pub struct BookForm {
    pub book_id: Option<String>,
    pub details: BookDetails,
    pub image: Option<Vec<u8>>,
    pub captcha_token: String,
}

impl BookForm {
    pub async fn from_multipart(mut payload: Multipart) -> Result<Self, FormError> {
        let mut form = BookForm::default();
        while let Some(mut field) = payload.try_next().await? {
            let name = field
                .content_disposition()
                .get_name()
                .unwrap_or_default()
                .to_string();
            let mut data = Vec::new();
            while let Some(chunk) = field.try_next().await? {
                if data.len() + chunk.len() > MAX_FIELD_SIZE {
                    return Err(FormError::TooLarge(name));
                }
                data.extend_from_slice(&chunk);
            }

            if name == "image" {
                if !data.is_empty() {
                    form.image = Some(data);
                }
                continue;
            }

            let value = String::from_utf8(data).map_err(|_| FormError::NotUtf8(name.clone()))?;
            form.set_text_field(&name, value);
        }
        Ok(form)
    }

    fn set_text_field(&mut self, name: &str, value: String) {
        match name {
            "book_id" => self.book_id = Some(value.trim().to_string()),
            "title" => self.details.title = value.trim().to_string(),
            "author" => self.details.author = value.trim().to_string(),
            "description" => self.details.description = value,
            "read" => self.details.has_been_read = value == "on",
            "goodreadsLink" => self.details.goodreads_link = value.trim().to_string(),
            CAPTCHA_FORM_FIELD => self.captcha_token = value,
            _ => tracing::debug!("Ignoring form field {}", name),
        }
    }

    /// Title and author are mandatory
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.details.title.is_empty() {
            return Err("Title is required");
        }
        if self.details.author.is_empty() {
            return Err("Author is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod forms_tests {
    use super::*;

    #[test]
    fn text_fields_are_mapped_to_details() {
        let mut form = BookForm::default();
        form.set_text_field("title", " Rayuela ".to_string());
        form.set_text_field("author", "Julio Cortázar".to_string());
        form.set_text_field("read", "on".to_string());
        form.set_text_field("goodreadsLink", "https://www.goodreads.com/book/show/53413".to_string());
        form.set_text_field(CAPTCHA_FORM_FIELD, "token".to_string());
        form.set_text_field("unexpected", "ignored".to_string());

        assert_eq!(form.details.title, "Rayuela");
        assert!(form.details.has_been_read);
        assert_eq!(form.captcha_token, "token");
        assert!(form.validate().is_ok());
    }

    #[test]
    fn unchecked_read_box_means_not_read() {
        let mut form = BookForm::default();
        form.set_text_field("read", "off".to_string());
        assert!(!form.details.has_been_read);
        assert_eq!(form.validate(), Err("Title is required"));

        form.set_text_field("title", "Ficciones".to_string());
        assert_eq!(form.validate(), Err("Author is required"));
    }
}
