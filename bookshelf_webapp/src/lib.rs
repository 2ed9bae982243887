pub mod settings;

#[cfg(any(feature = "client", test))]
pub mod client;

#[cfg(any(feature = "server", test))]
pub mod app_config;
#[cfg(any(feature = "server", test))]
pub mod auth;
#[cfg(any(feature = "server", test))]
pub mod captcha;
#[cfg(any(feature = "server", test))]
mod forms;
#[cfg(any(feature = "server", test))]
mod handlers;
#[cfg(any(feature = "server", test))]
pub mod pages;
#[cfg(any(feature = "server", test))]
pub mod startup;
#[cfg(any(feature = "server", test))]
pub mod templates;
