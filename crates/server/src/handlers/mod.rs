//! HTTP request handlers.

pub mod admin;
pub mod auth;
pub mod common;
pub mod files;
pub mod folders;
pub mod health;
pub mod trash;
pub mod uploads;

pub use admin::*;
pub use auth::*;
pub use files::*;
pub use folders::*;
pub use health::*;
pub use trash::*;
pub use uploads::*;
