//! Repository traits for metadata operations.

pub mod files;
pub mod folders;
pub mod tokens;
pub mod uploads;
pub mod users;

pub use files::{FileRepo, Reclaim};
pub use folders::{CascadeCount, FolderRepo};
pub use tokens::TokenRepo;
pub use uploads::UploadRepo;
pub use users::UserRepo;
