pub mod error;
pub mod file_service;
pub mod password;
pub mod slug_service;
pub mod sweeper;

pub use error::FileError;
pub use file_service::{FileService, Lookup, ResolvedFile, UpdateRequest, UploadRequest};
pub use password::PasswordHasher;
pub use slug_service::SlugCharset;
