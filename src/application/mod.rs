//! Application services: cached reads, the comment write path, content
//! mutations and runtime settings.

pub mod comments;
pub mod content;
pub mod error;
pub mod publishing;
pub mod repos;
pub mod settings;
