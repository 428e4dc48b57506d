mod app_state;
mod articles;
mod response_cache;
mod schema;
mod types;

pub use articles::KeysetPosition;
pub use schema::Database;
pub use types::{
    ArticleDocumentRow, CacheStats, DatabaseError, IngestDocument, StoredResponse,
};
