mod error;
mod expand;
mod extract;
mod handlers;
mod helpers;
mod router;
mod types;

pub use error::{ApiError, ApiResult};
pub use router::app;
pub use types::AppState;
