pub mod admin;
pub mod auth;
mod responses;
pub mod router;
pub mod state;

pub use auth::AuthUser;
pub use responses::{
    ActionOutcome, ApiError, ApiMessage, bad_request, internal_error, json_error, not_found,
    required_field,
};
pub use state::AppState;
