use hyper::Request;

use crate::history::UserId;

/// Header carrying the caller's id, issued by the external identity service.
pub const USER_ID_HEADER: &str = "user-id";

/// Extracts the caller identity. The id is opaque here and is not checked
/// against any user table.
pub fn user_id<B>(req: &Request<B>) -> Option<UserId> {
    req.headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::new)
}
