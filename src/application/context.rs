//! Per-request caller identity.

/// Who is calling, passed explicitly into every user-scoped operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: i64,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, user_id: i64) -> Self {
        Self {
            request_id: request_id.into(),
            user_id,
        }
    }
}
