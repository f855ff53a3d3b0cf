use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetErrorCode {
    Authentication,
    NotAllowed,
    Workflow,
    NotFound,
    Internal,
    Validation,
    InvalidConfig,
    LockHeldByThread,
    Timeout,
    Index,
    Unavailable,
    WorkerPanicked,
    Io,
    Encode,
    Decode,
}

impl AssetErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetErrorCode::Authentication => "authentication",
            AssetErrorCode::NotAllowed => "not_allowed",
            AssetErrorCode::Workflow => "workflow",
            AssetErrorCode::NotFound => "not_found",
            AssetErrorCode::Internal => "internal",
            AssetErrorCode::Validation => "validation",
            AssetErrorCode::InvalidConfig => "invalid_config",
            AssetErrorCode::LockHeldByThread => "lock_held_by_thread",
            AssetErrorCode::Timeout => "timeout",
            AssetErrorCode::Index => "index",
            AssetErrorCode::Unavailable => "unavailable",
            AssetErrorCode::WorkerPanicked => "worker_panicked",
            AssetErrorCode::Io => "io",
            AssetErrorCode::Encode => "encode",
            AssetErrorCode::Decode => "decode",
        }
    }
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("authentication required: {0}")]
    Authentication(String),
    #[error("not allowed: {0}")]
    NotAllowed(String),
    #[error("workflow operation not allowed: {0}")]
    Workflow(String),
    #[error("{resource_kind} '{resource_id}' not found")]
    NotFound {
        resource_kind: String,
        resource_id: String,
    },
    /// Anything unexpected raised inside a unit-of-work body, panics included.
    #[error("internal error: {0}")]
    Internal(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("store lock already held by this thread ({held}); run the work on a dedicated thread")]
    LockHeldByThread { held: &'static str },
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("search index error: {message}")]
    Index { message: String },
    #[error("resource unavailable: {message}")]
    Unavailable { message: String },
    #[error("transaction thread panicked")]
    WorkerPanicked,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl AssetError {
    pub fn code(&self) -> AssetErrorCode {
        match self {
            AssetError::Authentication(_) => AssetErrorCode::Authentication,
            AssetError::NotAllowed(_) => AssetErrorCode::NotAllowed,
            AssetError::Workflow(_) => AssetErrorCode::Workflow,
            AssetError::NotFound { .. } => AssetErrorCode::NotFound,
            AssetError::Internal(_) => AssetErrorCode::Internal,
            AssetError::Validation(_) => AssetErrorCode::Validation,
            AssetError::InvalidConfig { .. } => AssetErrorCode::InvalidConfig,
            AssetError::LockHeldByThread { .. } => AssetErrorCode::LockHeldByThread,
            AssetError::Timeout(_) => AssetErrorCode::Timeout,
            AssetError::Index { .. } => AssetErrorCode::Index,
            AssetError::Unavailable { .. } => AssetErrorCode::Unavailable,
            AssetError::WorkerPanicked => AssetErrorCode::WorkerPanicked,
            AssetError::Io(_) => AssetErrorCode::Io,
            AssetError::Encode(_) => AssetErrorCode::Encode,
            AssetError::Decode(_) => AssetErrorCode::Decode,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn not_found(resource_kind: impl Into<String>, resource_id: impl Into<String>) -> Self {
        AssetError::NotFound {
            resource_kind: resource_kind.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn index(message: impl Into<String>) -> Self {
        AssetError::Index {
            message: message.into(),
        }
    }

    /// Errors that came from the user's side of a secure run: bad identity,
    /// missing rights or an illegal workflow transition.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AssetError::Authentication(_) | AssetError::NotAllowed(_) | AssetError::Workflow(_)
        )
    }
}

/// Render a caught panic payload as text for `AssetError::Internal`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit of work panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{AssetError, AssetErrorCode, panic_message};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(AssetErrorCode::NotAllowed.as_str(), "not_allowed");
        assert_eq!(
            AssetErrorCode::LockHeldByThread.as_str(),
            "lock_held_by_thread"
        );
        assert_eq!(AssetErrorCode::WorkerPanicked.as_str(), "worker_panicked");
    }

    #[test]
    fn error_code_str_matches_variant_mapping() {
        let err = AssetError::not_found("item", "asset://items/1");
        assert_eq!(err.code(), AssetErrorCode::NotFound);
        assert_eq!(err.code_str(), "not_found");
        assert_eq!(err.to_string(), "item 'asset://items/1' not found");
    }

    #[test]
    fn rejections_cover_authorization_and_workflow_only() {
        assert!(AssetError::NotAllowed("x".into()).is_rejection());
        assert!(AssetError::Workflow("x".into()).is_rejection());
        assert!(AssetError::Authentication("x".into()).is_rejection());
        assert!(!AssetError::Internal("x".into()).is_rejection());
        assert!(!AssetError::index("down").is_rejection());
    }

    #[test]
    fn panic_payloads_render_as_text() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unit of work panicked");
    }
}
