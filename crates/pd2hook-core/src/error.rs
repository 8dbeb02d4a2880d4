use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Signature pattern is empty")]
    EmptySignature,

    #[error("Mask length mismatch: signature has {signature} bytes, mask has {mask}")]
    MaskLengthMismatch { signature: usize, mask: usize },

    #[error("Signature search has already been performed")]
    SearchAlreadyPerformed,

    #[error("Module memory unavailable: {0}")]
    ModuleUnavailable(String),

    #[error("Function slot '{0}' is not resolved")]
    UnresolvedSlot(String),

    #[error("Event queue {queue} drained from a thread other than its consumer")]
    ForeignConsumer { queue: &'static str },

    #[error("Function slot '{0}' is already detoured")]
    SlotBusy(String),

    #[error("Failed to change protection at address {address:#x}: {message}")]
    ProtectFailed { address: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Check if this error comes from a malformed signature or mask
    pub fn is_signature_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidSignature(_) | Error::EmptySignature | Error::MaskLengthMismatch { .. }
        )
    }
}
