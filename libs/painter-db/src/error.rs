use thiserror::Error;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Code not found")]
    CodeNotFound,

    #[error("Code has already been used")]
    CodeAlreadyUsed,

    #[error("Code has expired")]
    CodeExpired,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Account is deactivated")]
    AccountInactive,

    #[error("Username already exists")]
    UsernameTaken,

    #[error("Insufficient credit: balance is {balance}, {required} required")]
    InsufficientCredit { balance: i32, required: i32 },

    #[error("Generation {0} not found")]
    GenerationNotFound(i64),

    #[error("Generation {0} is already finalized")]
    GenerationFinalized(i64),

    #[error("A valid invite code is required to register")]
    InviteRequired,

    #[error("Code {0} already exists")]
    CodeTaken(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid stored value: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// Stable machine-readable name, used in API error bodies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::CodeNotFound => "code_not_found",
            LedgerError::CodeAlreadyUsed => "code_already_used",
            LedgerError::CodeExpired => "code_expired",
            LedgerError::AccountNotFound => "account_not_found",
            LedgerError::AccountInactive => "account_inactive",
            LedgerError::UsernameTaken => "username_taken",
            LedgerError::InsufficientCredit { .. } => "insufficient_credit",
            LedgerError::GenerationNotFound(_) => "generation_not_found",
            LedgerError::GenerationFinalized(_) => "generation_finalized",
            LedgerError::InviteRequired => "invite_required",
            LedgerError::CodeTaken(_) => "code_taken",
            LedgerError::InvalidRequest(_) => "invalid_request",
            LedgerError::Decode(_) => "decode",
            LedgerError::Database(_) => "database",
        }
    }

    pub(crate) fn balance_overflow() -> Self {
        LedgerError::InvalidRequest(format!("balance would exceed {}", i32::MAX))
    }

    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}
