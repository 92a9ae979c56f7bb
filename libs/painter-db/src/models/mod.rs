pub mod account;
pub mod code;
pub mod generation;
pub mod ledger;

pub use account::{Account, Admission, NewAccount, Role};
pub use code::{Code, CodeKind, CodeStatus, NewCode, Redemption, normalize_code};
pub use generation::{Artifact, GENERATION_COST, Generation, GenerationStatus, NewGeneration};
pub use ledger::{CreditEntry, CreditReason, LedgerStats, apply_delta};

pub(crate) use ledger::EntryDraft;
