//! rollcall-core — attendance verification domain logic.
//!
//! Pure types and algorithms shared by both verification channels:
//! descriptor matching, confidence classification, the QR session state
//! machine, and the storage contract behind the attendance ledger.

pub mod classify;
pub mod error;
pub mod extractor;
pub mod matching;
pub mod session;
pub mod store;
pub mod types;

pub use error::VerificationError;
pub use matching::{BestSampleMatcher, GalleryEntry, MatchOutcome, Matcher};
pub use session::{Session, SessionState, TokenDecoder, TokenPayload};
pub use store::{AttendanceStore, RecordOutcome};
pub use types::{AttendanceEvent, AttendanceStatus, Descriptor, Identity, VerificationMethod};
