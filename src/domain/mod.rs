//! Domain layer: keep model, signer material and recovery protocol rules.

pub mod keep;
pub mod recovery;
pub mod signer;

pub use keep::{GroupParameters, KeepState};
pub use recovery::{AnnouncementSet, RecoveryAnnouncement};
pub use signer::KeepSigner;
