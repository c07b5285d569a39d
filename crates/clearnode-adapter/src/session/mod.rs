/*
[INPUT]:  Wallet signer, deposit amounts, points earned
[OUTPUT]: Session manager and persisted application session records
[POS]:    Session layer - application session lifecycle
[UPDATE]: When session lifecycle operations change
*/

pub mod amount;
pub mod manager;
pub mod records;

pub use amount::{AMOUNT_SCALE, normalize_deposit};
pub use manager::SessionManager;
pub use records::SessionRecordStore;
