/*
[INPUT]:  Ledger node schema definitions and serde requirements
[OUTPUT]: Typed Rust structs/enums with serialization support
[POS]:    Data layer - type definitions for ledger node communication
[UPDATE]: When node schema changes or new types added
*/

pub mod enums;
pub mod models;

pub use enums::*;
pub use models::*;
