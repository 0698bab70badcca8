pub mod clock;
pub mod error;
pub mod field;
pub mod ids;
pub mod protocol;
pub mod transaction;

pub use clock::LogicalClock;
pub use error::CoreError;
pub use field::{FieldChange, FieldKind, FieldPatch, FieldSchema, FieldState, FieldUpdate};
pub use ids::*;
pub use protocol::{Message, MessageBody};
pub use transaction::{DatastoreChange, DatastorePatch, Transaction};
