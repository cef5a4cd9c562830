// crates/storage-lock-core/src/model/mod.rs
// ============================================================================
// Module: Storage Lock Model
// Description: Value types shared by lock stores and connection managers.
// Purpose: Group lock rows, table names, connection sources, and op contexts.
// Dependencies: crate::model::{context, dsn, lock, table}
// ============================================================================

//! ## Overview
//! Model types carry no database state of their own. They are validated at
//! construction so that stores can trust them when rendering statements.

pub mod context;
pub mod dsn;
pub mod lock;
pub mod table;

pub use context::CancelToken;
pub use context::OpContext;
pub use dsn::ConnectionFields;
pub use dsn::ConnectionSource;
pub use lock::LockInformation;
pub use lock::LockRecord;
pub use lock::Version;
pub use table::DEFAULT_TABLE_NAME;
pub use table::TableName;
