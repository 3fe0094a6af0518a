pub mod builtin;
pub mod catalog;
pub mod records;
pub mod wrapper;

pub use builtin::register_builtins;
pub use catalog::ToolCatalog;
pub use records::RecordStore;
pub use wrapper::{IdentityWrapper, InvocationOutcome};
