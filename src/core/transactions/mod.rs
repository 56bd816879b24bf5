// ─── File Transactions ───
// Batched copy / move / delete / download with aggregate progress.

pub mod entry;
pub mod scheduler;
pub mod tree;

pub use entry::{ExecContext, TransactionEntry, TransactionKind};
pub use scheduler::TransactionScheduler;
