pub mod checksum;
pub mod codec;
pub mod command;
pub mod cron;
pub mod dump;
pub mod ledger;
pub mod slots;
pub mod storage;

// Trait-based abstractions for testability
pub mod executor;

// Re-export commonly used types and traits (used by test crate)
pub use dump::{CommandDumpExecutor, DumpExecutor, DumpOptions, LoadOptions};
pub use executor::{CommandExecutor, RealExecutor};
pub use ledger::{JobRepository, JsonFileLedger, MemoryLedger};
pub use storage::{StorageAdapter, StorageDriver};
