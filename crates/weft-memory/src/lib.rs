pub mod store;
pub mod window;

pub use store::SqliteMemoryStore;
pub use window::{MemoryManager, MemoryWindow};
