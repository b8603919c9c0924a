pub mod calendar;
pub mod prompt;
pub mod storage;
pub mod sync;
pub mod todo;

pub use calendar::{Event, EventRange};
pub use storage::Config;
pub use sync::{SyncEngine, SyncError, TodoSync};
pub use todo::{Category, Todo};
