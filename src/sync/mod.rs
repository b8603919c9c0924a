pub mod mutation;
pub mod offline_store;
pub mod remote;
pub mod rest_store;
pub mod sync_engine;
pub mod todo_sync;

pub use mutation::{MutationKind, MutationState};
pub use remote::{RemoteError, RemoteStore};
pub use sync_engine::{SelectionOptions, SyncEngine, SyncError};
pub use todo_sync::{TodoError, TodoSync};
