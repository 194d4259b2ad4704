//! Todo module - the task list and its synchronization with the remote store.
//!
//! Every write is followed by a full re-fetch of the filtered list; the local
//! list is only ever replaced by a successful fetch, never patched.

mod store;
mod types;

pub use store::{TodoError, TodoSnapshot, TodoStore};
pub use types::{
    Category, CategoryFilter, NewTodo, Priority, Suggestion, Todo, TodoInsert, TodoPatch,
};
