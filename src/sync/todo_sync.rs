use std::cell::RefCell;

use serde_json::{json, Value};
use thiserror::Error;

use crate::prompt::Prompter;
use crate::storage::cache::{CacheEntry, CacheError, PendingUpdate, TodoCache};
use crate::sync::mutation::{MutationKind, MutationLog};
use crate::sync::remote::{Filter, OrderBy, Record, RemoteError, RemoteStore};
use crate::todo::{self, Category, StoredTodo, Todo};

#[derive(Debug, Error)]
pub enum TodoError {
    #[error("Could not save change: {0}")]
    RemoteWrite(String),
    #[error("Could not load todos: {0}")]
    RemoteRead(String),
    #[error("No todo with id {0}")]
    UnknownTodo(String),
    #[error("{0} is still being saved, try again in a moment")]
    NotYetSaved(String),
    #[error("A todo needs a title")]
    EmptyTitle,
}

impl From<CacheError> for TodoError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::UnknownEntry(id) => TodoError::UnknownTodo(id),
        }
    }
}

/// Shared todo lists, kept in the same optimistic style as calendar events.
pub struct TodoSync<S: RemoteStore> {
    store: S,
    table: String,
    owner_id: String,
    prompter: Box<dyn Prompter>,
    cache: RefCell<TodoCache>,
    mutations: MutationLog,
}

impl<S: RemoteStore> TodoSync<S> {
    pub fn new(
        store: S,
        table: impl Into<String>,
        owner_id: impl Into<String>,
        prompter: Box<dyn Prompter>,
    ) -> Self {
        Self {
            store,
            table: table.into(),
            owner_id: owner_id.into(),
            prompter,
            cache: RefCell::new(TodoCache::new()),
            mutations: MutationLog::default(),
        }
    }

    pub fn todos(&self) -> Vec<Todo> {
        self.cache.borrow().entries().to_vec()
    }

    pub fn todo(&self, id: &str) -> Option<Todo> {
        self.cache.borrow().get(id).cloned()
    }

    pub fn in_category(&self, category: Category) -> Vec<Todo> {
        self.cache
            .borrow()
            .iter()
            .filter(|todo| todo.category == category)
            .cloned()
            .collect()
    }

    pub fn category_stats(&self, category: Category) -> (usize, usize) {
        todo::category_stats(self.cache.borrow().iter(), category)
    }

    pub fn in_flight(&self) -> usize {
        self.mutations.in_flight()
    }

    pub async fn load(&self) -> Result<usize, TodoError> {
        let order = OrderBy::asc("category")
            .then_asc("sort_order")
            .then_desc("created_at");
        let records = self
            .store
            .select(&self.table, &Filter::all(), &order)
            .await
            .map_err(|err| self.report(TodoError::RemoteRead(err.message)))?;

        let todos: Vec<Todo> = records
            .into_iter()
            .filter_map(|record| match StoredTodo::from_record(record) {
                Ok(stored) => Some(Todo::from(stored)),
                Err(err) => {
                    tracing::warn!("Skipping todo: {}", err);
                    None
                }
            })
            .collect();

        let count = todos.len();
        self.cache.borrow_mut().load(todos);
        tracing::info!("Loaded {} todos", count);
        Ok(count)
    }

    /// Appends a todo at the end of its category.
    pub async fn add(&self, category: Category, title: &str) -> Result<Todo, TodoError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(self.report(TodoError::EmptyTitle));
        }

        let sort_order = self
            .cache
            .borrow()
            .iter()
            .filter(|todo| todo.category == category)
            .map(|todo| todo.sort_order + 1)
            .max()
            .unwrap_or(0);
        let draft = Todo::draft(title, category, self.owner_id.clone(), sort_order);
        let record = draft.to_insert_record();

        let mutation = self.mutations.begin(MutationKind::Create, title);
        let handle = self.cache.borrow_mut().insert_optimistic(draft.clone());

        let outcome = self
            .store
            .insert(&self.table, record)
            .await
            .and_then(|row| confirmed_todo(row, &draft));

        let reconciled = self.cache.borrow_mut().reconcile_insert(handle, outcome);
        self.mutations.finish(mutation, reconciled.is_ok());
        reconciled.map_err(|err| self.report(TodoError::RemoteWrite(err.message)))
    }

    /// Flips the completed flag and returns the new value.
    pub async fn toggle(&self, id: &str) -> Result<bool, TodoError> {
        let current = self.saved_todo(id)?;
        let completed = !current.completed;

        let mutation = self.mutations.begin(MutationKind::Update, id);
        let handle = self
            .cache
            .borrow_mut()
            .update_optimistic(id, |todo| todo.completed = completed)?;

        let outcome = self
            .store
            .update(&self.table, id, single_column("completed", Value::Bool(completed)))
            .await;

        let reconciled = self.cache.borrow_mut().reconcile_update(handle, outcome);
        self.mutations.finish(mutation, reconciled.is_ok());
        reconciled
            .map(|()| completed)
            .map_err(|err| self.report(TodoError::RemoteWrite(err.message)))
    }

    /// Deletes after confirmation. Returns whether the todo was deleted.
    pub async fn delete(&self, id: &str) -> Result<bool, TodoError> {
        let current = self.saved_todo(id)?;
        if !self.prompter.ask_confirmation(&format!("Delete \"{}\"?", current.title)) {
            return Ok(false);
        }

        let mutation = self.mutations.begin(MutationKind::Delete, id);
        let handle = self.cache.borrow_mut().remove_optimistic(id)?;

        let outcome = self.store.delete(&self.table, id).await;

        let reconciled = self.cache.borrow_mut().reconcile_remove(handle, outcome);
        self.mutations.finish(mutation, reconciled.is_ok());
        reconciled
            .map(|()| true)
            .map_err(|err| self.report(TodoError::RemoteWrite(err.message)))
    }

    /// Moves a todo to `new_index` within its category. The new sort orders are applied
    /// locally at once; if any write fails the whole batch is rolled back.
    pub async fn reorder(&self, id: &str, new_index: usize) -> Result<(), TodoError> {
        let moved = self.saved_todo(id)?;
        let siblings = self.in_category(moved.category);
        if let Some(pending) = siblings.iter().find(|todo| todo.is_unconfirmed()) {
            return Err(self.report(TodoError::NotYetSaved(pending.title.clone())));
        }

        let ordered: Vec<&Todo> = siblings.iter().collect();
        let changes = todo::plan_reorder(&ordered, id, new_index);
        if changes.is_empty() {
            return Ok(());
        }

        let mutation = self.mutations.begin(MutationKind::Reorder, id);
        let handles = {
            let mut cache = self.cache.borrow_mut();
            changes
                .iter()
                .map(|(todo_id, sort_order)| {
                    cache.update_optimistic(todo_id, |todo| todo.sort_order = *sort_order)
                })
                .collect::<Result<Vec<PendingUpdate<Todo>>, CacheError>>()
        };
        let handles = match handles {
            Ok(handles) => handles,
            Err(err) => {
                self.mutations.finish(mutation, false);
                return Err(self.report(err.into()));
            }
        };

        let outcome = self.push_sort_orders(&handles).await;

        // The batch error itself is returned from `outcome`; per-handle results only count.
        let rolled_back = {
            let mut cache = self.cache.borrow_mut();
            handles
                .into_iter()
                .map(|handle| cache.reconcile_update(handle, outcome.as_ref().map(|_| ())))
                .filter(Result::is_err)
                .count()
        };
        if rolled_back > 0 {
            tracing::warn!("Rolled back {} sort orders after failed reorder", rolled_back);
        }
        self.mutations.finish(mutation, outcome.is_ok());
        outcome.map_err(|err| self.report(TodoError::RemoteWrite(err.message)))
    }

    /// Writes each planned sort order. On the first failure, rows already written are set
    /// back to their previous order.
    async fn push_sort_orders(&self, handles: &[PendingUpdate<Todo>]) -> Result<(), RemoteError> {
        for (written, handle) in handles.iter().enumerate() {
            let sort_order = self
                .cache
                .borrow()
                .get(handle.id())
                .map(|todo| todo.sort_order)
                .unwrap_or(handle.snapshot().sort_order);

            if let Err(err) = self
                .store
                .update(&self.table, handle.id(), single_column("sort_order", json!(sort_order)))
                .await
            {
                for done in &handles[..written] {
                    let previous = single_column("sort_order", json!(done.snapshot().sort_order));
                    if let Err(revert_err) =
                        self.store.update(&self.table, done.id(), previous).await
                    {
                        tracing::error!("Could not restore order of {}: {}", done.id(), revert_err);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn saved_todo(&self, id: &str) -> Result<Todo, TodoError> {
        let todo = self
            .todo(id)
            .ok_or_else(|| self.report(TodoError::UnknownTodo(id.to_string())))?;
        if todo.is_unconfirmed() {
            return Err(self.report(TodoError::NotYetSaved(todo.title)));
        }
        Ok(todo)
    }

    fn report(&self, err: TodoError) -> TodoError {
        tracing::warn!("{}", err);
        self.prompter.notify(&err.to_string());
        err
    }
}

fn single_column(column: &str, value: Value) -> Record {
    let mut record = Record::new();
    record.insert(column.to_string(), value);
    record
}

/// Todo as confirmed by the store, falling back to the draft under its new id when the row
/// cannot be read. A row without an id cannot be kept.
fn confirmed_todo(row: Record, draft: &Todo) -> Result<Todo, RemoteError> {
    let id = match row.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    match StoredTodo::from_record(row) {
        Ok(stored) => Ok(Todo::from(stored)),
        Err(err) => {
            tracing::warn!("Created todo returned an unreadable row: {}", err);
            let id = id.ok_or_else(|| RemoteError::new("Created row came back without an id"))?;
            Ok(Todo {
                id,
                ..draft.clone()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::prompt::MockPrompter;
    use crate::sync::mutation::MutationState;
    use crate::sync::offline_store::OfflineStore;
    use crate::sync::remote::MockRemoteStore;

    fn row(id: i64, title: &str, category: &str, sort_order: i64, completed: bool) -> Record {
        match json!({
            "id": id,
            "title": title,
            "category": category,
            "owner": "user-a",
            "completed": completed,
            "sort_order": sort_order,
            "created_at": "2024-06-01T10:00:00Z"
        }) {
            Value::Object(record) => record,
            _ => unreachable!(),
        }
    }

    fn quiet_prompter() -> MockPrompter {
        let mut prompter = MockPrompter::new();
        prompter.expect_notify().never();
        prompter
    }

    fn seeded<S: RemoteStore>(store: S, prompter: MockPrompter) -> TodoSync<S> {
        let sync = TodoSync::new(store, "todos", "user-a", Box::new(prompter));
        sync.cache.borrow_mut().load(vec![
            Todo::from(StoredTodo::from_record(row(1, "Milk", "shopping", 0, false)).unwrap()),
            Todo::from(StoredTodo::from_record(row(2, "Eggs", "shopping", 1, true)).unwrap()),
            Todo::from(StoredTodo::from_record(row(3, "Bread", "shopping", 2, false)).unwrap()),
            Todo::from(StoredTodo::from_record(row(4, "Taxes", "tasks", 0, false)).unwrap()),
        ]);
        sync
    }

    fn titles(todos: &[Todo]) -> Vec<&str> {
        todos.iter().map(|todo| todo.title.as_str()).collect()
    }

    fn mutation_states<S: RemoteStore>(sync: &TodoSync<S>) -> Vec<MutationState> {
        sync.mutations.history().into_iter().map(|m| m.state).collect()
    }

    #[tokio::test]
    async fn load_orders_by_category_then_sort_order() {
        let mut store = MockRemoteStore::new();
        store.expect_select().times(1).returning(|table, _, order| {
            assert_eq!(table, "todos");
            assert_eq!(order.columns.len(), 3);
            Ok(vec![
                row(1, "Milk", "shopping", 1, false),
                row(2, "Taxes", "tasks", 0, false),
                row(3, "Eggs", "shopping", 0, false),
            ])
        });
        let sync = TodoSync::new(store, "todos", "user-a", Box::new(quiet_prompter()));

        sync.load().await.unwrap();

        assert_eq!(titles(&sync.todos()), vec!["Taxes", "Eggs", "Milk"]);
    }

    #[tokio::test]
    async fn add_appends_to_end_of_category() {
        let mut store = MockRemoteStore::new();
        store.expect_insert().times(1).returning(|_, record| {
            assert_eq!(record["sort_order"], 3);
            assert_eq!(record["category"], "shopping");
            let mut created = record;
            created.insert("id".to_string(), json!(9));
            created.insert("created_at".to_string(), json!("2024-06-02T10:00:00Z"));
            Ok(created)
        });
        let sync = seeded(store, quiet_prompter());

        let added = sync.add(Category::Shopping, " Butter ").await.unwrap();

        assert_eq!(added.id, "9");
        assert_eq!(
            titles(&sync.in_category(Category::Shopping)),
            vec!["Milk", "Eggs", "Bread", "Butter"]
        );
    }

    #[tokio::test]
    async fn added_todo_survives_a_reload() {
        let store = OfflineStore::in_memory().unwrap();
        let sync = TodoSync::new(store, "todos", "user-a", Box::new(quiet_prompter()));

        let added = sync.add(Category::Bucket, "Northern lights").await.unwrap();
        sync.load().await.unwrap();

        assert_eq!(sync.todos(), vec![added]);
        assert_eq!(titles(&sync.in_category(Category::Bucket)), vec!["Northern lights"]);
    }

    #[tokio::test]
    async fn created_row_without_id_rolls_back() {
        let mut store = MockRemoteStore::new();
        store.expect_insert().times(1).returning(|_, _| Ok(Record::new()));
        let mut prompter = MockPrompter::new();
        prompter
            .expect_notify()
            .withf(|message: &str| message.contains("without an id"))
            .times(1)
            .returning(|_| ());
        let sync = seeded(store, prompter);

        let result = sync.add(Category::Tasks, "Passport").await;

        assert!(matches!(result, Err(TodoError::RemoteWrite(_))));
        assert_eq!(sync.todos().len(), 4);
        assert_eq!(mutation_states(&sync), vec![MutationState::RolledBack]);
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let mut store = MockRemoteStore::new();
        store.expect_insert().never();
        let mut prompter = MockPrompter::new();
        prompter.expect_notify().times(1).returning(|_| ());
        let sync = seeded(store, prompter);

        let result = sync.add(Category::Tasks, "   ").await;

        assert!(matches!(result, Err(TodoError::EmptyTitle)));
        assert_eq!(sync.todos().len(), 4);
    }

    #[tokio::test]
    async fn failed_toggle_restores_flag() {
        let mut store = MockRemoteStore::new();
        store.expect_update().times(1).returning(|_, id, patch| {
            assert_eq!(id, "1");
            assert_eq!(patch["completed"], true);
            Err(RemoteError::new("offline"))
        });
        let mut prompter = MockPrompter::new();
        prompter.expect_notify().times(1).returning(|_| ());
        let sync = seeded(store, prompter);

        let result = sync.toggle("1").await;

        assert!(matches!(result, Err(TodoError::RemoteWrite(_))));
        assert!(!sync.todo("1").unwrap().completed);
        assert_eq!(sync.in_flight(), 0);
    }

    #[tokio::test]
    async fn declined_delete_keeps_todo() {
        let mut store = MockRemoteStore::new();
        store.expect_delete().never();
        let mut prompter = MockPrompter::new();
        prompter
            .expect_ask_confirmation()
            .withf(|text: &str| text.contains("Milk"))
            .returning(|_| false);
        let sync = seeded(store, prompter);

        assert!(!sync.delete("1").await.unwrap());
        assert_eq!(sync.todos().len(), 4);
    }

    #[tokio::test]
    async fn reorder_failure_rolls_back_whole_batch() {
        let mut store = MockRemoteStore::new();
        let mut calls = 0;
        store.expect_update().returning(move |_, _, _| {
            calls += 1;
            if calls == 2 {
                Err(RemoteError::new("conflict"))
            } else {
                Ok(())
            }
        });
        let mut prompter = MockPrompter::new();
        prompter.expect_notify().times(1).returning(|_| ());
        let sync = seeded(store, prompter);
        let before = sync.todos();

        let result = sync.reorder("3", 0).await;

        assert!(result.is_err());
        assert_eq!(sync.todos(), before);
        assert_eq!(mutation_states(&sync), vec![MutationState::RolledBack]);
    }

    #[tokio::test]
    async fn reorder_persists_unique_orders() {
        let store = OfflineStore::in_memory().unwrap();
        for (title, order) in [("Milk", 0), ("Eggs", 1), ("Bread", 2)] {
            let mut record = row(0, title, "shopping", order, false);
            record.remove("id");
            store.insert("todos", record).await.unwrap();
        }
        let sync = TodoSync::new(store, "todos", "user-a", Box::new(quiet_prompter()));
        sync.load().await.unwrap();

        sync.reorder("3", 0).await.unwrap();
        sync.load().await.unwrap();

        let shopping = sync.in_category(Category::Shopping);
        assert_eq!(titles(&shopping), vec!["Bread", "Milk", "Eggs"]);
        let orders: Vec<i64> = shopping.iter().map(|todo| todo.sort_order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn stats_count_completed_per_category() {
        let sync = seeded(MockRemoteStore::new(), quiet_prompter());

        assert_eq!(sync.category_stats(Category::Shopping), (1, 3));
        assert_eq!(sync.category_stats(Category::Bucket), (0, 0));
    }
}
