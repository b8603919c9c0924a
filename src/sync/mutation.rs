use std::cell::{Cell, RefCell};

/// Finished mutations kept for inspection. Pending ones are never dropped.
const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    Reorder,
}

/// Lifecycle of one remote mutation. `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub id: u64,
    pub kind: MutationKind,
    pub target: String,
    pub state: MutationState,
}

#[derive(Debug, Default)]
pub struct MutationLog {
    entries: RefCell<Vec<Mutation>>,
    last_id: Cell<u64>,
}

impl MutationLog {
    pub fn begin(&self, kind: MutationKind, target: &str) -> u64 {
        let id = self.last_id.get() + 1;
        self.last_id.set(id);
        self.entries.borrow_mut().push(Mutation {
            id,
            kind,
            target: target.to_string(),
            state: MutationState::Pending,
        });
        id
    }

    pub fn finish(&self, id: u64, committed: bool) {
        let mut entries = self.entries.borrow_mut();
        let Some(entry) = entries
            .iter_mut()
            .find(|m| m.id == id && m.state == MutationState::Pending)
        else {
            return;
        };
        entry.state = if committed {
            MutationState::Committed
        } else {
            MutationState::RolledBack
        };
        tracing::info!("{:?} of {} {:?}", entry.kind, entry.target, entry.state);

        let finished = entries
            .iter()
            .filter(|m| m.state != MutationState::Pending)
            .count();
        let mut excess = finished.saturating_sub(HISTORY_LIMIT);
        entries.retain(|m| {
            if excess > 0 && m.state != MutationState::Pending {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|m| m.state == MutationState::Pending)
            .count()
    }

    pub fn history(&self) -> Vec<Mutation> {
        self.entries.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_of(log: &MutationLog, id: u64) -> Option<MutationState> {
        log.history().into_iter().find(|m| m.id == id).map(|m| m.state)
    }

    #[test]
    fn new_mutation_is_pending() {
        let log = MutationLog::default();
        let id = log.begin(MutationKind::Create, "Dinner");

        assert_eq!(state_of(&log, id), Some(MutationState::Pending));
        assert_eq!(log.in_flight(), 1);
    }

    #[test]
    fn finished_mutation_is_terminal() {
        let log = MutationLog::default();
        let id = log.begin(MutationKind::Delete, "7");

        log.finish(id, false);
        log.finish(id, true);

        assert_eq!(state_of(&log, id), Some(MutationState::RolledBack));
        assert_eq!(log.in_flight(), 0);
    }

    #[test]
    fn long_sessions_keep_a_bounded_history() {
        let log = MutationLog::default();
        let waiting = log.begin(MutationKind::Update, "1");

        for n in 0..200 {
            let id = log.begin(MutationKind::Update, &n.to_string());
            log.finish(id, n % 3 != 0);
        }

        let history = log.history();
        assert_eq!(history.len(), HISTORY_LIMIT + 1);
        assert_eq!(state_of(&log, waiting), Some(MutationState::Pending));
        assert_eq!(history.last().map(|m| m.id), Some(201));
        assert_eq!(log.in_flight(), 1);
    }
}
