//! Todo items and the action factory

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use optimist_core::{transform, OptimistError, Transform};
use optimist_runtime::{Factory, Hint, TwoStep};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub id: u64,
    pub text: String,
    pub pending: bool,
    pub deleted: bool,
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.deleted { "x" } else { " " };
        write!(f, "[{}] #{:<2} {}", mark, self.id, self.text)?;
        if self.pending {
            write!(f, "  (saving...)")?;
        }
        Ok(())
    }
}

/// The list plus ids deleted so far
///
/// Deletes are remembered by id so a delete aimed at a still-pending item
/// also applies to the confirmed item that replaces it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TodoList {
    pub items: Vec<Item>,
    deleted: BTreeSet<u64>,
}

impl TodoList {
    pub fn get(&self, id: u64) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }
}

#[derive(Debug)]
pub enum Action {
    /// Add an item once a simulated server confirms it after `delay`
    Create { text: String, delay: Duration },
    /// Mark the item with this id deleted
    Delete(u64),
}

/// Maps actions to hints, handing out item ids
pub struct TodoFactory {
    ids: AtomicU64,
}

impl TodoFactory {
    /// Ids continue after the seeded items
    pub fn new(seeded: &TodoList) -> Self {
        let last = seeded.items.iter().map(|item| item.id).max().unwrap_or(0);
        TodoFactory {
            ids: AtomicU64::new(last + 1),
        }
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }
}

impl Factory<TodoList, Action, ()> for TodoFactory {
    fn produce(&self, action: Action) -> Hint<TodoList, ()> {
        match action {
            Action::Delete(id) => Hint::reduce(transform(move |list: &TodoList| {
                let mut list = list.clone();
                list.deleted.insert(id);
                for item in list.items.iter_mut().filter(|item| item.id == id) {
                    item.deleted = true;
                }
                list
            })),
            Action::Create { text, delay } => {
                // The guess and the confirmed item share one id
                let id = self.next_id();
                let guess = push(id, text.clone(), true);

                let workflow = TwoStep::new(
                    async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, OptimistError>(())
                    },
                    move |_| push(id, text, false),
                );

                Hint::optimistic(workflow, guess)
            }
        }
    }
}

fn push(id: u64, text: String, pending: bool) -> Transform<TodoList> {
    transform(move |list: &TodoList| {
        let mut list = list.clone();
        let deleted = list.deleted.contains(&id);
        list.items.push(Item {
            id,
            text: text.clone(),
            pending,
            deleted,
        });
        list
    })
}

pub fn seed() -> TodoList {
    let items = [
        "Buy milk",
        "Call the landlord",
        "Run 10km",
        "Read the tokio book",
        "Book next week's train",
    ]
    .iter()
    .enumerate()
    .map(|(i, text)| Item {
        id: i as u64 + 1,
        text: text.to_string(),
        pending: false,
        deleted: false,
    })
    .collect();

    TodoList {
        items,
        deleted: BTreeSet::new(),
    }
}

pub fn render(list: &TodoList) -> String {
    list.items
        .iter()
        .map(|item| format!("    {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
