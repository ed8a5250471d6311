//! How change notifications turn into reloads.
//!
//! Screens never patch rows in place; a strategy looks at each event and
//! says whether the screen must reload. [`FullRefetch`] reloads everything
//! on any change to a watched table. A finer strategy can replace it without
//! touching the screens.

use enleve_shared::backend::ChangeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    ReloadAll,
    Ignore,
}

pub trait InvalidationStrategy: Send + Sync {
    fn decide(&self, event: &ChangeEvent) -> Invalidation;
}

#[derive(Debug, Clone)]
pub struct FullRefetch {
    tables: Vec<String>,
}

impl FullRefetch {
    pub fn new(tables: &[&str]) -> Self {
        Self {
            tables: tables.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl InvalidationStrategy for FullRefetch {
    fn decide(&self, event: &ChangeEvent) -> Invalidation {
        if self.tables.iter().any(|t| *t == event.table) {
            Invalidation::ReloadAll
        } else {
            Invalidation::Ignore
        }
    }
}
