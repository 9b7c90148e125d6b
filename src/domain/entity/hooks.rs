//! Lifecycle hooks of an entity definition.

use crate::domain::entity::Entity;
use crate::domain::value::Values;
use std::fmt;
use std::sync::Arc;

pub type HookFn = Arc<dyn Fn(&mut Entity) -> anyhow::Result<()> + Send + Sync>;
pub type ConstructWithValuesFn = Arc<dyn Fn(&mut Entity, &Values) -> anyhow::Result<()> + Send + Sync>;

/// How the construct hook consumes creation values.
#[derive(Clone)]
pub enum Construct {
    /// The hook receives the values and is responsible for applying them.
    WithValues(ConstructWithValuesFn),
    /// The hook ignores the values; they are merged onto the instance afterwards.
    NoArgs(HookFn),
}

/// Optional callbacks run at fixed points of an entity's life.
///
/// Creation: `defaults`, then `construct`, then the value merge, then
/// `on_load` for rehydrated records. Storing: `before_store`, write,
/// `after_store`. Deleting: `before_delete`, remove.
#[derive(Clone, Default)]
pub struct Hooks {
    pub defaults: Option<HookFn>,
    pub construct: Option<Construct>,
    pub before_store: Option<HookFn>,
    pub after_store: Option<HookFn>,
    pub on_load: Option<HookFn>,
    pub before_delete: Option<HookFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Entity) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.defaults = Some(Arc::new(f));
        self
    }

    pub fn construct<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Entity, &Values) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.construct = Some(Construct::WithValues(Arc::new(f)));
        self
    }

    pub fn construct_without_values<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Entity) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.construct = Some(Construct::NoArgs(Arc::new(f)));
        self
    }

    pub fn before_store<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Entity) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_store = Some(Arc::new(f));
        self
    }

    pub fn after_store<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Entity) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_store = Some(Arc::new(f));
        self
    }

    pub fn on_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Entity) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_load = Some(Arc::new(f));
        self
    }

    pub fn before_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Entity) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_delete = Some(Arc::new(f));
        self
    }

    /// Whether creation values should be merged onto the instance after the
    /// construct hook ran.
    pub fn merges_values(&self) -> bool {
        !matches!(self.construct, Some(Construct::WithValues(_)))
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let construct = match &self.construct {
            None => "none",
            Some(Construct::WithValues(_)) => "with values",
            Some(Construct::NoArgs(_)) => "no args",
        };
        f.debug_struct("Hooks")
            .field("defaults", &self.defaults.is_some())
            .field("construct", &construct)
            .field("before_store", &self.before_store.is_some())
            .field("after_store", &self.after_store.is_some())
            .field("on_load", &self.on_load.is_some())
            .field("before_delete", &self.before_delete.is_some())
            .finish()
    }
}
