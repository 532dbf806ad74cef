use std::marker::PhantomData;
use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::engine::{Dynamic, Handle, NodeRef};

/// A deferred value: the future result of type `T` of a task in the graph.
///
/// A `Delayed<T>` is a lightweight, copyable token. It carries no data, only
/// the position of its producing node and the blueprint that node belongs to.
/// Passing it to another task's `depends_on` records a dependency edge;
/// nothing is computed until the graph is evaluated.
///
/// Handles can be stored in ordinary containers, picked at random, and passed
/// to any number of tasks. A node consumed by several dependents still runs
/// exactly once per evaluation and its output is shared.
pub struct Delayed<T> {
    pub(crate) node: NodeRef,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Delayed<T> {
    pub(crate) fn new(blueprint: u64, index: NodeIndex) -> Self {
        Self {
            node: NodeRef { blueprint, index },
            _phantom: PhantomData,
        }
    }

    /// Returns the underlying `NodeIndex` of the task in the graph.
    pub fn index(&self) -> NodeIndex {
        self.node.index
    }
}

impl<T> Clone for Delayed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Delayed<T> {}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<T> Eq for Delayed<T> {}

impl<T> std::hash::Hash for Delayed<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.node.hash(state);
    }
}

impl<T> std::fmt::Debug for Delayed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delayed")
            .field("index", &self.node.index.index())
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Handle for Delayed<T>
where
    T: Send + Sync + 'static,
{
    type Output<'a> = &'a T;
    type Owned = Arc<T>;

    fn node(&self) -> NodeRef {
        self.node
    }

    fn downcast<'a>(&self, output: &'a Dynamic) -> Self::Output<'a> {
        output
            .downcast_ref::<T>()
            .expect("Type mismatch in dependency resolution")
    }

    fn downcast_owned(&self, output: &Dynamic) -> Self::Owned {
        output
            .clone()
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("Expected {}", std::any::type_name::<T>()))
    }
}
