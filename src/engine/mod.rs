mod handle;
mod runner;
mod task;

use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::core::ArcStr;
use crate::error::ExecError;

pub use crate::engine::handle::Delayed;
pub use crate::engine::runner::{Diagnostics, Outcome, Progress, TaskExecution};

pub(crate) use crate::core::Dynamic;
pub(crate) use crate::engine::runner::{Control, run_tasks_parallel};
pub(crate) use crate::engine::task::{Task, TaskNode};

/// Position of a node together with the blueprint that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub(crate) blueprint: u64,
    pub(crate) index: NodeIndex,
}

/// A node of the task graph.
#[derive(Clone)]
pub(crate) struct Node {
    pub name: ArcStr,
    pub key: ArcStr,
    pub task: Arc<dyn Task>,
}

// Things that can be used as dependency handle
pub trait Handle: Copy + Send + Sync {
    type Output<'a>;
    type Owned: Send + Sync + 'static;

    fn node(&self) -> NodeRef;
    fn downcast<'a>(&self, output: &'a Dynamic) -> Self::Output<'a>;
    fn downcast_owned(&self, output: &Dynamic) -> Self::Owned;
}

/// A trait that enables a collection of [`Delayed<T>`]s to be used as
/// dependencies for a task.
///
/// This trait is implemented for `()`, a single handle, tuples of handles and
/// `Vec`s of handles, allowing them to be passed as the `dependencies`
/// argument to [`TaskDef::depends_on`](crate::TaskDef::depends_on). It
/// provides the necessary logic for the executor to extract dependency
/// information and resolve their outputs.
pub trait Dependencies {
    /// The resulting type when all dependencies are resolved.
    /// For a tuple of [`Delayed<T>`]s, this will be a tuple of `&'a T`s.
    type Output<'a>;

    /// Returns the node of each dependency in argument order. A handle passed
    /// twice appears twice.
    fn dependencies(&self) -> Vec<NodeRef>;

    /// Takes a slice of type-erased dependency outputs and resolves them into a
    /// concrete `Output` type.
    ///
    /// # Panics
    /// This method will panic if the type-erased outputs cannot be downcast to
    /// their expected concrete types, which the typed blueprint API rules out.
    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a>;
}

impl Dependencies for () {
    type Output<'a> = ();

    fn dependencies(&self) -> Vec<NodeRef> {
        vec![]
    }

    fn resolve<'a>(&self, _: &'a [Dynamic]) -> Self::Output<'a> {}
}

impl<H> Dependencies for H
where
    H: Handle,
{
    type Output<'a> = H::Output<'a>;

    fn dependencies(&self) -> Vec<NodeRef> {
        vec![self.node()]
    }

    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
        self.downcast(&outputs[0])
    }
}

impl<H> Dependencies for Vec<H>
where
    H: Handle,
{
    type Output<'a> = Vec<H::Output<'a>>;

    fn dependencies(&self) -> Vec<NodeRef> {
        self.iter().map(|h| h.node()).collect()
    }

    fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
        self.iter()
            .zip(outputs)
            .map(|(handle, output)| handle.downcast(output))
            .collect()
    }
}

macro_rules! impl_deps {
    ($($D:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($D),*> Dependencies for ($($D,)*)
        where
            $($D: Handle),* {
            type Output<'a> = ($($D::Output<'a>,)*);

            fn dependencies(&self) -> Vec<NodeRef> {
                let ($($D,)*) = self;
                vec![$(Handle::node($D),)*]
            }

            fn resolve<'a>(&self, outputs: &'a [Dynamic]) -> Self::Output<'a> {
                let ($($D,)*) = self;
                let mut iter = outputs.iter();

                ($({
                    let out = iter.next().expect("Missing dependency output");
                    $D.downcast(out)
                },)*)
            }
        }
    };
}

impl_deps!(A);
impl_deps!(A, B);
impl_deps!(A, B, C);
impl_deps!(A, B, C, D);
impl_deps!(A, B, C, D, E);
impl_deps!(A, B, C, D, E, F);
impl_deps!(A, B, C, D, E, F, G);
impl_deps!(A, B, C, D, E, F, G, H);
impl_deps!(A, B, C, D, E, F, G, H, I);
impl_deps!(A, B, C, D, E, F, G, H, I, J);
impl_deps!(A, B, C, D, E, F, G, H, I, J, K);
impl_deps!(A, B, C, D, E, F, G, H, I, J, K, L);

/// Something that can be evaluated: one deferred value, a `Vec` of them, or
/// a tuple of such terminals.
///
/// Evaluating a terminal runs exactly the nodes it transitively depends on
/// and hands back owned results.
pub trait Terminal: Send + Sync + 'static {
    /// The concrete result once every terminal node has resolved.
    type Owned: Send + Sync + 'static;

    /// The terminal nodes.
    fn nodes(&self) -> Vec<NodeRef>;

    /// Extracts the result from a finished evaluation. Fails with the error
    /// of the first terminal that did not resolve.
    fn collect(&self, outcome: &Outcome) -> Result<Self::Owned, ExecError>;
}

impl<T> Terminal for Delayed<T>
where
    T: Send + Sync + 'static,
{
    type Owned = Arc<T>;

    fn nodes(&self) -> Vec<NodeRef> {
        vec![self.node]
    }

    fn collect(&self, outcome: &Outcome) -> Result<Self::Owned, ExecError> {
        outcome.get(*self)
    }
}

impl<X> Terminal for Vec<X>
where
    X: Terminal,
{
    type Owned = Vec<X::Owned>;

    fn nodes(&self) -> Vec<NodeRef> {
        self.iter().flat_map(Terminal::nodes).collect()
    }

    fn collect(&self, outcome: &Outcome) -> Result<Self::Owned, ExecError> {
        self.iter().map(|item| item.collect(outcome)).collect()
    }
}

macro_rules! impl_terminal {
    ($($X:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($X),*> Terminal for ($($X,)*)
        where
            $($X: Terminal),* {
            type Owned = ($($X::Owned,)*);

            fn nodes(&self) -> Vec<NodeRef> {
                let ($($X,)*) = self;
                let mut nodes = Vec::new();
                $(nodes.extend($X.nodes());)*
                nodes
            }

            fn collect(&self, outcome: &Outcome) -> Result<Self::Owned, ExecError> {
                let ($($X,)*) = self;
                Ok(($($X.collect(outcome)?,)*))
            }
        }
    };
}

impl_terminal!(A);
impl_terminal!(A, B);
impl_terminal!(A, B, C);
impl_terminal!(A, B, C, D);
impl_terminal!(A, B, C, D, E);
impl_terminal!(A, B, C, D, E, F);
