use std::borrow::Cow;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::{Dynamic, TaskContext};
use crate::engine::{Dependencies, NodeRef};

pub(crate) trait TypedTask: Send + Sync {
    /// The concrete output type of this task.
    type Output: Send + Sync + 'static;

    fn dependencies(&self) -> Vec<NodeRef>;

    fn execute(
        &self,
        context: &TaskContext,
        dependencies: &[Dynamic],
    ) -> anyhow::Result<Self::Output>;
}

/// The type-erased form of a task, stored in the graph.
///
/// Tasks are registered through the typed [`Blueprint`](crate::Blueprint)
/// API; this trait is the foundation that allows one graph to hold tasks with
/// different output types.
pub(crate) trait Task: Send + Sync {
    fn get_output_type_name(&self) -> &'static str;

    fn dependencies(&self) -> Vec<NodeRef>;

    fn execute(
        &self,
        context: &TaskContext,
        dependencies: &[Dynamic],
    ) -> anyhow::Result<Dynamic>;
}

// A blanket implementation to automatically bridge the two. This is where the
// type erasure actually happens.
impl<T> Task for T
where
    T: TypedTask + 'static,
{
    fn get_output_type_name(&self) -> &'static str {
        std::any::type_name::<T::Output>()
    }

    fn dependencies(&self) -> Vec<NodeRef> {
        T::dependencies(self)
    }

    fn execute(
        &self,
        context: &TaskContext,
        dependencies: &[Dynamic],
    ) -> anyhow::Result<Dynamic> {
        let output = T::execute(self, context, dependencies)?;
        Ok(Arc::new(output))
    }
}

/// A task made of a callback and the handles it consumes.
pub(crate) struct TaskNode<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies,
    F: for<'a> Fn(&TaskContext, D::Output<'a>) -> anyhow::Result<R> + Send + Sync,
{
    pub name: Cow<'static, str>,
    pub dependencies: D,
    pub callback: F,
    pub _phantom: PhantomData<fn() -> R>,
}

impl<R, D, F> TypedTask for TaskNode<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies + Send + Sync,
    F: for<'a> Fn(&TaskContext, D::Output<'a>) -> anyhow::Result<R> + Send + Sync,
{
    type Output = R;

    fn dependencies(&self) -> Vec<NodeRef> {
        self.dependencies.dependencies()
    }

    fn execute(
        &self,
        context: &TaskContext,
        dependencies: &[Dynamic],
    ) -> anyhow::Result<Self::Output> {
        let dependencies = self.dependencies.resolve(dependencies);
        (self.callback)(context, dependencies)
    }
}
