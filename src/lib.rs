#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
pub mod cluster;
mod core;
mod engine;
mod error;
pub mod pipeline;
mod sample;
mod utils;

pub use crate::blueprint::{Blueprint, TaskBinder, TaskDef, TaskGraph};
pub use crate::cluster::{Address, Client, Cluster, ClusterConfig, DEFAULT_PORT, Status, TaskFuture};
pub use crate::core::{ArcStr, Hash32, Mode, TaskContext};
pub use crate::engine::{
    Delayed, Dependencies, Diagnostics, Handle, NodeRef, Outcome, Progress, TaskExecution,
    Terminal,
};
pub use crate::error::*;
pub use crate::sample::Sampler;
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

/// Shorthand for declaring a task.
///
/// The dependencies are named once and bound to the same names inside the
/// body, as references to their values.
///
/// ```rust
/// use kumiki::{Blueprint, task};
///
/// let mut blueprint = Blueprint::with_seed(0);
///
/// let a = task!(blueprint, "a", |_| Ok(2))?;
/// let b = task!(blueprint, "b", |_| Ok(3))?;
/// let product = task!(blueprint, "product", |_, a, b| Ok(a * b))?;
///
/// let graph = blueprint.finish();
/// assert_eq!(*graph.compute(product)?, 6);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[macro_export]
macro_rules! task {
    ($bp:expr, $name:expr, |$ctx:pat_param| $body:expr) => {
        $bp.task().name($name).run(move |$ctx| $body)
    };
    ($bp:expr, $name:expr, |$ctx:pat_param, $($dep:ident),+ $(,)?| $body:expr) => {
        $bp.task()
            .name($name)
            .depends_on(($($dep,)+))
            .run(move |$ctx, ($($dep,)+)| $body)
    };
}
