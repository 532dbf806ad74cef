use std::any::type_name;
use std::borrow::Cow;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use petgraph::Graph;
use petgraph::dot::{Config, Dot, RankDir};
use petgraph::graph::NodeIndex;
use petgraph::visit::{Dfs, Reversed};

use crate::core::{ArcStr, Blake3Hasher, Hash32, Mode, TaskContext};
use crate::engine::{
    Control, Delayed, Dependencies, Node, NodeRef, Outcome, TaskNode, Terminal,
    run_tasks_parallel,
};
use crate::error::{ExecError, GraphError};
use crate::sample::Sampler;

static NEXT_BLUEPRINT: AtomicU64 = AtomicU64::new(1);

/// The graph-construction context.
///
/// `Blueprint` records tasks as they are declared. Declaring a task never
/// runs it: it returns a [`Delayed`] handle standing for the task's future
/// result, which can be passed on to other tasks, kept in a `Vec`, sampled at
/// random, and so on. Ordinary loops and iterator adaptors are all it takes to
/// express graphs that don't fit a map/group/join shape.
///
/// Once configured, convert it into a [`TaskGraph`] with
/// [`Blueprint::finish`] to evaluate it.
///
/// # Example
///
/// ```rust
/// use kumiki::Blueprint;
///
/// let mut blueprint = Blueprint::with_seed(42);
///
/// let a = blueprint.task().name("a").run(|_| Ok(1))?;
/// let b = blueprint.task().name("b").run(|_| Ok(2))?;
/// let sum = blueprint
///     .task()
///     .name("sum")
///     .depends_on((a, b))
///     .run(|_, (a, b)| Ok(a + b))?;
///
/// let graph = blueprint.finish();
/// assert_eq!(*graph.compute(sum)?, 3);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Blueprint {
    id: u64,
    graph: Graph<Node, ()>,
    sampler: Sampler,
}

impl Blueprint {
    /// Creates a new, empty blueprint with a randomly seeded sampler.
    pub fn new() -> Self {
        Self::with_sampler(Sampler::from_entropy())
    }

    /// Creates a new, empty blueprint whose random choices are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_sampler(Sampler::new(seed))
    }

    fn with_sampler(sampler: Sampler) -> Self {
        let id = NEXT_BLUEPRINT.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(blueprint = id, seed = sampler.seed(), "new blueprint");

        Self {
            id,
            graph: Graph::new(),
            sampler,
        }
    }

    /// The random source to wire the graph with.
    pub fn sampler(&mut self) -> &mut Sampler {
        &mut self.sampler
    }

    /// Number of tasks declared so far.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn finish(self) -> TaskGraph {
        debug_assert!(!petgraph::algo::is_cyclic_directed(&self.graph));

        TaskGraph {
            id: self.id,
            seed: self.sampler.seed(),
            graph: Arc::new(self.graph),
        }
    }

    /// The entry point. Starts in the "Empty" state.
    pub fn task(&mut self) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: None,
        }
    }

    /// Lifts a concrete value into the graph, so it can be consumed like any
    /// other deferred value.
    pub fn lift<T>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: T,
    ) -> Result<Delayed<T>, GraphError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.task().name(name).run(move |_| Ok(value.clone()))
    }

    pub(crate) fn add_task<R, D, F>(
        &mut self,
        task: TaskNode<R, D, F>,
    ) -> Result<Delayed<R>, GraphError>
    where
        R: Send + Sync + 'static,
        D: Dependencies + Send + Sync + 'static,
        F: for<'a> Fn(&TaskContext, D::Output<'a>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let name: ArcStr = Arc::from(task.name.as_ref());
        let dependencies = task.dependencies.dependencies();

        for dependency in &dependencies {
            if dependency.blueprint != self.id || dependency.index.index() >= self.graph.node_count()
            {
                return Err(GraphError::ForeignHandle {
                    task: name,
                    index: dependency.index.index(),
                });
            }
        }

        let key = self.make_key(&name, &dependencies);
        let index = self.graph.add_node(Node {
            name,
            key,
            task: Arc::new(task),
        });

        for dependency in dependencies {
            self.graph.add_edge(dependency.index, index, ());
        }

        Ok(Delayed::new(self.id, index))
    }

    /// `name-<hash>`, where the hash covers the name, the position of the node
    /// and the keys of its dependencies. Identical construction code yields
    /// identical keys.
    fn make_key(&self, name: &str, dependencies: &[NodeRef]) -> ArcStr {
        let mut hasher = Blake3Hasher::default();
        hasher
            .update(name)
            .update((self.graph.node_count() as u64).to_le_bytes());

        for dependency in dependencies {
            hasher.update(self.graph[dependency.index].key.as_bytes());
        }

        let hash = Hash32::from(hasher);
        Arc::from(format!("{name}-{}", hash.to_short_hex()))
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: Option<Cow<'static, str>>,
}

impl<'a> TaskDef<'a> {
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depends_on<D>(self, dependencies: D) -> TaskBinder<'a, D>
    where
        D: Dependencies,
    {
        TaskBinder {
            blueprint: self.blueprint,
            name: self.name,
            dependencies,
        }
    }

    /// Registers a task without dependencies, a source of the graph.
    pub fn run<F, R>(self, callback: F) -> Result<Delayed<R>, GraphError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.blueprint.add_task(TaskNode {
            name: self.name.unwrap_or(type_name::<F>().into()),
            dependencies: (),
            callback: move |ctx: &TaskContext, _: ()| callback(ctx),
            _phantom: PhantomData,
        })
    }

    /// Registers a source task whose body is asynchronous.
    ///
    /// Each task gets its own single-threaded Tokio runtime, created here and
    /// blocked on when the task runs. This suits loaders talking to async
    /// clients (databases, HTTP) from an otherwise synchronous graph.
    ///
    /// ```rust,ignore
    /// let rows = blueprint.task().name("load_from_sql").run_async(|_| async {
    ///     let rows = pool.fetch_all("select * from events").await?;
    ///     Ok(rows)
    /// })?;
    /// ```
    #[cfg(feature = "tokio")]
    pub fn run_async<F, Fut, R>(self, callback: F) -> Result<Delayed<R>, GraphError>
    where
        F: Fn(&TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>>,
        R: Send + Sync + 'static,
    {
        let name = self.name.unwrap_or(type_name::<F>().into());

        let executor = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| GraphError::Runtime(Arc::from(name.as_ref()), e))?;

        self.blueprint.add_task(TaskNode {
            name,
            dependencies: (),
            callback: move |ctx: &TaskContext, _: ()| executor.block_on(callback(ctx)),
            _phantom: PhantomData,
        })
    }
}

pub struct TaskBinder<'a, D> {
    blueprint: &'a mut Blueprint,
    name: Option<Cow<'static, str>>,
    dependencies: D,
}

impl<'a, D> TaskBinder<'a, D>
where
    D: Dependencies + Send + Sync + 'static,
{
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Registers the task. The callback receives the resolved dependencies
    /// in the shape they were declared in: `&T` for a single handle, a tuple
    /// of references for a tuple, a `Vec` of references for a `Vec`.
    pub fn run<F, R>(self, callback: F) -> Result<Delayed<R>, GraphError>
    where
        F: for<'b> Fn(&TaskContext, D::Output<'b>) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.blueprint.add_task(TaskNode {
            name: self.name.unwrap_or(type_name::<F>().into()),
            dependencies: self.dependencies,
            callback,
            _phantom: PhantomData,
        })
    }
}

/// A finished, immutable task graph.
///
/// Cloning is cheap: clones share the same nodes, which lets a graph be
/// evaluated locally and submitted to any number of clusters at the same
/// time. Every evaluation runs its nodes afresh; nothing is cached between
/// evaluations.
#[derive(Clone)]
pub struct TaskGraph {
    pub(crate) id: u64,
    pub(crate) seed: u64,
    pub(crate) graph: Arc<Graph<Node, ()>>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges, one per consumed argument.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Seed of the sampler the graph was wired with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn name<T>(&self, handle: Delayed<T>) -> Option<&str> {
        self.node(handle.node).map(|node| node.name.as_ref())
    }

    pub fn key<T>(&self, handle: Delayed<T>) -> Option<&str> {
        self.node(handle.node).map(|node| node.key.as_ref())
    }

    /// The nodes a task consumes, in argument order.
    pub fn dependencies<T>(&self, handle: Delayed<T>) -> Vec<NodeIndex> {
        self.node(handle.node)
            .map(|node| {
                node.task
                    .dependencies()
                    .into_iter()
                    .map(|dependency| dependency.index)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of every task, indexed like the graph.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|node| node.name.as_ref())
    }

    /// Counts tasks registered under `name`.
    pub fn count_named(&self, name: &str) -> usize {
        self.names().filter(|n| *n == name).count()
    }

    pub fn is_acyclic(&self) -> bool {
        !petgraph::algo::is_cyclic_directed(&*self.graph)
    }

    /// Whether `to` transitively depends on `from`.
    pub fn has_path(&self, from: NodeIndex, to: NodeIndex) -> bool {
        petgraph::algo::has_path_connecting(&*self.graph, from, to, None)
    }

    /// A hash of the topology: every node key and every edge.
    pub fn fingerprint(&self) -> Hash32 {
        let mut hasher = Blake3Hasher::default();

        for node in self.graph.node_weights() {
            hasher.update(node.key.as_bytes());
        }

        for edge in self.graph.raw_edges() {
            hasher
                .update((edge.source().index() as u64).to_le_bytes())
                .update((edge.target().index() as u64).to_le_bytes());
        }

        Hash32::from(hasher)
    }

    /// Renders the graph in Graphviz DOT format, labelled with task names.
    /// Each node carries its key as a tooltip.
    pub fn to_dot(&self) -> String {
        let names = self.graph.map(|_, node| node.name.clone(), |_, _| "");

        let node_attrs = |_, (index, _): (NodeIndex, &ArcStr)| {
            let key = self.graph[index].key.replace('"', "\\\"");
            format!("tooltip = \"{key}\" ")
        };
        let dot = Dot::with_attr_getters(
            &names,
            &[Config::EdgeNoLabel, Config::RankDir(RankDir::LR)],
            &|_, _| String::new(),
            &node_attrs,
        );

        dot.to_string()
    }

    /// Evaluates everything `terminal` depends on, on the calling thread and
    /// the global rayon pool, and returns the result of every node that ran.
    pub fn execute<X>(&self, terminal: &X) -> Result<Outcome, ExecError>
    where
        X: Terminal,
    {
        let nodes = self.upstream(&terminal.nodes())?;
        let cancelled = AtomicBool::new(false);

        self.evaluate(
            &nodes,
            &Control {
                mode: Mode::Local,
                cancelled: &cancelled,
                on_progress: &|_| {},
                pool: None,
            },
        )
    }

    /// Evaluates every node of the graph.
    pub fn execute_all(&self) -> Result<Outcome, ExecError> {
        let nodes = self.graph.node_indices().collect();
        let cancelled = AtomicBool::new(false);

        self.evaluate(
            &nodes,
            &Control {
                mode: Mode::Local,
                cancelled: &cancelled,
                on_progress: &|_| {},
                pool: None,
            },
        )
    }

    /// Evaluates `terminal` locally and returns its value, or the error of
    /// the task that prevented it.
    pub fn compute<X>(&self, terminal: X) -> Result<X::Owned, ExecError>
    where
        X: Terminal,
    {
        let outcome = self.execute(&terminal)?;
        terminal.collect(&outcome)
    }

    pub(crate) fn evaluate(
        &self,
        nodes: &HashSet<NodeIndex>,
        control: &Control<'_>,
    ) -> Result<Outcome, ExecError> {
        run_tasks_parallel(&self.graph, self.id, nodes, control)
    }

    /// Every node reachable upstream from the terminals, terminals included.
    pub(crate) fn upstream(&self, terminals: &[NodeRef]) -> Result<HashSet<NodeIndex>, ExecError> {
        let reversed = Reversed(&*self.graph);
        let mut nodes = HashSet::new();

        for terminal in terminals {
            if self.node(*terminal).is_none() {
                return Err(ExecError::UnknownNode(terminal.index.index()));
            }

            if nodes.contains(&terminal.index) {
                continue;
            }

            let mut dfs = Dfs::new(reversed, terminal.index);
            while let Some(index) = dfs.next(reversed) {
                nodes.insert(index);
            }
        }

        Ok(nodes)
    }

    fn node(&self, node: NodeRef) -> Option<&Node> {
        if node.blueprint != self.id {
            return None;
        }

        self.graph.node_weight(node.index)
    }
}

impl std::fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let name = node.name.replace('"', "\\\""); // Simple escape
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.edge_indices() {
            let Some((source, target)) = self.graph.edge_endpoints(edge) else {
                continue;
            };
            let type_name = self.graph[source]
                .task
                .get_output_type_name()
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            writeln!(
                f,
                "    {} -- \"{}\" --> {}",
                source.index(),
                type_name,
                target.index()
            )?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("id", &self.id)
            .field("seed", &self.seed)
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use proptest::prelude::*;

    use super::*;
    use crate::error::TaskError;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_declaring_runs_nothing() {
        let runs = counter();
        let mut blueprint = Blueprint::with_seed(0);

        let a = {
            let runs = runs.clone();
            blueprint.task().name("a").run(move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
        }
        .unwrap();

        let graph = blueprint.finish();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(*graph.compute(a).unwrap(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_every_evaluation_runs_afresh() {
        let runs = counter();
        let mut blueprint = Blueprint::with_seed(0);

        let a = {
            let runs = runs.clone();
            blueprint.task().name("a").run(move |_| {
                Ok(runs.fetch_add(1, Ordering::SeqCst))
            })
        }
        .unwrap();

        let graph = blueprint.finish();
        graph.compute(a).unwrap();
        graph.compute(a).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_only_upstream_of_terminal_runs() {
        let runs = counter();
        let mut blueprint = Blueprint::with_seed(0);

        let wanted = blueprint.task().name("wanted").run(|_| Ok("yes")).unwrap();
        let unwanted = {
            let runs = runs.clone();
            blueprint.task().name("unwanted").run(move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok("no")
            })
        }
        .unwrap();

        let graph = blueprint.finish();
        let outcome = graph.execute(&wanted).unwrap();

        assert!(outcome.contains(wanted));
        assert!(!outcome.contains(unwanted));
        assert_eq!(outcome.len(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shared_dependency_runs_once() {
        let runs = counter();
        let mut blueprint = Blueprint::with_seed(0);

        let root = {
            let runs = runs.clone();
            blueprint.task().name("root").run(move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(10)
            })
        }
        .unwrap();

        let left = blueprint
            .task()
            .name("left")
            .depends_on(root)
            .run(|_, root| Ok(root + 1))
            .unwrap();
        let right = blueprint
            .task()
            .name("right")
            .depends_on(root)
            .run(|_, root| Ok(root + 2))
            .unwrap();
        let join = blueprint
            .task()
            .name("join")
            .depends_on((left, right))
            .run(|_, (l, r)| Ok(l * r))
            .unwrap();

        let graph = blueprint.finish();

        assert_eq!(*graph.compute(join).unwrap(), 11 * 12);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_handle_twice() {
        let mut blueprint = Blueprint::with_seed(0);

        let a = blueprint.task().name("a").run(|_| Ok(21)).unwrap();
        let doubled = blueprint
            .task()
            .name("double")
            .depends_on((a, a))
            .run(|_, (x, y)| Ok(x + y))
            .unwrap();

        let graph = blueprint.finish();

        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.dependencies(doubled), vec![a.index(), a.index()]);
        assert_eq!(*graph.compute(doubled).unwrap(), 42);
    }

    #[test]
    fn test_vec_dependencies_keep_order() {
        let mut blueprint = Blueprint::with_seed(0);

        let parts: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|s| blueprint.lift(s, s.to_string()).unwrap())
            .collect();

        let joined = blueprint
            .task()
            .name("join")
            .depends_on(parts)
            .run(|_, parts| Ok(parts.into_iter().cloned().collect::<String>()))
            .unwrap();

        let graph = blueprint.finish();
        assert_eq!(*graph.compute(joined).unwrap(), "abc");
    }

    #[test]
    fn test_failure_propagates_downstream_only() {
        let mut blueprint = Blueprint::with_seed(0);

        let broken = blueprint
            .task()
            .name("broken")
            .run(|_| -> anyhow::Result<i32> { anyhow::bail!("disk on fire") })
            .unwrap();
        let middle = blueprint
            .task()
            .name("middle")
            .depends_on(broken)
            .run(|_, x| Ok(x + 1))
            .unwrap();
        let last = blueprint
            .task()
            .name("last")
            .depends_on(middle)
            .run(|_, x| Ok(x + 1))
            .unwrap();
        let healthy = blueprint.task().name("healthy").run(|_| Ok(7)).unwrap();

        let graph = blueprint.finish();
        let outcome = graph.execute(&(last, healthy)).unwrap();

        match outcome.get(last) {
            Err(ExecError::Task(TaskError::Failed { task, error })) => {
                assert_eq!(&*task, "broken");
                assert!(error.to_string().contains("disk on fire"));
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(*outcome.get(healthy).unwrap(), 7);
        assert_eq!(outcome.progress().failed, 3);
        assert_eq!(outcome.progress().completed, 1);
        assert_eq!(outcome.diagnostics().executed(), 2);

        let err = graph.compute(last).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_panic_is_contained() {
        let mut blueprint = Blueprint::with_seed(0);

        let boom = blueprint
            .task()
            .name("boom")
            .run(|_| -> anyhow::Result<u8> { panic!("kaboom") })
            .unwrap();

        let graph = blueprint.finish();

        match graph.compute(boom) {
            Err(ExecError::Task(TaskError::Panicked { task, message })) => {
                assert_eq!(&*task, "boom");
                assert_eq!(message, "kaboom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let mut first = Blueprint::with_seed(0);
        let mut second = Blueprint::with_seed(0);

        let foreign = first.task().name("a").run(|_| Ok(1)).unwrap();

        let err = second
            .task()
            .name("b")
            .depends_on(foreign)
            .run(|_, x| Ok(*x))
            .unwrap_err();
        assert!(matches!(err, GraphError::ForeignHandle { .. }));

        let _ = second.task().name("c").run(|_| Ok(2)).unwrap();
        let graph = second.finish();
        assert!(matches!(
            graph.compute(foreign),
            Err(ExecError::UnknownNode(0))
        ));
        assert!(graph.name(foreign).is_none());
    }

    #[test]
    fn test_lift() {
        let mut blueprint = Blueprint::with_seed(0);

        let threshold = blueprint.lift("threshold", 0.5_f64).unwrap();
        let above = blueprint
            .task()
            .name("above")
            .depends_on(threshold)
            .run(|_, t| Ok(*t > 0.25))
            .unwrap();

        let graph = blueprint.finish();
        assert_eq!(graph.name(threshold), Some("threshold"));
        assert!(*graph.compute(above).unwrap());
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn test_run_async() {
        let mut blueprint = Blueprint::with_seed(0);

        let rows = blueprint
            .task()
            .name("load_from_sql")
            .run_async(|_| async {
                tokio::task::yield_now().await;
                Ok(vec![1, 2, 3])
            })
            .unwrap();

        let graph = blueprint.finish();
        assert_eq!(*graph.compute(rows).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_terminal_shapes() {
        let mut blueprint = Blueprint::with_seed(0);

        let a = blueprint.task().name("a").run(|_| Ok(1u8)).unwrap();
        let b = blueprint.task().name("b").run(|_| Ok("two")).unwrap();

        let graph = blueprint.finish();

        let (x, (y, z)) = graph.compute((a, (b, vec![a, a]))).unwrap();
        assert_eq!(*x, 1);
        assert_eq!(*y, "two");
        assert_eq!(z.len(), 2);

        let empty = graph.compute(Vec::<Delayed<u8>>::new()).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_keys_are_stable() {
        let build = || {
            let mut blueprint = Blueprint::with_seed(0);
            let a = blueprint.task().name("load").run(|_| Ok(1)).unwrap();
            let b = blueprint
                .task()
                .name("process")
                .depends_on(a)
                .run(|_, a| Ok(a + 1))
                .unwrap();
            (blueprint.finish(), a, b)
        };

        let (first, a, b) = build();
        let (second, _, _) = build();

        let key = first.key(a).unwrap();
        assert!(key.starts_with("load-"));
        assert_eq!(key.len(), "load-".len() + 12);
        assert_ne!(first.key(a), first.key(b));

        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(
            first.names().collect::<Vec<_>>(),
            second.names().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_rendering() {
        let mut blueprint = Blueprint::with_seed(0);

        let a = blueprint.task().name("a").run(|_| Ok(1)).unwrap();
        let b = blueprint
            .task()
            .name("b")
            .depends_on(a)
            .run(|_, a| Ok(a + 1))
            .unwrap();
        let _c = blueprint.task().name("c").run(|_| Ok(3)).unwrap();

        let graph = blueprint.finish();

        let mermaid = graph.to_string();
        assert!(mermaid.starts_with("graph LR"));
        assert!(mermaid.contains("0 -- \"i32\" --> 1"));

        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("rankdir=\"LR\""));
        assert!(dot.contains("0 -> 1 [ ]"));
        assert!(dot.contains(&format!(
            "0 [ label = \"a\" tooltip = \"{}\" ]",
            graph.key(a).unwrap()
        )));
        assert!(!dot.contains("0 -> 2"));

        let outcome = graph.execute(&b).unwrap();
        let heat = outcome.diagnostics().render_mermaid(&graph);
        assert!(heat.contains("style 2 fill:#D3D3D3"));
        assert!(heat.contains("0 --> 1"));
    }

    #[test]
    fn test_has_path() {
        let mut blueprint = Blueprint::with_seed(0);

        let a = blueprint.task().name("a").run(|_| Ok(1)).unwrap();
        let b = blueprint.task().name("b").run(|_| Ok(2)).unwrap();
        let c = blueprint
            .task()
            .name("c")
            .depends_on(a)
            .run(|_, a| Ok(*a))
            .unwrap();

        let graph = blueprint.finish();

        assert!(graph.has_path(a.index(), c.index()));
        assert!(!graph.has_path(b.index(), c.index()));
        assert!(!graph.has_path(c.index(), a.index()));
    }

    // Node `i` may only pick dependencies among the handles declared before
    // it, exactly like user code holding earlier handles.
    fn wiring_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
        (1..=max_tasks).prop_flat_map(|num_tasks| {
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), num_tasks)
        })
    }

    proptest! {
        #[test]
        fn test_composed_graphs_are_acyclic(wiring in wiring_strategy(40)) {
            let mut blueprint = Blueprint::with_seed(0);
            let mut handles: Vec<Delayed<u64>> = Vec::new();

            for picks in wiring {
                let deps: Vec<_> = if handles.is_empty() {
                    Vec::new()
                } else {
                    picks.iter().map(|p| handles[p % handles.len()]).collect()
                };

                let handle = blueprint
                    .task()
                    .name("node")
                    .depends_on(deps)
                    .run(|_, deps| Ok(1 + deps.into_iter().sum::<u64>()))
                    .unwrap();
                handles.push(handle);
            }

            let graph = blueprint.finish();
            prop_assert!(graph.is_acyclic());

            for edge in graph.graph.raw_edges() {
                prop_assert!(edge.source() < edge.target());
            }

            let values = graph.compute(handles.clone()).unwrap();
            prop_assert_eq!(values.len(), handles.len());
            prop_assert!(values.iter().all(|v| **v >= 1));
        }
    }
}
