use std::sync::{Arc, Weak};

use crate::blueprint::TaskGraph;
use crate::cluster::future::Submission;
use crate::cluster::{Address, ClusterInner, TaskFuture, resolve};
use crate::core::Mode;
use crate::engine::{Control, Progress, Terminal};
use crate::error::ClientError;

/// A connection to a cluster.
///
/// ```rust
/// use kumiki::{Blueprint, Client, Cluster, ClusterConfig};
///
/// let _cluster = Cluster::start(ClusterConfig::new("doc-client:8786").workers(2))?;
///
/// let mut blueprint = Blueprint::with_seed(0);
/// let answer = blueprint.task().name("answer").run(|_| Ok(42))?;
/// let graph = blueprint.finish();
///
/// let value = Client::scoped("doc-client:8786", |client| client.compute(&graph, answer))??;
/// assert_eq!(*value, 42);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Client {
    address: Address,
    cluster: Weak<ClusterInner>,
    open: bool,
}

impl Client {
    /// Connects to the cluster bound to `address`. Fails right away when the
    /// connection string is malformed or nothing is listening there.
    pub fn connect(address: &str) -> Result<Self, ClientError> {
        let address: Address = address.parse()?;

        let Some(cluster) = resolve(&address) else {
            return Err(ClientError::Unreachable(address.to_string()));
        };

        tracing::info!(%address, "connected");

        Ok(Self {
            address,
            cluster: Arc::downgrade(&cluster),
            open: true,
        })
    }

    /// Connects, hands the client to `f`, and closes the client afterwards
    /// whatever `f` returns.
    pub fn scoped<F, R>(address: &str, f: F) -> Result<R, ClientError>
    where
        F: FnOnce(&Client) -> R,
    {
        let mut client = Self::connect(address)?;
        let result = f(&client);
        client.close();
        Ok(result)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Whether the client is open and its cluster still running.
    pub fn is_connected(&self) -> bool {
        self.open
            && self
                .cluster
                .upgrade()
                .is_some_and(|cluster| cluster.is_open())
    }

    /// Submits everything `terminal` depends on for evaluation and returns
    /// immediately. Only connection problems and handles foreign to `graph`
    /// fail here; task failures surface through the returned future.
    pub fn submit<X>(&self, graph: &TaskGraph, terminal: X) -> Result<TaskFuture<X>, ClientError>
    where
        X: Terminal,
    {
        if !self.open {
            return Err(ClientError::Closed);
        }

        let cluster = self
            .cluster
            .upgrade()
            .filter(|cluster| cluster.is_open())
            .ok_or_else(|| ClientError::Disconnected(self.address.to_string()))?;

        let nodes = graph.upstream(&terminal.nodes())?;
        let submission = Arc::new(Submission::new(cluster.next_submission(), nodes.len()));

        tracing::info!(
            submission = submission.id,
            address = %self.address,
            tasks = nodes.len(),
            "submitting graph"
        );

        let driver = {
            let graph = graph.clone();
            let submission = submission.clone();

            move || {
                let on_progress = |progress: &Progress| submission.update(*progress);
                let control = Control {
                    mode: Mode::Remote,
                    cancelled: &submission.cancelled,
                    on_progress: &on_progress,
                    pool: Some(&cluster.pool),
                };

                let result = graph.evaluate(&nodes, &control);
                if let Err(error) = &result {
                    tracing::error!(submission = submission.id, "{error}");
                }

                submission.finish(result);
            }
        };

        std::thread::Builder::new()
            .name(format!("kumiki-submission-{}", submission.id))
            .spawn(driver)?;

        Ok(TaskFuture::new(submission, terminal, self.address.clone()))
    }

    /// Submits and blocks until the result is available.
    pub fn compute<X>(&self, graph: &TaskGraph, terminal: X) -> Result<X::Owned, ClientError>
    where
        X: Terminal,
    {
        let future = self.submit(graph, terminal)?;
        future.wait().map_err(ClientError::from)
    }

    /// Closes the client. Futures already handed out keep working.
    pub fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            tracing::info!(address = %self.address, "client closed");
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::Blueprint;
    use crate::cluster::{Cluster, ClusterConfig, Status};
    use crate::error::{AddressError, ExecError, TaskError};

    fn cluster(address: &str, workers: usize) -> Cluster {
        Cluster::start(ClusterConfig::new(address).workers(workers)).unwrap()
    }

    #[test]
    fn test_connect_errors() {
        assert!(matches!(
            Client::connect("nobody-home:8786"),
            Err(ClientError::Unreachable(_))
        ));
        assert!(matches!(
            Client::connect("nobody-home"),
            Err(ClientError::Address(AddressError::MissingPort(_)))
        ));
    }

    #[test]
    fn test_closed_client_rejects_submissions() {
        let _cluster = cluster("client-test-closed:8786", 1);

        let mut blueprint = Blueprint::with_seed(0);
        let a = blueprint.task().name("a").run(|_| Ok(1)).unwrap();
        let graph = blueprint.finish();

        let mut client = Client::connect("client-test-closed:8786").unwrap();
        assert!(client.is_connected());

        client.close();
        assert!(!client.is_connected());
        assert!(matches!(client.submit(&graph, a), Err(ClientError::Closed)));
    }

    #[test]
    fn test_shut_down_cluster_rejects_submissions() {
        let cluster = cluster("client-test-down:8786", 1);

        let mut blueprint = Blueprint::with_seed(0);
        let a = blueprint.task().name("a").run(|_| Ok(1)).unwrap();
        let graph = blueprint.finish();

        let client = Client::connect("client-test-down:8786").unwrap();
        cluster.shutdown();

        assert!(!client.is_connected());
        assert!(matches!(
            client.submit(&graph, a),
            Err(ClientError::Disconnected(_))
        ));
        assert!(matches!(
            Client::connect("client-test-down:8786"),
            Err(ClientError::Unreachable(_))
        ));
    }

    #[test]
    fn test_scoped_closes_client() {
        let _cluster = cluster("client-test-scoped:8786", 2);

        let mut blueprint = Blueprint::with_seed(0);
        let a = blueprint.task().name("a").run(|_| Ok(5)).unwrap();
        let graph = blueprint.finish();

        let value = Client::scoped("client-test-scoped:8786", |client| {
            client.compute(&graph, a)
        })
        .unwrap()
        .unwrap();

        assert_eq!(*value, 5);
    }

    #[test]
    fn test_independent_nodes_run_concurrently() {
        let _cluster = cluster("client-test-parallel:8786", 2);

        // Both siblings must be inside their bodies at the same time for
        // either to get past the barrier.
        let barrier = Arc::new(Barrier::new(2));
        let mut blueprint = Blueprint::with_seed(0);

        let siblings: Vec<_> = (0..2)
            .map(|i| {
                let barrier = barrier.clone();
                blueprint
                    .task()
                    .name("sibling")
                    .run(move |_| {
                        barrier.wait();
                        Ok(i)
                    })
                    .unwrap()
            })
            .collect();

        let graph = blueprint.finish();
        let client = Client::connect("client-test-parallel:8786").unwrap();

        let future = client.submit(&graph, siblings).unwrap();
        let values = future
            .wait_timeout(Duration::from_secs(10))
            .expect("siblings were serialized")
            .unwrap();

        assert_eq!(values.iter().map(|v| **v).sum::<i32>(), 1);
    }

    #[test]
    fn test_cancel_stops_pending_nodes() {
        let _cluster = cluster("client-test-cancel:8786", 1);

        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let mut blueprint = Blueprint::with_seed(0);
        let first = {
            let started = started.clone();
            let release = release.clone();
            blueprint.task().name("first").run(move |_| {
                started.wait();
                release.wait();
                Ok(1)
            })
        }
        .unwrap();
        let second = blueprint
            .task()
            .name("second")
            .depends_on(first)
            .run(|_, x| Ok(x + 1))
            .unwrap();
        let third = blueprint
            .task()
            .name("third")
            .depends_on(second)
            .run(|_, x| Ok(x + 1))
            .unwrap();

        let graph = blueprint.finish();
        let client = Client::connect("client-test-cancel:8786").unwrap();
        let future = client.submit(&graph, third).unwrap();

        started.wait();
        future.cancel();
        release.wait();

        match future.wait() {
            Err(ExecError::Task(TaskError::Cancelled { task })) => assert_eq!(&*task, "second"),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(future.status(), Status::Cancelled);

        let outcome = future.outcome().unwrap();
        assert_eq!(*outcome.get(first).unwrap(), 1);

        let progress = future.progress();
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.cancelled, 2);
        assert!(progress.is_done());
    }

    #[test]
    fn test_progress_is_visible_while_running() {
        let _cluster = cluster("client-test-progress:8786", 1);

        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let mut blueprint = Blueprint::with_seed(0);
        let first = blueprint.task().name("first").run(|_| Ok(1)).unwrap();
        let gated = {
            let started = started.clone();
            let release = release.clone();
            blueprint
                .task()
                .name("gated")
                .depends_on(first)
                .run(move |_, x| {
                    started.wait();
                    release.wait();
                    Ok(x + 1)
                })
        }
        .unwrap();

        let graph = blueprint.finish();
        let client = Client::connect("client-test-progress:8786").unwrap();
        let future = client.submit(&graph, gated).unwrap();

        started.wait();

        assert_eq!(future.status(), Status::Pending);
        assert!(!future.done());

        let progress = future.progress();
        assert_eq!(progress.total, 2);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.pending(), 1);

        assert!(future.wait_timeout(Duration::from_millis(10)).is_none());

        release.wait();

        assert_eq!(*future.wait().unwrap(), 2);
        assert_eq!(future.status(), Status::Finished);
        assert!(future.progress().is_done());

        let again = future.wait_timeout(Duration::from_millis(10));
        assert_eq!(*again.unwrap().unwrap(), 2);
    }

    #[test]
    fn test_failed_future_reports_origin() {
        let _cluster = cluster("client-test-failed:8786", 2);

        let mut blueprint = Blueprint::with_seed(0);
        let broken = blueprint
            .task()
            .name("load")
            .run(|_| -> anyhow::Result<i32> { anyhow::bail!("missing file") })
            .unwrap();
        let after = blueprint
            .task()
            .name("process")
            .depends_on(broken)
            .run(|_, x| Ok(x * 2))
            .unwrap();

        let graph = blueprint.finish();
        let client = Client::connect("client-test-failed:8786").unwrap();
        let future = client.submit(&graph, after).unwrap();

        let err = future.wait().unwrap_err();
        assert!(matches!(&err, ExecError::Task(e) if e.task() == "load"));
        assert_eq!(future.status(), Status::Error);
        assert!(future.done());
    }

    #[test]
    fn test_resubmission_runs_again() {
        let cluster = cluster("client-test-resubmit:8786", 2);
        let runs = Arc::new(AtomicUsize::new(0));

        let mut blueprint = Blueprint::with_seed(0);
        let a = {
            let runs = runs.clone();
            blueprint.task().name("a").run(move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(3)
            })
        }
        .unwrap();

        let graph = blueprint.finish();
        let fingerprint = graph.fingerprint();
        let client = Client::connect("client-test-resubmit:8786").unwrap();

        let first = client.submit(&graph, a).unwrap();
        let second = client.submit(&graph.clone(), a).unwrap();

        assert_eq!(*first.wait().unwrap(), 3);
        assert_eq!(*second.wait().unwrap(), 3);
        assert_ne!(first.id(), second.id());

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(graph.fingerprint(), fingerprint);
        assert_eq!(cluster.submissions(), 2);
    }

    #[test]
    fn test_futures_outlive_client() {
        let _cluster = cluster("client-test-outlive:8786", 1);

        let mut blueprint = Blueprint::with_seed(0);
        let a = blueprint.task().name("a").run(|_| Ok("done")).unwrap();
        let graph = blueprint.finish();

        let future = {
            let client = Client::connect("client-test-outlive:8786").unwrap();
            client.submit(&graph, a).unwrap()
        };

        assert_eq!(*future.wait().unwrap(), "done");
        assert_eq!(future.address().port(), 8786);
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_await_result() {
        let _cluster = cluster("client-test-async:8786", 2);

        let mut blueprint = Blueprint::with_seed(0);
        let a = blueprint.task().name("a").run(|_| Ok(20)).unwrap();
        let b = blueprint
            .task()
            .name("b")
            .depends_on(a)
            .run(|_, a| Ok(a + 22))
            .unwrap();
        let graph = blueprint.finish();

        let client = Client::connect("client-test-async:8786").unwrap();
        let future = client.submit(&graph, b).unwrap();

        assert_eq!(*future.result().await.unwrap(), 42);
        assert_eq!(future.status(), Status::Finished);
    }
}
