//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted in-process runner that records starts, finishes and peak
//!   concurrency
//! - A child factory that counts creations and destructions and records
//!   which child ran which leaf
//! - Temporary workspaces with a `marshal.toml` for worker-process tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tempfile::TempDir;

use marshal::child::{Child, ChildFactory, ChildId, InProcessChild};
use marshal::config::Config;
use marshal::core::{ExecutionResult, Options, TargetNode, TargetSpec};
use marshal::log::Logger;
use marshal::orchestration::ProgressSink;
use marshal::runner::{ResultStream, TargetRunner};

/// How long a normal scripted leaf takes.
pub const LEAF_TIME: Duration = Duration::from_millis(20);

/// What the scripted runner saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
}

#[derive(Default)]
struct Tracker {
    events: Mutex<Vec<Event>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

/// In-process runner whose behaviour is picked by the leaf label:
/// `fail*` fails, `hang*` never finishes, anything else succeeds after
/// [`LEAF_TIME`].
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    tracker: Arc<Tracker>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.tracker.events.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Started(label) => Some(label),
                _ => None,
            })
            .collect()
    }

    pub fn finished(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Finished(label) => Some(label),
                _ => None,
            })
            .collect()
    }

    /// Highest number of leaves that were running at once.
    pub fn peak(&self) -> usize {
        self.tracker.peak.load(Ordering::SeqCst)
    }

    async fn execute(&self, label: String) -> ExecutionResult {
        let tracker = &self.tracker;
        tracker.events.lock().unwrap().push(Event::Started(label.clone()));
        let now = tracker.running.fetch_add(1, Ordering::SeqCst) + 1;
        tracker.peak.fetch_max(now, Ordering::SeqCst);
        let _running = RunningGuard(tracker.clone());

        if label.starts_with("hang") {
            futures::future::pending::<()>().await;
        }
        tokio::time::sleep(LEAF_TIME).await;

        tracker.events.lock().unwrap().push(Event::Finished(label.clone()));
        if label.starts_with("fail") {
            ExecutionResult::failure(format!("{label} failed"))
        } else {
            ExecutionResult::success()
        }
    }
}

struct RunningGuard(Arc<Tracker>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TargetRunner for ScriptedRunner {
    fn run(&self, spec: TargetSpec, _extra: Options, _logger: Logger) -> ResultStream<'_> {
        let label = spec.to_string();
        futures::stream::once(async move { Ok(self.execute(label).await) }).boxed()
    }
}

#[derive(Default)]
struct PoolStats {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    assignments: Mutex<Vec<(String, ChildId)>>,
}

/// Child factory over [`ScriptedRunner`] that keeps books on its children.
#[derive(Clone)]
pub struct TrackedFactory {
    runner: ScriptedRunner,
    stats: Arc<PoolStats>,
}

impl TrackedFactory {
    pub fn new(runner: ScriptedRunner) -> Self {
        Self {
            runner,
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn created(&self) -> usize {
        self.stats.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.stats.destroyed.load(Ordering::SeqCst)
    }

    /// The child each leaf was sent to, in dispatch order.
    pub fn assignments(&self) -> Vec<(String, ChildId)> {
        self.stats.assignments.lock().unwrap().clone()
    }

    pub fn child_of(&self, label: &str) -> ChildId {
        self.assignments()
            .into_iter()
            .find(|(l, _)| l == label)
            .map(|(_, id)| id)
            .unwrap_or_else(|| panic!("Leaf {label} never ran"))
    }

    pub fn distinct_children(&self) -> usize {
        let mut ids: Vec<ChildId> = self.assignments().into_iter().map(|(_, id)| id).collect();
        ids.sort_by_key(|id| id.0);
        ids.dedup();
        ids.len()
    }
}

impl ChildFactory for TrackedFactory {
    fn create(&self) -> Box<dyn Child> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Box::new(TrackedChild {
            inner: InProcessChild::new(Arc::new(self.runner.clone()), Logger::discard()),
            stats: self.stats.clone(),
            destroyed: AtomicBool::new(false),
        })
    }
}

struct TrackedChild {
    inner: InProcessChild,
    stats: Arc<PoolStats>,
    destroyed: AtomicBool,
}

impl TrackedChild {
    fn assign(&self, label: String) {
        self.stats
            .assignments
            .lock()
            .unwrap()
            .push((label, self.inner.id()));
    }
}

impl Child for TrackedChild {
    fn id(&self) -> ChildId {
        self.inner.id()
    }

    fn execute_target(&mut self, spec: TargetSpec, extra: Options) -> ResultStream<'_> {
        self.assign(spec.to_string());
        self.inner.execute_target(spec, extra)
    }

    fn execute_builder(
        &mut self,
        project: String,
        builder: String,
        options: Options,
        target: Option<String>,
    ) -> ResultStream<'_> {
        self.assign(format!("{project}:{builder}"));
        self.inner.execute_builder(project, builder, options, target)
    }

    fn destroy(&mut self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.destroy();
    }
}

/// Progress sink that remembers every notification.
#[derive(Default)]
pub struct RecordingProgress {
    pub total: Mutex<Option<usize>>,
    pub finished: Mutex<Vec<(String, bool, usize, usize)>>,
}

impl ProgressSink for RecordingProgress {
    fn started(&self, total: usize) {
        *self.total.lock().unwrap() = Some(total);
    }

    fn leaf_finished(&self, label: &str, success: bool, completed: usize, total: usize) {
        self.finished
            .lock()
            .unwrap()
            .push((label.to_string(), success, completed, total));
    }
}

/// Capturing logger.
pub fn capture_logger() -> (Logger, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let logger = Logger::from_fn(move |_, message| sink.lock().unwrap().push(message.to_string()));
    (logger, lines)
}

pub fn leaf(name: &str) -> TargetNode {
    TargetNode::leaf(name)
}

pub fn leaves(names: &[&str]) -> Vec<TargetNode> {
    names.iter().map(|n| leaf(n)).collect()
}

/// A temporary workspace with a `marshal.toml`.
pub struct TestWorkspace {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestWorkspace {
    /// Create a workspace whose targets are the given shell commands.
    pub fn new(targets: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();
        let config = Config {
            scheduler: None,
            worker_program: Some(worker_binary().to_string_lossy().into_owned()),
            targets: targets
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        };
        config.save(&path).expect("Failed to write marshal.toml");
        Self { temp_dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The `marshal-worker` binary built for this test run.
pub fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_marshal-worker"))
}
