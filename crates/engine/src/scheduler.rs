//! Scheduler: per-execution ready-queue and in-flight set.
//!
//! `run` drains an execution's ready-queue, gives every entry a fresh task
//! id and spawns it as an independent tokio task. Each activation settles
//! back into the scheduler:
//!
//! - *completed*: firing targets are queued, the task leaves the in-flight
//!   set and the queue is drained again. An execution with nothing ready
//!   and nothing in flight is quiescent and signals `Completed`.
//! - *interrupted* / *failed*: the task leaves the in-flight set and the
//!   signal goes out at once, while sibling branches keep running.
//!
//! There is no join: a node reached over N firing edges runs N times.
//! Signals go to the waiter registered with [`Scheduler::subscribe`]; the
//! first signal consumes it and later ones are dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nodes::{ExecutionContext, GlobalData, NodeRegistry};
use recorder::{Recorder, TaskRecord, TaskStatus};

use crate::expression::ExpressionEvaluator;
use crate::graph::FlowGraph;
use crate::unit::{Activation, NodeUnit, Settlement};

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Interrupted,
    Error,
}

/// Payload of a completed / interrupted / error signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    /// Node that produced the signal (the last one settled, for completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ExecutionResult {
    fn new(
        execution_id: &str,
        activation: Option<&Activation>,
        status: ExecutionStatus,
        detail: Option<Value>,
    ) -> Self {
        Self {
            execution_id: execution_id.to_owned(),
            node_id: activation.map(|a| a.node_id.clone()),
            task_id: activation.map(|a| a.task_id.clone()),
            node_type: activation.map(|a| a.node_type.clone()),
            status,
            detail,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-execution state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct QueuedTask {
    node_id: String,
    data: Option<Value>,
}

#[derive(Debug, Default)]
struct ExecutionQueue {
    ready: VecDeque<QueuedTask>,
    in_flight: HashSet<String>,
    last_settled: Option<Activation>,
}

/// What a drain of the ready-queue produced.
enum Drained {
    Started(Vec<(String, QueuedTask)>),
    Quiescent(Option<Activation>),
}

enum Mode {
    Execute,
    Resume,
}

struct SchedulerInner {
    graph: RwLock<Option<Arc<FlowGraph>>>,
    registry: NodeRegistry,
    context: Arc<Value>,
    global: GlobalData,
    recorder: Arc<dyn Recorder>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    executions: Mutex<HashMap<String, ExecutionQueue>>,
    waiters: Mutex<HashMap<String, oneshot::Sender<ExecutionResult>>>,
}

/// Cloneable scheduler handle.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        registry: NodeRegistry,
        context: Arc<Value>,
        global: GlobalData,
        recorder: Arc<dyn Recorder>,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                graph: RwLock::new(None),
                registry,
                context,
                global,
                recorder,
                evaluator,
                executions: Mutex::new(HashMap::new()),
                waiters: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Install the graph new activations are built from.
    pub fn set_graph(&self, graph: Arc<FlowGraph>) {
        *self.inner.graph.write().unwrap_or_else(PoisonError::into_inner) = Some(graph);
    }

    pub fn graph(&self) -> Option<Arc<FlowGraph>> {
        self.inner.graph.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn executions(&self) -> MutexGuard<'_, HashMap<String, ExecutionQueue>> {
        self.inner.executions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<ExecutionResult>>> {
        self.inner.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register the waiter for the next signal of `execution_id`.
    pub fn subscribe(&self, execution_id: &str) -> oneshot::Receiver<ExecutionResult> {
        let (tx, rx) = oneshot::channel();
        if self.waiters().insert(execution_id.to_owned(), tx).is_some() {
            warn!(execution_id = %execution_id, "replacing an unconsumed signal waiter");
        }
        rx
    }

    /// Append `node_id` to the ready-queue of `execution_id`.
    pub fn add_task(&self, execution_id: &str, node_id: impl Into<String>, data: Option<Value>) {
        self.executions()
            .entry(execution_id.to_owned())
            .or_default()
            .ready
            .push_back(QueuedTask { node_id: node_id.into(), data });
    }

    /// Start everything that is ready, or signal completion if the
    /// execution is quiescent.
    pub fn run(&self, execution_id: &str) {
        let drained = {
            let mut executions = self.executions();
            drain(&mut executions, execution_id)
        };
        self.dispatch(execution_id, drained);
    }

    /// Re-register an interrupted task as in flight and run its `on_resume`.
    pub fn resume(&self, execution_id: &str, task_id: &str, node_id: &str, data: Option<Value>) {
        self.executions()
            .entry(execution_id.to_owned())
            .or_default()
            .in_flight
            .insert(task_id.to_owned());
        info!(
            execution_id = %execution_id,
            task_id = %task_id,
            node_id = %node_id,
            "resuming task"
        );
        self.spawn_activation(
            execution_id.to_owned(),
            task_id.to_owned(),
            QueuedTask { node_id: node_id.to_owned(), data },
            Mode::Resume,
        );
    }

    /// Whether `task_id` is currently running in `execution_id`.
    pub fn is_in_flight(&self, execution_id: &str, task_id: &str) -> bool {
        self.executions()
            .get(execution_id)
            .is_some_and(|q| q.in_flight.contains(task_id))
    }

    fn dispatch(&self, execution_id: &str, drained: Drained) {
        match drained {
            Drained::Started(tasks) => {
                for (task_id, task) in tasks {
                    self.spawn_activation(execution_id.to_owned(), task_id, task, Mode::Execute);
                }
            }
            Drained::Quiescent(last) => {
                info!(execution_id = %execution_id, "execution completed");
                self.signal(ExecutionResult::new(
                    execution_id,
                    last.as_ref(),
                    ExecutionStatus::Completed,
                    None,
                ));
            }
        }
    }

    fn spawn_activation(
        &self,
        execution_id: String,
        task_id: String,
        task: QueuedTask,
        mode: Mode,
    ) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let settlement = match scheduler.build_unit(&execution_id, &task_id, &task.node_id) {
                Ok(unit) => {
                    let activation = unit.activation().clone();
                    let running = match mode {
                        Mode::Execute => unit.execute(task.data).boxed(),
                        Mode::Resume => unit.resume(task.data).boxed(),
                    };
                    AssertUnwindSafe(running)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Settlement::failed(activation, "node panicked"))
                }
                Err(settlement) => settlement,
            };
            scheduler.settle(settlement).await;
        });
    }

    fn build_unit(
        &self,
        execution_id: &str,
        task_id: &str,
        node_id: &str,
    ) -> Result<NodeUnit, Settlement> {
        let spec = self.graph().and_then(|g| g.node(node_id).cloned()).ok_or_else(|| {
            let activation = Activation {
                execution_id: execution_id.to_owned(),
                task_id: task_id.to_owned(),
                node_id: node_id.to_owned(),
                node_type: String::new(),
                properties: Value::Null,
            };
            Settlement::failed(activation, format!("node '{node_id}' is not in the loaded graph"))
        })?;

        let activation = Activation::new(execution_id, task_id, &spec);
        let created =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.registry.create(&spec)));
        let node = created
            .map_err(|_| Settlement::failed(activation.clone(), "node factory panicked"))?
            .map_err(|e| Settlement::failed(activation.clone(), e.to_string()))?;

        debug!(
            execution_id = %execution_id,
            node_id = %node_id,
            task_id = %task_id,
            "activating node"
        );
        let ctx = ExecutionContext {
            node: spec,
            context: Arc::clone(&self.inner.context),
            global: self.inner.global.clone(),
        };
        Ok(NodeUnit::new(activation, node, ctx, Arc::clone(&self.inner.evaluator)))
    }

    async fn settle(&self, settlement: Settlement) {
        self.record(&settlement).await;

        let execution_id = settlement.activation().execution_id.clone();
        match settlement {
            Settlement::Completed { activation, outgoing, .. } => {
                let drained = {
                    let mut executions = self.executions();
                    let queue = executions.entry(execution_id.clone()).or_default();
                    for edge in outgoing {
                        queue.ready.push_back(QueuedTask {
                            node_id: edge.peer_node_id,
                            data: None,
                        });
                    }
                    queue.in_flight.remove(&activation.task_id);
                    queue.last_settled = Some(activation);
                    drain(&mut executions, &execution_id)
                };
                self.dispatch(&execution_id, drained);
            }
            Settlement::Interrupted { activation, detail } => {
                info!(
                    execution_id = %execution_id,
                    node_id = %activation.node_id,
                    task_id = %activation.task_id,
                    "execution interrupted"
                );
                self.release(&activation);
                self.signal(ExecutionResult::new(
                    &execution_id,
                    Some(&activation),
                    ExecutionStatus::Interrupted,
                    detail,
                ));
            }
            Settlement::Failed { activation, detail } => {
                error!(
                    execution_id = %execution_id,
                    node_id = %activation.node_id,
                    task_id = %activation.task_id,
                    detail = %detail,
                    "activation failed"
                );
                self.release(&activation);
                self.signal(ExecutionResult::new(
                    &execution_id,
                    Some(&activation),
                    ExecutionStatus::Error,
                    Some(detail),
                ));
            }
        }
    }

    /// Drop a task from the in-flight set without draining, forgetting the
    /// execution once nothing is left.
    fn release(&self, activation: &Activation) {
        let mut executions = self.executions();
        if let Some(queue) = executions.get_mut(&activation.execution_id) {
            queue.in_flight.remove(&activation.task_id);
            queue.last_settled = Some(activation.clone());
            if queue.ready.is_empty() && queue.in_flight.is_empty() {
                executions.remove(&activation.execution_id);
            }
        }
    }

    async fn record(&self, settlement: &Settlement) {
        let (activation, status, detail) = match settlement {
            Settlement::Completed { activation, detail, .. } => {
                (activation, TaskStatus::Success, detail.clone())
            }
            Settlement::Interrupted { activation, detail } => {
                (activation, TaskStatus::Interrupted, detail.clone())
            }
            Settlement::Failed { activation, detail } => {
                (activation, TaskStatus::Error, Some(detail.clone()))
            }
        };
        let record = TaskRecord {
            execution_id: activation.execution_id.clone(),
            task_id: activation.task_id.clone(),
            node_id: activation.node_id.clone(),
            node_type: activation.node_type.clone(),
            timestamp: Utc::now(),
            properties: activation.properties.clone(),
            status: Some(status),
            detail,
        };
        if let Err(e) = self.inner.recorder.add_task(record).await {
            error!(
                execution_id = %activation.execution_id,
                task_id = %activation.task_id,
                error = %e,
                "failed to record task"
            );
        }
    }

    fn signal(&self, result: ExecutionResult) {
        match self.waiters().remove(&result.execution_id) {
            Some(tx) => {
                if tx.send(result).is_err() {
                    debug!("signal receiver already dropped");
                }
            }
            None => debug!(
                execution_id = %result.execution_id,
                status = ?result.status,
                "no waiter for signal, dropping"
            ),
        }
    }
}

/// Take everything that is ready for `execution_id`, or report quiescence
/// (and forget the execution) when nothing is ready or in flight.
fn drain(executions: &mut HashMap<String, ExecutionQueue>, execution_id: &str) -> Drained {
    let Some(queue) = executions.get_mut(execution_id) else {
        return Drained::Quiescent(None);
    };
    if queue.ready.is_empty() {
        if queue.in_flight.is_empty() {
            let last = executions.remove(execution_id).and_then(|q| q.last_settled);
            return Drained::Quiescent(last);
        }
        return Drained::Started(Vec::new());
    }

    let tasks: Vec<(String, QueuedTask)> = queue
        .ready
        .drain(..)
        .map(|task| (Uuid::new_v4().to_string(), task))
        .collect();
    queue.in_flight.extend(tasks.iter().map(|(task_id, _)| task_id.clone()));
    Drained::Started(tasks)
}
