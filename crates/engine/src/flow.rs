//! Execution model.
//!
//! A [`FlowModel`] owns the compiled graph, the shared context and global
//! data, and one [`Scheduler`]. `execute` and `resume` calls are queued
//! FIFO and processed one at a time by a driver task: the next invocation
//! starts only after the previous one received its completed, interrupted
//! or error signal.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use nodes::{GlobalData, NodeRegistry};
use recorder::{MemoryRecorder, Recorder, TaskRecord, TaskStatus};

use crate::config::FlowConfig;
use crate::expression::{ExpressionEvaluator, RhaiEvaluator};
use crate::graph::{FlowGraph, GraphData, LoadReport};
use crate::scheduler::{ExecutionResult, Scheduler};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Start a run. Without `node_id` every start node is seeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    /// Reused when given, generated otherwise.
    #[serde(default)]
    pub execution_id: Option<String>,
    /// Seed this single node instead of the start nodes.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Handed to every seed activation.
    #[serde(default)]
    pub data: Option<Value>,
}

impl ExecuteRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Resume an interrupted activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    pub execution_id: String,
    pub task_id: String,
    pub node_id: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ResumeRequest {
    pub fn new(
        execution_id: impl Into<String>,
        task_id: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            task_id: task_id.into(),
            node_id: node_id.into(),
            data: None,
        }
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------------------------------------------------------------------------
// Invocation queue
// ---------------------------------------------------------------------------

enum InvocationKind {
    Execute(ExecuteRequest),
    Resume(ResumeRequest),
}

struct Invocation {
    kind: InvocationKind,
    reply: oneshot::Sender<Result<ExecutionResult, EngineError>>,
}

#[derive(Default)]
struct InvocationQueue {
    pending: VecDeque<Invocation>,
    active: bool,
}

struct FlowInner {
    config: FlowConfig,
    registry: NodeRegistry,
    global: GlobalData,
    recorder: Arc<dyn Recorder>,
    scheduler: Scheduler,
    invocations: Mutex<InvocationQueue>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct FlowModelBuilder {
    registry: NodeRegistry,
    config: FlowConfig,
    recorder: Option<Arc<dyn Recorder>>,
    evaluator: Option<Arc<dyn ExpressionEvaluator>>,
}

impl FlowModelBuilder {
    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `recorder` instead of a [`MemoryRecorder`] sized from the config.
    pub fn recorder(mut self, recorder: Arc<dyn Recorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Use `evaluator` instead of [`RhaiEvaluator`].
    pub fn evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn build(self) -> FlowModel {
        let Self { registry, config, recorder, evaluator } = self;

        let recorder = recorder
            .unwrap_or_else(|| Arc::new(MemoryRecorder::new(config.max_executions)));
        let evaluator = evaluator.unwrap_or_else(|| Arc::new(RhaiEvaluator::new()));
        let global = GlobalData::new(config.global_data.clone());
        let scheduler = Scheduler::new(
            registry.clone(),
            Arc::new(config.context.clone()),
            global.clone(),
            Arc::clone(&recorder),
            evaluator,
        );

        FlowModel {
            inner: Arc::new(FlowInner {
                config,
                registry,
                global,
                recorder,
                scheduler,
                invocations: Mutex::new(InvocationQueue::default()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FlowModel
// ---------------------------------------------------------------------------

/// Cloneable handle to one execution model.
#[derive(Clone)]
pub struct FlowModel {
    inner: Arc<FlowInner>,
}

impl FlowModel {
    pub fn builder(registry: NodeRegistry) -> FlowModelBuilder {
        FlowModelBuilder {
            registry,
            config: FlowConfig::default(),
            recorder: None,
            evaluator: None,
        }
    }

    /// Compile `data` and make it the graph new activations use.
    pub fn load(&self, data: &GraphData) -> LoadReport {
        let (graph, report) =
            FlowGraph::load(data, &self.inner.registry, &self.inner.config.start_node_type);
        info!(
            nodes = graph.len(),
            start_nodes = graph.start_nodes().len(),
            dropped = report.dropped_nodes.len(),
            dangling_edges = report.dangling_edges.len(),
            "graph loaded"
        );
        self.inner.scheduler.set_graph(Arc::new(graph));
        report
    }

    /// Parse editor JSON and [`load`](Self::load) it.
    pub fn load_json(&self, content: &str) -> Result<LoadReport, EngineError> {
        let data = GraphData::from_json(content)?;
        Ok(self.load(&data))
    }

    pub fn graph(&self) -> Option<Arc<FlowGraph>> {
        self.inner.scheduler.graph()
    }

    /// Queue a run and wait for its first signal.
    ///
    /// # Errors
    /// Invocation-level failures only: nothing loaded, no start node, or an
    /// unknown `node_id`. A failing node resolves `Ok` with an error status.
    #[instrument(
        skip(self, request),
        fields(execution_id = ?request.execution_id, node_id = ?request.node_id)
    )]
    pub async fn execute(&self, request: ExecuteRequest) -> Result<ExecutionResult, EngineError> {
        self.invoke(InvocationKind::Execute(request)).await
    }

    /// Queue a resume of an interrupted task and wait for the next signal.
    #[instrument(
        skip(self, request),
        fields(execution_id = %request.execution_id, task_id = %request.task_id)
    )]
    pub async fn resume(&self, request: ResumeRequest) -> Result<ExecutionResult, EngineError> {
        self.invoke(InvocationKind::Resume(request)).await
    }

    /// Shallow-merge `patch` into the global data.
    pub fn update_global_data(&self, patch: Map<String, Value>) {
        self.inner.global.merge(patch);
    }

    pub fn global_data(&self) -> Arc<Map<String, Value>> {
        self.inner.global.snapshot()
    }

    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.inner.recorder
    }

    /// Latest record of every task of `execution_id`, first-seen order.
    pub async fn execution_records(
        &self,
        execution_id: &str,
    ) -> Result<Vec<TaskRecord>, EngineError> {
        Ok(self.inner.recorder.get_execution_records(execution_id).await?)
    }

    fn invocations(&self) -> MutexGuard<'_, InvocationQueue> {
        self.inner.invocations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn invoke(&self, kind: InvocationKind) -> Result<ExecutionResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        let start_driver = {
            let mut queue = self.invocations();
            queue.pending.push_back(Invocation { kind, reply });
            !std::mem::replace(&mut queue.active, true)
        };
        if start_driver {
            let model = self.clone();
            tokio::spawn(async move { model.drive().await });
        }
        rx.await
            .map_err(|_| EngineError::Invocation("invocation queue shut down".to_owned()))?
    }

    /// Process queued invocations until the queue is empty.
    async fn drive(&self) {
        loop {
            let next = {
                let mut queue = self.invocations();
                match queue.pending.pop_front() {
                    Some(invocation) => invocation,
                    None => {
                        queue.active = false;
                        return;
                    }
                }
            };
            let result = match next.kind {
                InvocationKind::Execute(request) => self.start(request).await,
                InvocationKind::Resume(request) => self.continue_task(request).await,
            };
            if next.reply.send(result).is_err() {
                debug!("invocation caller went away before the result arrived");
            }
        }
    }

    async fn start(&self, request: ExecuteRequest) -> Result<ExecutionResult, EngineError> {
        let graph = self.graph().ok_or(EngineError::NotLoaded)?;
        let scheduler = &self.inner.scheduler;

        let execution_id = request
            .execution_id
            .unwrap_or_else(|| format!("exec_{}", Uuid::new_v4()));

        let seeds = match request.node_id {
            Some(node_id) if graph.contains(&node_id) => vec![node_id],
            Some(node_id) => return Err(EngineError::NodeNotFound(node_id)),
            None => graph.start_nodes().to_vec(),
        };
        if seeds.is_empty() {
            return Err(EngineError::NoneStartNode(self.inner.config.start_node_type.clone()));
        }

        info!(execution_id = %execution_id, seeds = ?seeds, "starting execution");
        let signal = scheduler.subscribe(&execution_id);
        for node_id in seeds {
            scheduler.add_task(&execution_id, node_id, request.data.clone());
        }
        scheduler.run(&execution_id);

        signal.await.map_err(|_| {
            EngineError::Invocation(format!("signal channel of '{execution_id}' closed"))
        })
    }

    async fn continue_task(&self, request: ResumeRequest) -> Result<ExecutionResult, EngineError> {
        let graph = self.graph().ok_or(EngineError::NotLoaded)?;
        let scheduler = &self.inner.scheduler;
        let ResumeRequest { execution_id, task_id, node_id, data } = request;

        let latest = self.inner.recorder.get_task(&task_id).await?;
        let resumable = latest.is_some_and(|r| {
            r.execution_id == execution_id
                && r.node_id == node_id
                && r.status == Some(TaskStatus::Interrupted)
        }) && !scheduler.is_in_flight(&execution_id, &task_id);
        if !resumable {
            return Err(EngineError::TaskNotInterrupted { execution_id, task_id, node_id });
        }
        if !graph.contains(&node_id) {
            return Err(EngineError::NodeNotFound(node_id));
        }

        let signal = scheduler.subscribe(&execution_id);
        scheduler.resume(&execution_id, &task_id, &node_id, data);

        signal.await.map_err(|_| {
            EngineError::Invocation(format!("signal channel of '{execution_id}' closed"))
        })
    }
}
