//! Task scheduler: polls for due tasks and dispatches their flows.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use agentflow_config::SchedulerSettings;
use agentflow_hooks::{HookRegistry, SchedulerEvent};
use agentflow_storage::SchedulerStorage;
use agentflow_types::{
    ExecutionLog, ExecutionStatus, LogLevel, ScheduledTask, ScheduledTaskExecution, TaskRunStatus,
};

use crate::adapter::{FlowEngine, FlowInvocationAdapter, FlowSource, NodeDefinitionRegistry};
use crate::error::{Result, SchedulerError};
use crate::inputs::normalize_inputs;
use crate::lifecycle::{ExecutionRecorder, LogCollector};
use crate::next_run::calculate_next_run;
use crate::validation::validate_task;

/// Tunables for a [`TaskScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Period between due-task checks.
    pub tick_interval: Duration,
    /// Upper bound on one flow run.
    pub execution_timeout: Duration,
    /// Execution records kept per task.
    pub max_executions_per_task: usize,
    /// Period between retention passes.
    pub cleanup_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerOptions {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            tick_interval: Duration::from_secs(settings.tick_interval_secs.max(1)),
            execution_timeout: Duration::from_secs(settings.execution_timeout_secs),
            max_executions_per_task: settings.max_executions_per_task,
            cleanup_interval: Duration::from_secs(settings.cleanup_interval_secs),
        }
    }
}

/// Snapshot of scheduler activity.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub running_tasks: usize,
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub is_running: bool,
}

/// Removes a task id from the in-flight set when the dispatch settles.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    task_id: String,
}

impl InFlightGuard {
    /// `None` if the task is already in flight.
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, task_id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.to_string());
        inserted.then(|| Self {
            set: set.clone(),
            task_id: task_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task_id);
    }
}

struct LoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SchedulerCore {
    storage: Arc<SchedulerStorage>,
    adapter: FlowInvocationAdapter,
    recorder: ExecutionRecorder,
    hooks: Arc<HookRegistry>,
    options: SchedulerOptions,
    in_flight: Arc<Mutex<HashSet<String>>>,
    dispatches: TaskTracker,
    last_cleanup: Mutex<Option<Instant>>,
}

/// Polling scheduler for stored tasks.
///
/// Each instance owns its own in-flight set and loop; nothing is global.
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
    loop_state: tokio::sync::Mutex<Option<LoopHandle>>,
}

impl TaskScheduler {
    /// Scheduler that loads flows and custom nodes from `storage`, with a
    /// private hook registry.
    pub fn new(
        storage: Arc<SchedulerStorage>,
        engine: Arc<dyn FlowEngine>,
        options: SchedulerOptions,
    ) -> Self {
        Self::with_hooks(storage, engine, options, Arc::new(HookRegistry::new()))
    }

    /// Like [`TaskScheduler::new`], emitting events into a registry shared
    /// with the hosting application.
    pub fn with_hooks(
        storage: Arc<SchedulerStorage>,
        engine: Arc<dyn FlowEngine>,
        options: SchedulerOptions,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self::with_sources(
            storage.clone(),
            storage.clone(),
            storage,
            engine,
            options,
            hooks,
        )
    }

    /// Scheduler with external flow and node-definition sources.
    pub fn with_sources(
        storage: Arc<SchedulerStorage>,
        flows: Arc<dyn FlowSource>,
        nodes: Arc<dyn NodeDefinitionRegistry>,
        engine: Arc<dyn FlowEngine>,
        options: SchedulerOptions,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let adapter =
            FlowInvocationAdapter::new(flows, nodes, engine).with_timeout(options.execution_timeout);
        let core = SchedulerCore {
            recorder: ExecutionRecorder::new(storage.clone()),
            storage,
            adapter,
            hooks,
            options,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            dispatches: TaskTracker::new(),
            last_cleanup: Mutex::new(None),
        };
        Self {
            core: Arc::new(core),
            loop_state: tokio::sync::Mutex::new(None),
        }
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.core.hooks
    }

    pub fn storage(&self) -> &Arc<SchedulerStorage> {
        &self.core.storage
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.core.options
    }

    // ─── Lifecycle ───────────────────────────────────

    /// Start the polling loop. Checks once immediately, then every tick.
    pub async fn start(&self) {
        let mut state = self.loop_state.lock().await;
        if state.is_some() {
            warn!("Scheduler already running, ignoring start");
            return;
        }

        let cancel = CancellationToken::new();
        let core = self.core.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { core.run_loop(token).await });
        *state = Some(LoopHandle { cancel, handle });

        info!(
            tick_secs = self.core.options.tick_interval.as_secs(),
            "Task scheduler started"
        );
        self.core.hooks.emit(SchedulerEvent::SchedulerStarted).await;
    }

    /// Stop future ticks. In-flight executions keep running.
    pub async fn stop(&self) {
        let Some(LoopHandle { cancel, handle }) = self.loop_state.lock().await.take() else {
            warn!("Scheduler not running, ignoring stop");
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            warn!("Scheduler loop ended abnormally: {e}");
        }
        info!("Task scheduler stopped");
        self.core.hooks.emit(SchedulerEvent::SchedulerStopped).await;
    }

    /// Stop the loop (if running) and wait for in-flight executions to settle.
    pub async fn dispose(&self) {
        if self.is_running().await {
            self.stop().await;
        }
        self.wait_for_idle().await;
    }

    pub async fn is_running(&self) -> bool {
        self.loop_state.lock().await.is_some()
    }

    /// Wait until every dispatched execution has settled.
    pub async fn wait_for_idle(&self) {
        self.core.dispatches.close();
        self.core.dispatches.wait().await;
        self.core.dispatches.reopen();
    }

    // ─── Dispatch ───────────────────────────────────

    /// Run one due-task check. Returns the ids of the tasks dispatched.
    pub async fn check_and_execute_tasks(&self) -> Vec<String> {
        self.core.check_and_execute_tasks().await
    }

    /// Run a task immediately and wait for the result, regardless of its
    /// schedule. Fails if the task is already in flight.
    pub async fn execute_task_now(&self, task_id: &str) -> Result<ScheduledTaskExecution> {
        let task = self.require_task(task_id).await?;
        let guard = InFlightGuard::acquire(&self.core.in_flight, task_id)
            .ok_or_else(|| SchedulerError::AlreadyRunning(task_id.to_string()))?;
        let result = self.core.execute_task(task).await;
        drop(guard);
        result
    }

    pub fn is_in_flight(&self, task_id: &str) -> bool {
        self.core
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(task_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.core
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Prune execution history of every task down to the retention limit.
    pub async fn cleanup_old_executions(&self) -> Result<usize> {
        self.core.cleanup_old_executions().await
    }

    // ─── Task Management ───────────────────────────────────

    /// Validate and store a new task, computing its first `next_run`.
    pub async fn create_task(&self, mut task: ScheduledTask) -> Result<ScheduledTask> {
        validate_task(&task)?;
        normalize_inputs(&mut task.inputs);
        if self
            .core
            .adapter
            .flows()
            .load_flow(&task.agent_flow_id)
            .await?
            .is_none()
        {
            return Err(SchedulerError::FlowNotFound(task.agent_flow_id.clone()));
        }

        task.schedule.status = TaskRunStatus::Idle;
        task.schedule.next_run = task
            .schedule
            .enabled
            .then(|| calculate_next_run(&task.schedule, &Local::now()));
        self.core.storage.save_task(&task).await?;

        info!(
            task_id = %task.id,
            flow_id = %task.agent_flow_id,
            interval = %task.schedule.interval,
            next_run = ?task.schedule.next_run,
            "Scheduled task created"
        );
        Ok(task)
    }

    /// Replace an existing task's definition and recompute its `next_run`.
    pub async fn update_task(&self, mut task: ScheduledTask) -> Result<ScheduledTask> {
        self.require_task(&task.id).await?;
        validate_task(&task)?;
        normalize_inputs(&mut task.inputs);
        task.schedule.next_run = task
            .schedule
            .enabled
            .then(|| calculate_next_run(&task.schedule, &Local::now()));
        self.core.storage.save_task(&task).await?;
        Ok(task)
    }

    /// Stop future runs of a task. A run already in flight is not interrupted.
    pub async fn cancel_task(&self, task_id: &str) -> Result<ScheduledTask> {
        let task = self
            .core
            .modify_task(task_id, |task| task.schedule.enabled = false)
            .await?;
        info!(task_id, "Scheduled task cancelled");
        Ok(task)
    }

    /// Re-enable a cancelled task, scheduling it from now.
    pub async fn enable_task(&self, task_id: &str) -> Result<ScheduledTask> {
        self.core
            .modify_task(task_id, |task| {
                task.schedule.enabled = true;
                task.schedule.next_run = Some(calculate_next_run(&task.schedule, &Local::now()));
            })
            .await
    }

    /// Delete a task and its execution history.
    pub async fn delete_task(&self, task_id: &str) -> Result<bool> {
        let removed = self.core.storage.delete_task(task_id).await?;
        if removed {
            info!(task_id, "Scheduled task deleted");
        }
        Ok(removed)
    }

    /// Recompute and persist `next_run` from the current time.
    pub async fn update_task_next_run(&self, task_id: &str) -> Result<DateTime<Utc>> {
        let task = self
            .core
            .modify_task(task_id, |task| {
                task.schedule.next_run = Some(calculate_next_run(&task.schedule, &Local::now()));
            })
            .await?;
        task.schedule
            .next_run
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))
    }

    pub async fn get_stats(&self) -> Result<SchedulerStats> {
        let storage = &self.core.storage;
        let tasks = storage.list_tasks().await?;
        Ok(SchedulerStats {
            total_tasks: tasks.len(),
            enabled_tasks: tasks.iter().filter(|t| t.schedule.enabled).count(),
            running_tasks: self.in_flight_count(),
            total_executions: storage.count_executions(None).await?,
            successful_executions: storage
                .count_executions(Some(ExecutionStatus::Completed))
                .await?,
            failed_executions: storage.count_executions(Some(ExecutionStatus::Error)).await?,
            is_running: self.is_running().await,
        })
    }

    async fn require_task(&self, task_id: &str) -> Result<ScheduledTask> {
        self.core
            .storage
            .get_task(task_id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))
    }
}

impl SchedulerCore {
    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.options.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // The first tick completes immediately.
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            self.check_and_execute_tasks().await;

            if self.cleanup_due() {
                if let Err(e) = self.cleanup_old_executions().await {
                    warn!("Execution history cleanup failed: {e}");
                }
            }
        }
        debug!("Scheduler loop exited");
    }

    async fn check_and_execute_tasks(self: &Arc<Self>) -> Vec<String> {
        let due = match self.storage.get_tasks_due_for_execution(Utc::now()).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Failed to query due tasks: {e}");
                return Vec::new();
            }
        };

        let mut dispatched = Vec::with_capacity(due.len());
        for task in due {
            let Some(guard) = InFlightGuard::acquire(&self.in_flight, &task.id) else {
                debug!(task_id = %task.id, "Task already running, skipping");
                self.hooks
                    .emit(SchedulerEvent::TaskSkipped {
                        task_id: task.id.clone(),
                        reason: "already running".into(),
                    })
                    .await;
                continue;
            };

            dispatched.push(task.id.clone());
            let core = self.clone();
            self.dispatches.spawn(async move {
                let task_id = task.id.clone();
                if let Err(e) = core.execute_task(task).await {
                    error!(task_id = %task_id, "Scheduled execution could not be recorded: {e}");
                }
                drop(guard);
            });
        }

        if !dispatched.is_empty() {
            debug!(count = dispatched.len(), "Dispatched due tasks");
        }
        dispatched
    }

    /// Run one task end to end. Flow failures are recorded on the execution
    /// and the task; only storage failures are returned as errors.
    async fn execute_task(&self, task: ScheduledTask) -> Result<ScheduledTaskExecution> {
        info!(task_id = %task.id, flow_id = %task.agent_flow_id, "Executing scheduled task");

        if let Err(e) = self
            .modify_task(&task.id, |t| t.schedule.status = TaskRunStatus::Running)
            .await
        {
            warn!(task_id = %task.id, "Failed to mark task running: {e}");
        }

        let mut record = match self.recorder.begin(&task).await {
            Ok(record) => record,
            Err(e) => {
                // Still advance the schedule so the task is not retried every tick.
                self.finish_task(&task.id, Some(e.to_string())).await;
                return Err(e);
            }
        };
        self.hooks
            .emit(SchedulerEvent::TaskDispatched {
                task_id: task.id.clone(),
                execution_id: record.id.clone(),
            })
            .await;

        let logs = LogCollector::new();
        let result = self
            .adapter
            .execute(&task.agent_flow_id, &task.inputs, logs.sink(&task.id))
            .await;

        let failure = match result {
            Ok(output) => {
                logs.merge(output.logs);
                self.recorder
                    .complete(&mut record, output.outputs, logs.snapshot())
                    .await?;
                info!(
                    task_id = %task.id,
                    duration_ms = record.duration.unwrap_or_default(),
                    "Scheduled task completed"
                );
                self.hooks
                    .emit(SchedulerEvent::TaskCompleted {
                        task_id: task.id.clone(),
                        execution_id: record.id.clone(),
                        duration_ms: record.duration.unwrap_or_default(),
                    })
                    .await;
                None
            }
            Err(e) => {
                let message = e.to_string();
                logs.push(ExecutionLog::new(LogLevel::Error, message.clone()));
                self.recorder
                    .fail(&mut record, &message, logs.snapshot())
                    .await?;
                warn!(task_id = %task.id, "Scheduled task failed: {message}");
                self.hooks
                    .emit(SchedulerEvent::TaskFailed {
                        task_id: task.id.clone(),
                        execution_id: record.id.clone(),
                        error: message.clone(),
                    })
                    .await;
                Some(message)
            }
        };

        self.finish_task(&task.id, failure).await;
        Ok(record)
    }

    /// Update run counters and advance `next_run` after a run settles.
    async fn finish_task(&self, task_id: &str, failure: Option<String>) {
        let result = self
            .modify_task(task_id, |task| {
                let now = Local::now();
                task.schedule.last_run = Some(now.with_timezone(&Utc));
                task.schedule.next_run = Some(calculate_next_run(&task.schedule, &now));
                task.metadata.total_runs += 1;
                match &failure {
                    None => {
                        task.metadata.success_runs += 1;
                        task.metadata.last_error = None;
                        task.schedule.status = TaskRunStatus::Idle;
                    }
                    Some(message) => {
                        task.metadata.last_error = Some(message.clone());
                        task.schedule.status = TaskRunStatus::Error;
                    }
                }
            })
            .await;

        match result {
            Ok(task) => debug!(task_id, next_run = ?task.schedule.next_run, "Task rescheduled"),
            // Deleted while running.
            Err(SchedulerError::TaskNotFound(_)) => {
                debug!(task_id, "Task removed during execution, not rescheduling")
            }
            Err(e) => error!(task_id, "Failed to update task after execution: {e}"),
        }
    }

    /// Read-modify-write of a single task record. Last write wins.
    async fn modify_task<F>(&self, task_id: &str, f: F) -> Result<ScheduledTask>
    where
        F: FnOnce(&mut ScheduledTask),
    {
        let mut task = self
            .storage
            .get_task(task_id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
        f(&mut task);
        self.storage.save_task(&task).await?;
        Ok(task)
    }

    fn cleanup_due(&self) -> bool {
        let mut last = self
            .last_cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if at.elapsed() < self.options.cleanup_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    async fn cleanup_old_executions(&self) -> Result<usize> {
        let mut deleted = 0;
        for task in self.storage.list_tasks().await? {
            deleted += self
                .recorder
                .retain(&task.id, self.options.max_executions_per_task)
                .await?;
        }
        if deleted > 0 {
            info!(deleted, "Cleaned up old execution records");
        }
        Ok(deleted)
    }
}
