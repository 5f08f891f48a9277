use std::path::Path;

use anyhow::{Context as _, bail};

use agentflow_scheduler::TaskScheduler;
use agentflow_scheduler::inputs::{file_input, input_template, mime_from_path};
use agentflow_storage::SchedulerStorage;
use agentflow_types::{
    ScheduleInterval, ScheduledInputValue, ScheduledTask, ScheduledTaskExecution, TaskSchedule,
};

/// Arguments of `tasks add`.
pub struct AddRequest {
    pub flow_id: String,
    pub interval: ScheduleInterval,
    pub time: Option<String>,
    pub minute_interval: Option<u32>,
    /// `NODE_NAME=VALUE`
    pub inputs: Vec<String>,
    /// `NODE_NAME=PATH`
    pub files: Vec<String>,
}

fn split_assignment(raw: &str) -> anyhow::Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => bail!("expected NAME=VALUE, got '{raw}'"),
    }
}

/// Fill the flow's input template from `NAME=VALUE` text assignments.
/// Names that match no input node are appended as free text inputs.
pub fn apply_text_inputs(
    template: &mut Vec<ScheduledInputValue>,
    assignments: &[String],
) -> anyhow::Result<()> {
    for raw in assignments {
        let (name, value) = split_assignment(raw)?;
        match template.iter_mut().find(|i| i.node_name == name) {
            Some(input) => input.value = value.to_string(),
            None => {
                tracing::warn!(node_name = name, "No input node with this name, adding anyway");
                template.push(ScheduledInputValue {
                    node_id: name.to_string(),
                    node_name: name.to_string(),
                    value: value.to_string(),
                    kind: Default::default(),
                    file_metadata: None,
                });
            }
        }
    }
    Ok(())
}

fn apply_file_input(
    template: &mut Vec<ScheduledInputValue>,
    name: &str,
    path: &Path,
) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let node_id = template
        .iter()
        .find(|i| i.node_name == name)
        .map_or_else(|| name.to_string(), |i| i.node_id.clone());
    let input = file_input(node_id, name, file_name, mime_from_path(path), &bytes)?;

    template.retain(|i| i.node_name != name);
    template.push(input);
    Ok(())
}

pub async fn add(scheduler: &TaskScheduler, request: AddRequest) -> anyhow::Result<()> {
    let flow = scheduler
        .storage()
        .get_workflow(&request.flow_id)
        .await?
        .with_context(|| format!("workflow '{}' not found", request.flow_id))?;

    let mut inputs = input_template(&flow);
    apply_text_inputs(&mut inputs, &request.inputs)?;
    for raw in &request.files {
        let (name, path) = split_assignment(raw)?;
        apply_file_input(&mut inputs, name, Path::new(path))?;
    }

    let mut schedule = TaskSchedule::new(request.interval);
    schedule.time = request.time;
    schedule.minute_interval = request.minute_interval;

    let task = scheduler
        .create_task(ScheduledTask::new(flow.id, schedule, inputs, "cli"))
        .await?;
    println!("Created task {}", task.id);
    if let Some(next) = task.schedule.next_run {
        println!("  next run: {}", next.with_timezone(&chrono::Local));
    }
    Ok(())
}

pub async fn list(scheduler: &TaskScheduler) -> anyhow::Result<()> {
    let tasks = scheduler.storage().list_tasks().await?;
    if tasks.is_empty() {
        println!("No scheduled tasks");
        return Ok(());
    }
    for task in tasks {
        let next = task
            .schedule
            .next_run
            .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  flow={}  {}  {}  next={}  runs={}/{}",
            task.id,
            task.agent_flow_id,
            task.schedule.interval,
            if task.schedule.enabled { "enabled" } else { "disabled" },
            next,
            task.metadata.success_runs,
            task.metadata.total_runs,
        );
        if let Some(err) = &task.metadata.last_error {
            println!("    last error: {err}");
        }
    }
    Ok(())
}

pub async fn cancel(scheduler: &TaskScheduler, id: &str) -> anyhow::Result<()> {
    scheduler.cancel_task(id).await?;
    println!("Cancelled task {id}");
    Ok(())
}

pub async fn enable(scheduler: &TaskScheduler, id: &str) -> anyhow::Result<()> {
    let task = scheduler.enable_task(id).await?;
    println!("Enabled task {id}");
    if let Some(next) = task.schedule.next_run {
        println!("  next run: {}", next.with_timezone(&chrono::Local));
    }
    Ok(())
}

pub async fn remove(scheduler: &TaskScheduler, id: &str) -> anyhow::Result<()> {
    if !scheduler.delete_task(id).await? {
        bail!("task '{id}' not found");
    }
    println!("Removed task {id}");
    Ok(())
}

pub async fn run_now(scheduler: &TaskScheduler, id: &str) -> anyhow::Result<()> {
    let record = scheduler.execute_task_now(id).await?;
    print_execution(&record);
    if let Some(outputs) = &record.outputs {
        println!("{}", serde_json::to_string_pretty(outputs)?);
    }
    Ok(())
}

pub async fn history(
    storage: &SchedulerStorage,
    task_id: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let records = match task_id {
        Some(id) => storage.get_task_executions(id, limit).await?,
        None => storage.get_recent_executions(limit).await?,
    };
    if records.is_empty() {
        println!("No executions recorded");
    }
    for record in &records {
        print_execution(record);
    }
    Ok(())
}

fn print_execution(record: &ScheduledTaskExecution) {
    let duration = record
        .duration
        .map(|ms| format!("{ms}ms"))
        .unwrap_or_else(|| "-".into());
    println!(
        "{}  task={}  {}  started={}  duration={}",
        record.id,
        record.task_id,
        record.status,
        record
            .start_time
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S"),
        duration,
    );
    if let Some(err) = &record.error {
        println!("    error: {err}");
    }
}
