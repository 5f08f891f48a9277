use std::sync::Arc;

use agentflow_hooks::SchedulerEvent;
use agentflow_scheduler::TaskScheduler;

/// Run the scheduler until Ctrl-C, then let in-flight executions finish.
pub async fn run(scheduler: TaskScheduler) -> anyhow::Result<()> {
    scheduler
        .hooks()
        .on(
            "*",
            Arc::new(|event: SchedulerEvent| {
                Box::pin(async move {
                    match serde_json::to_string(&event) {
                        Ok(json) => tracing::debug!(event = %json, "Scheduler event"),
                        Err(e) => tracing::warn!("Failed to serialize scheduler event: {e}"),
                    }
                })
            }),
        )
        .await;

    // Runs left marked as running by a previous process never finish.
    let stale = scheduler
        .storage()
        .get_executions_by_status(agentflow_types::ExecutionStatus::Running)
        .await?;
    if !stale.is_empty() {
        tracing::warn!(count = stale.len(), "Found executions left running by a previous process");
    }

    scheduler.start().await;
    tracing::info!(
        tick_secs = scheduler.options().tick_interval.as_secs(),
        timeout_secs = scheduler.options().execution_timeout.as_secs(),
        "Scheduler running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down, waiting for running tasks");
    scheduler.dispose().await;
    Ok(())
}
