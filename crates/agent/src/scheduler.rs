//! Tool concurrency scheduling.
//!
//! A batch of invocations is split into groups without reordering: runs of
//! consecutive concurrency-safe invocations execute together, anything else
//! executes alone. Results are keyed by call id, so completion order within
//! a group does not matter.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::{FutureExt, StreamExt};
use helmsman_core::error::{Error, Result};
use helmsman_core::event::{DomainEvent, EventBus};
use helmsman_core::message::Message;
use helmsman_core::tool::{
    PermissionDecision, PermissionGate, ToolContext, ToolInvocation, ToolRegistry, ToolResult,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cancellation::{RequestHandle, TurnPhase};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionGroup {
    Concurrent(Vec<ToolInvocation>),
    Sequential(ToolInvocation),
}

/// Split `invocations` into execution groups, preserving order.
///
/// Names missing from the registry are treated as not concurrency-safe.
pub fn partition(invocations: &[ToolInvocation], registry: &ToolRegistry) -> Vec<ExecutionGroup> {
    let mut groups = Vec::new();
    let mut pending: Vec<ToolInvocation> = Vec::new();

    for invocation in invocations {
        let safe = match registry.is_concurrency_safe(&invocation.name) {
            Some(safe) => safe,
            None => {
                warn!(tool = %invocation.name, call_id = %invocation.id, "Unknown tool, scheduling sequentially");
                false
            }
        };

        if safe {
            pending.push(invocation.clone());
        } else {
            if !pending.is_empty() {
                groups.push(ExecutionGroup::Concurrent(std::mem::take(&mut pending)));
            }
            groups.push(ExecutionGroup::Sequential(invocation.clone()));
        }
    }
    if !pending.is_empty() {
        groups.push(ExecutionGroup::Concurrent(pending));
    }
    groups
}

pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    gate: Arc<dyn PermissionGate>,
    events: Arc<EventBus>,
    agent_id: String,
    max_concurrency: usize,
}

impl ToolScheduler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        gate: Arc<dyn PermissionGate>,
        events: Arc<EventBus>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            gate,
            events,
            agent_id: agent_id.into(),
            max_concurrency: 10,
        }
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a batch. Progress messages go to `progress`.
    ///
    /// Returns `Error::Cancelled` as soon as the turn's token fires; no
    /// further group is started and in-flight invocations are dropped.
    pub async fn run(
        &self,
        invocations: &[ToolInvocation],
        handle: &RequestHandle,
        progress: mpsc::UnboundedSender<Message>,
    ) -> Result<HashMap<String, ToolResult>> {
        let groups = partition(invocations, &self.registry);
        debug!(invocations = invocations.len(), groups = groups.len(), "Running tool batch");

        let mut results = HashMap::with_capacity(invocations.len());
        for group in groups {
            if handle.is_cancelled() {
                return Err(Error::Cancelled("tool execution".into()));
            }

            let finished: Vec<ToolResult> = tokio::select! {
                biased;
                _ = handle.token().cancelled() => {
                    return Err(Error::Cancelled("tool execution".into()));
                }
                finished = self.run_group(group, handle, &progress) => finished,
            };
            for result in finished {
                results.insert(result.call_id.clone(), result);
            }
        }
        Ok(results)
    }

    async fn run_group(
        &self,
        group: ExecutionGroup,
        handle: &RequestHandle,
        progress: &mpsc::UnboundedSender<Message>,
    ) -> Vec<ToolResult> {
        match group {
            ExecutionGroup::Sequential(invocation) => {
                vec![self.execute_one(invocation, handle, progress).await]
            }
            ExecutionGroup::Concurrent(group) => {
                futures::stream::iter(group)
                    .map(|invocation| self.execute_one(invocation, handle, progress))
                    .buffer_unordered(self.max_concurrency)
                    .collect()
                    .await
            }
        }
    }

    async fn execute_one(
        &self,
        invocation: ToolInvocation,
        handle: &RequestHandle,
        progress: &mpsc::UnboundedSender<Message>,
    ) -> ToolResult {
        let ToolInvocation { id, name, input } = invocation;

        let Some(tool) = self.registry.get(&name) else {
            warn!(tool = %name, call_id = %id, "Model requested an unknown tool");
            return ToolResult::error(&id, format!("No such tool available: {name}"));
        };

        if let Err(e) = tool.validate_input(&input) {
            return ToolResult::error(&id, format!("Invalid input for {name}: {e}"));
        }

        if tool.needs_permission(&input) {
            handle.set_phase(TurnPhase::AwaitingPermission);
            let decision = self.gate.check(&name, &input).await;
            handle.set_phase(TurnPhase::AwaitingTools);
            if let PermissionDecision::Deny(reason) = decision {
                debug!(tool = %name, call_id = %id, reason = %reason, "Permission denied");
                return ToolResult::error(&id, format!("Permission to use {name} was denied: {reason}"));
            }
        }

        let ctx = ToolContext::new(&id, &self.agent_id, handle.token().clone(), self.events.clone())
            .with_progress(progress.clone());

        let started = Instant::now();
        let outcome = AssertUnwindSafe(tool.execute(input, &ctx)).catch_unwind().await;
        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = %name, call_id = %id, error = %e, "Tool execution failed");
                ToolResult::error(&id, format!("Error: {e}"))
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(tool = %name, call_id = %id, reason = %reason, "Tool panicked");
                ToolResult::error(&id, format!("Error: {name} panicked: {reason}"))
            }
        };
        result.call_id = id;

        self.events.publish(DomainEvent::ToolExecuted {
            tool_name: name,
            success: result.success,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationController;
    use async_trait::async_trait;
    use helmsman_core::error::ToolError;
    use helmsman_core::tool::{AllowAll, Tool};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sleeps for `input.ms` and reports the peak number of concurrent runs.
    struct SleepTool {
        name: &'static str,
        safe: bool,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn is_concurrency_safe(&self) -> bool {
            self.safe
        }
        fn is_read_only(&self) -> bool {
            self.safe
        }
        async fn execute(
            &self,
            input: serde_json::Value,
            ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            ctx.report_progress("working");
            tokio::time::sleep(Duration::from_millis(input["ms"].as_u64().unwrap_or(10))).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if input["fail"].as_bool().unwrap_or(false) {
                return Err(ToolError::ExecutionFailed {
                    tool_name: self.name.into(),
                    reason: "boom".into(),
                });
            }
            Ok(ToolResult::success("", format!("{} done", ctx.call_id)))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn is_concurrency_safe(&self) -> bool {
            true
        }
        fn is_read_only(&self) -> bool {
            true
        }
        async fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            panic!("index out of bounds");
        }
    }

    struct DenyAll;

    #[async_trait]
    impl PermissionGate for DenyAll {
        async fn check(&self, _tool_name: &str, _input: &serde_json::Value) -> PermissionDecision {
            PermissionDecision::Deny("not today".into())
        }
    }

    struct Fixture {
        registry: Arc<ToolRegistry>,
        peak: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        for (name, safe) in [("read", true), ("write", false)] {
            registry.register(Arc::new(SleepTool {
                name,
                safe,
                running: running.clone(),
                peak: peak.clone(),
            }));
        }
        Fixture {
            registry: Arc::new(registry),
            peak,
        }
    }

    fn inv(id: &str, name: &str) -> ToolInvocation {
        ToolInvocation {
            id: id.into(),
            name: name.into(),
            input: json!({"ms": 50}),
        }
    }

    fn scheduler(registry: Arc<ToolRegistry>, gate: Arc<dyn PermissionGate>) -> ToolScheduler {
        ToolScheduler::new(registry, gate, Arc::new(EventBus::default()), "main")
    }

    fn handle() -> RequestHandle {
        CancellationController::new(Duration::from_millis(10)).start().unwrap()
    }

    #[test]
    fn partition_flushes_around_unsafe_calls() {
        let f = fixture();
        let batch = vec![inv("a", "read"), inv("b", "read"), inv("c", "write"), inv("d", "read")];
        assert_eq!(
            partition(&batch, &f.registry),
            vec![
                ExecutionGroup::Concurrent(vec![inv("a", "read"), inv("b", "read")]),
                ExecutionGroup::Sequential(inv("c", "write")),
                ExecutionGroup::Concurrent(vec![inv("d", "read")]),
            ]
        );
    }

    #[test]
    fn unknown_tools_are_sequential() {
        let f = fixture();
        let batch = vec![inv("a", "read"), inv("x", "mystery"), inv("b", "read")];
        assert_eq!(
            partition(&batch, &f.registry),
            vec![
                ExecutionGroup::Concurrent(vec![inv("a", "read")]),
                ExecutionGroup::Sequential(inv("x", "mystery")),
                ExecutionGroup::Concurrent(vec![inv("b", "read")]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn grouped_results_match_sequential_results() {
        let f = fixture();
        let batch = vec![inv("a", "read"), inv("b", "read"), inv("c", "write"), inv("d", "read")];
        let (tx, mut rx) = mpsc::unbounded_channel();

        let results = scheduler(f.registry.clone(), Arc::new(AllowAll))
            .run(&batch, &handle(), tx)
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        for id in ["a", "b", "c", "d"] {
            assert_eq!(results[id].output, format!("{id} done"));
            assert_eq!(results[id].call_id, id);
        }
        assert_eq!(f.peak.load(Ordering::SeqCst), 2);

        let mut progress = 0;
        while rx.try_recv().is_ok() {
            progress += 1;
        }
        assert_eq!(progress, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let f = fixture();
        let batch: Vec<_> = (0..6).map(|i| inv(&i.to_string(), "read")).collect();
        let (tx, _rx) = mpsc::unbounded_channel();
        scheduler(f.registry.clone(), Arc::new(AllowAll))
            .with_max_concurrency(3)
            .run(&batch, &handle(), tx)
            .await
            .unwrap();
        assert_eq!(f.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_become_error_results() {
        let f = fixture();
        let mut failing = inv("f", "write");
        failing.input = json!({"fail": true});
        let batch = vec![failing, inv("u", "mystery")];
        let (tx, _rx) = mpsc::unbounded_channel();

        let results = scheduler(f.registry, Arc::new(AllowAll))
            .run(&batch, &handle(), tx)
            .await
            .unwrap();
        assert!(!results["f"].success);
        assert!(results["f"].output.contains("boom"));
        assert!(!results["u"].success);
        assert!(results["u"].output.contains("No such tool available"));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tool_becomes_error_result() {
        let f = fixture();
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanicTool));
        registry.register(f.registry.get("read").unwrap());
        let batch = vec![inv("p", "boom"), inv("r", "read")];
        let (tx, _rx) = mpsc::unbounded_channel();

        let results = scheduler(Arc::new(registry), Arc::new(AllowAll))
            .run(&batch, &handle(), tx)
            .await
            .unwrap();
        assert!(!results["p"].success);
        assert!(results["p"].output.contains("boom panicked: index out of bounds"));
        assert_eq!(results["p"].call_id, "p");
        assert!(results["r"].success);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_permission_skips_execution() {
        let f = fixture();
        let batch = vec![inv("r", "read"), inv("w", "write")];
        let (tx, _rx) = mpsc::unbounded_channel();

        let results = scheduler(f.registry.clone(), Arc::new(DenyAll))
            .run(&batch, &handle(), tx)
            .await
            .unwrap();
        assert!(results["r"].success, "read-only tools skip the gate");
        assert!(results["w"].output.contains("not today"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_new_groups() {
        let f = fixture();
        let batch = vec![inv("a", "write"), inv("b", "write")];
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = handle();
        let token = handle.token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = scheduler(f.registry, Arc::new(AllowAll))
            .run(&batch, &handle, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
