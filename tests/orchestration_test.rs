//! 编排循环集成测试
//!
//! 用 Scripted LLM 与内存工具驱动完整的 Supervisor → 组件循环：
//! 规划、执行、重试耗尽后的重规划、HITL 挂起/恢复、终态校验。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use taskhive::config::AgentSection;
use taskhive::core::{
    CheckpointStore, FinalStatus, InMemoryCheckpointStore, InterruptType, Orchestrator,
    OrchestratorError, StepStatus, TurnOutcome,
};
use taskhive::hitl::HitlAction;
use taskhive::llm::ScriptedLlmClient;
use taskhive::tools::{Tool, ToolRegistry};

/// 总是失败的工具
struct FlakyTool;

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "unstable upstream call"
    }
    async fn execute(&self, _args: Value) -> Result<String, String> {
        Err("上游连接被拒绝".to_string())
    }
}

/// 记录调用参数的部署工具（授权场景）
struct DeployTool {
    calls: Arc<AtomicUsize>,
    last_args: Arc<Mutex<Option<Value>>>,
}

#[async_trait]
impl Tool for DeployTool {
    fn name(&self) -> &str {
        "deploy"
    }
    fn description(&self) -> &str {
        "deploy service to an environment"
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "env": {"type": "string", "description": "目标环境"}
            },
            "required": ["env"]
        })
    }
    async fn execute(&self, args: Value) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock().unwrap() = Some(args.clone());
        Ok(format!(
            "已部署至 {}",
            args.get("env").and_then(Value::as_str).unwrap_or("?")
        ))
    }
}

fn orchestrator_with(
    responses: &[&str],
    registry: ToolRegistry,
    config: AgentSection,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(ScriptedLlmClient::with_responses(responses.to_vec())),
        registry,
        config,
        Arc::new(InMemoryCheckpointStore::new()),
    )
}

fn no_goal_eval() -> AgentSection {
    AgentSection {
        goal_evaluation_enabled: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_retry_exhaustion_triggers_replan_then_succeeds() {
    let mut registry = ToolRegistry::new();
    registry.register(FlakyTool);

    let orch = orchestrator_with(
        &[
            // 规划：两步，第一步走 flaky 工具
            r#"{"intent": "拉取并汇总数据", "steps": [
                {"id": "step_1", "description": "拉取数据", "tool_name": "flaky", "depends_on": []},
                {"id": "step_2", "description": "汇总数据", "tool_name": null, "depends_on": []}
            ]}"#,
            // 三次参数填充（每轮重试前都会重新填参）
            r#"{"tool": "flaky", "args": {}}"#,
            r#"{"tool": "flaky", "args": {}}"#,
            r#"{"tool": "flaky", "args": {}}"#,
            // 重规划：跳过失败步骤
            r#"{"strategy": "skip_failed", "explanation": "数据可从缓存汇总，拉取非必需", "new_steps": [], "steps_to_skip": []}"#,
            // step_2 模型直答
            "汇总已完成：共 3 条记录。",
            // 校验总结
            "任务完成：跳过了不稳定的拉取步骤，基于缓存完成汇总。",
        ],
        registry,
        no_goal_eval(),
    );

    let outcome = orch.run_turn("thread-replan", "拉取并汇总数据").await.unwrap();
    match outcome {
        TurnOutcome::Finished { status, summary } => {
            assert_eq!(status, FinalStatus::Success);
            assert!(summary.contains("任务完成"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_retry_exhaustion_without_replan_fails_via_validator() {
    let mut registry = ToolRegistry::new();
    registry.register(FlakyTool);

    let config = AgentSection {
        replan_enabled: false,
        goal_evaluation_enabled: false,
        ..Default::default()
    };
    let orch = orchestrator_with(
        &[
            r#"{"intent": "拉取数据", "steps": [
                {"id": "step_1", "description": "拉取数据", "tool_name": "flaky", "depends_on": []}
            ]}"#,
            r#"{"tool": "flaky", "args": {}}"#,
            r#"{"tool": "flaky", "args": {}}"#,
            r#"{"tool": "flaky", "args": {}}"#,
            "任务失败：上游持续不可用，已重试 3 次。",
        ],
        registry,
        config,
    );

    let outcome = orch.run_turn("thread-fail", "拉取数据").await.unwrap();
    match outcome {
        TurnOutcome::Finished { status, summary } => {
            assert_eq!(status, FinalStatus::Failed);
            assert!(summary.contains("任务失败"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_authorization_suspend_and_approve_replays_args() {
    let calls = Arc::new(AtomicUsize::new(0));
    let last_args = Arc::new(Mutex::new(None));
    let mut registry = ToolRegistry::new();
    registry.register(DeployTool {
        calls: calls.clone(),
        last_args: last_args.clone(),
    });

    let config = AgentSection {
        tools_require_approval: vec!["deploy".to_string()],
        goal_evaluation_enabled: false,
        ..Default::default()
    };
    let orch = orchestrator_with(
        &[
            r#"{"intent": "部署服务", "steps": [
                {"id": "step_1", "description": "部署到生产环境", "tool_name": "deploy", "depends_on": []}
            ]}"#,
            r#"{"tool": "deploy", "args": {"env": "prod"}}"#,
            "部署任务已全部完成。",
        ],
        registry,
        config,
    );

    // 第一段：挂起等待授权
    let outcome = orch.run_turn("thread-auth", "把服务部署到生产").await.unwrap();
    let pending = match outcome {
        TurnOutcome::WaitingInput { pending } => pending,
        other => panic!("expected suspension, got {:?}", other),
    };
    assert_eq!(pending.interrupt_type, InterruptType::Authorization);
    assert_eq!(pending.tool_name.as_deref(), Some("deploy"));
    assert_eq!(pending.tool_args, json!({"env": "prod"}));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // 第二段：approve 原样重放参数
    let outcome = orch
        .resume("thread-auth", HitlAction::Approve, json!({}))
        .await
        .unwrap();
    match outcome {
        TurnOutcome::Finished { status, .. } => assert_eq!(status, FinalStatus::Success),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        last_args.lock().unwrap().clone().unwrap(),
        json!({"env": "prod"})
    );
}

#[tokio::test]
async fn test_authorization_reject_never_invokes_tool() {
    let calls = Arc::new(AtomicUsize::new(0));
    let last_args = Arc::new(Mutex::new(None));
    let mut registry = ToolRegistry::new();
    registry.register(DeployTool {
        calls: calls.clone(),
        last_args,
    });

    let config = AgentSection {
        require_approval_for_all_tools: true,
        goal_evaluation_enabled: false,
        ..Default::default()
    };
    let orch = orchestrator_with(
        &[
            r#"{"intent": "部署服务", "steps": [
                {"id": "step_1", "description": "部署到生产环境", "tool_name": "deploy", "depends_on": []}
            ]}"#,
            r#"{"tool": "deploy", "args": {"env": "prod"}}"#,
        ],
        registry,
        config,
    );

    let outcome = orch.run_turn("thread-reject", "部署").await.unwrap();
    assert!(matches!(outcome, TurnOutcome::WaitingInput { .. }));

    let outcome = orch
        .resume("thread-reject", HitlAction::Reject, json!({}))
        .await
        .unwrap();
    match outcome {
        TurnOutcome::Finished { status, .. } => {
            // 拒绝后任务终止，而不是停留在等待输入
            assert_eq!(status, FinalStatus::Failed);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    // 工具从未被调用
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_user_input_step_confirm_roundtrip() {
    let orch = orchestrator_with(
        &[
            r#"{"intent": "安排交付", "steps": [
                {"id": "step_1", "description": "询问期望的交付日期", "tool_name": null, "depends_on": [], "requires_user_input": true}
            ]}"#,
            "好的，交付日期已记录。",
        ],
        ToolRegistry::new(),
        no_goal_eval(),
    );

    let outcome = orch.run_turn("thread-input", "帮我安排交付").await.unwrap();
    let pending = match outcome {
        TurnOutcome::WaitingInput { pending } => pending,
        other => panic!("expected suspension, got {:?}", other),
    };
    assert_eq!(pending.interrupt_type, InterruptType::ParamRequired);
    assert_eq!(pending.fields[0].name, "user_response");
    assert_eq!(pending.fields[0].field_type, "textarea");

    let outcome = orch
        .resume(
            "thread-input",
            HitlAction::Confirm,
            json!({"user_response": "下周五之前"}),
        )
        .await
        .unwrap();
    match outcome {
        TurnOutcome::Finished { status, .. } => assert_eq!(status, FinalStatus::Success),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_resume_unknown_thread_is_error() {
    let orch = orchestrator_with(&[], ToolRegistry::new(), AgentSection::default());
    let err = orch
        .resume("ghost-thread", HitlAction::Approve, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ThreadNotFound(_)));
}

#[tokio::test]
async fn test_state_survives_checkpoint_across_turns() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let llm = Arc::new(ScriptedLlmClient::with_responses([
        r#"{"intent": "问答", "steps": [{"id": "step_1", "description": "回答问题"}]}"#,
        "第一个问题的答案。",
        "已完成第一个问题。",
        r#"{"intent": "追问", "steps": [{"id": "step_1", "description": "回答追问"}]}"#,
        "第二个问题的答案。",
        "已完成追问。",
    ]));
    let orch = Orchestrator::new(
        llm,
        ToolRegistry::new(),
        no_goal_eval(),
        store.clone(),
    );

    let first = orch.run_turn("thread-multi", "第一个问题").await.unwrap();
    assert!(matches!(
        first,
        TurnOutcome::Finished {
            status: FinalStatus::Success,
            ..
        }
    ));

    // 第二轮在同一线程上继续：上一任务的步骤被重置，消息日志保留
    let second = orch.run_turn("thread-multi", "追问一下").await.unwrap();
    assert!(matches!(
        second,
        TurnOutcome::Finished {
            status: FinalStatus::Success,
            ..
        }
    ));

    let state = store.load("thread-multi").await.unwrap().unwrap();
    assert_eq!(state.steps.len(), 1);
    assert_eq!(state.steps[0].status, StepStatus::Completed);
    let user_turns = state
        .messages
        .iter()
        .filter(|m| m.content == "第一个问题" || m.content == "追问一下")
        .count();
    assert_eq!(user_turns, 2);
}
