//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKHIVE__*` 覆盖（双下划线表示嵌套，
//! 如 `TASKHIVE__AGENT__MAX_RETRIES=5`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub agent: AgentSection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：OpenAI 兼容端点与模型选择
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点（DashScope、DeepSeek、自建代理等）
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "qwen3-72b-instruct".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// [agent] 段：编排循环的全部可调参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单步工具调用最大重试次数
    pub max_retries: u32,
    /// 单个任务最大重规划次数
    pub max_replans: u32,
    /// 单次重规划最多追加的新步骤数
    pub max_new_steps_per_replan: usize,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 消息历史的 token 预算
    pub message_token_limit: usize,
    /// 单个逻辑轮次内 Supervisor 循环上限，防止死循环
    pub recursion_limit: usize,
    /// 步骤完成后是否做目标提前达成检测
    pub goal_evaluation_enabled: bool,
    /// 是否启用动态重规划
    pub replan_enabled: bool,
    /// 重试耗尽后是否触发重规划
    pub replan_on_max_retries: bool,
    /// 所有工具执行前都需要用户授权
    pub require_approval_for_all_tools: bool,
    /// 需要用户授权的工具名列表（破坏性操作）
    pub tools_require_approval: Vec<String>,
    /// 依赖未满足时，连续空转多少个 Supervisor 周期后升级为重规划
    pub dependency_stall_limit: u32,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_replans: 3,
            max_new_steps_per_replan: 5,
            tool_timeout_secs: 60,
            message_token_limit: 4000,
            recursion_limit: 25,
            goal_evaluation_enabled: true,
            replan_enabled: true,
            replan_on_max_retries: true,
            require_approval_for_all_tools: false,
            tools_require_approval: Vec::new(),
            dependency_stall_limit: 3,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            agent: AgentSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TASKHIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKHIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKHIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_retries, 3);
        assert_eq!(cfg.agent.max_replans, 3);
        assert_eq!(cfg.agent.message_token_limit, 4000);
        assert_eq!(cfg.agent.recursion_limit, 25);
        assert!(cfg.agent.replan_enabled);
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let cfg = load_config(None).unwrap_or_default();
        assert_eq!(cfg.agent.max_new_steps_per_replan, 5);
    }
}
