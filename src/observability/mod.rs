//! 可观测性
//!
//! tracing 初始化：默认 info 级别，RUST_LOG 可覆盖。工具审计日志（JSON 行）
//! 经由同一订阅者输出。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    init_with_directive("info");
}

/// 以指定默认级别初始化（嵌入方可传 "taskhive=debug" 之类的指令）
pub fn init_with_directive(directive: &str) {
    let filter = EnvFilter::from_default_env();
    let filter = match directive.parse() {
        Ok(d) => filter.add_directive(d),
        Err(_) => filter,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
