// 日志初始化（Logging Bootstrap）
//
// 运行时内部统一使用`log`门面，这里只负责安装`env_logger`后端。
// 过滤规则读取`SHADE_LOG`环境变量，语法与`RUST_LOG`一致。

use std::sync::Once;

/// 日志过滤规则使用的环境变量
pub const LOG_ENV: &str = "SHADE_LOG";

static TEST_INIT: Once = Once::new();

/// 初始化进程日志
///
/// # 参数
/// - `default_filter`: `SHADE_LOG`未设置时使用的过滤规则（例如`"info"`）
///
/// 重复调用是安全的，只有第一次生效。
pub fn init_logging(default_filter: Option<&str>) {
    let env = env_logger::Env::new().filter_or(LOG_ENV, default_filter.unwrap_or("warn"));
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

/// 为测试初始化日志
///
/// 输出被测试框架捕获，只在失败的测试中显示。
pub fn init_test_logging() {
    TEST_INIT.call_once(|| {
        let env = env_logger::Env::new().filter_or(LOG_ENV, "debug");
        let _ = env_logger::Builder::from_env(env).is_test(true).try_init();
    });
}
