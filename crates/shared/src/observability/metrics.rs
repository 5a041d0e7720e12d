//! 规则执行指标
//!
//! 基于 metrics crate 的门面接口记录指标。未安装 recorder 时记录操作为空操作。

/// 注册指标描述
pub fn describe() {
    metrics::describe_counter!("rule_executions_total", "Total number of rule executions");
    metrics::describe_histogram!(
        "rule_execution_duration_seconds",
        "Single rule execution duration in seconds"
    );
    metrics::describe_counter!("rule_chains_total", "Total number of rule chain executions");
    metrics::describe_histogram!(
        "rule_chain_length",
        "Number of rules executed in one chain"
    );
    metrics::describe_counter!(
        "script_runtime_events_total",
        "Script runtime pool events (created, reused, discarded)"
    );
}

/// 记录单条规则执行
#[inline]
pub fn record_rule_execution(rule_type: &str, passed: bool, duration_secs: f64) {
    metrics::counter!(
        "rule_executions_total",
        "type" => rule_type.to_string(),
        "result" => if passed { "pass" } else { "fail" }
    )
    .increment(1);

    metrics::histogram!(
        "rule_execution_duration_seconds",
        "type" => rule_type.to_string()
    )
    .record(duration_secs);
}

/// 记录规则链执行
#[inline]
pub fn record_chain_execution(status: &str, chain_length: usize) {
    metrics::counter!(
        "rule_chains_total",
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!("rule_chain_length").record(chain_length as f64);
}

/// 记录解释器池事件
#[inline]
pub fn record_runtime_event(event: &'static str) {
    metrics::counter!("script_runtime_events_total", "event" => event).increment(1);
}
