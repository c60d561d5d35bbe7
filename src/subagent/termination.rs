//! 终止引擎
//!
//! 条件种类（GOAL / VARIABLE / OUTPUT / CUSTOM）在构造时确定，循环内只调用闭包，不做字符串分派。
//! 每轮结束后的判定优先级：取消 > 声明的条件（按声明顺序，首个命中即返回）> 最终回复 > 最大轮数 > 超时。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::subagent::scope::ExecutionScope;

/// 作用于运行状态的纯谓词
pub type Evaluator = Arc<dyn Fn(&ExecutionScope) -> bool + Send + Sync>;
/// 作用于单个变量值的谓词（变量不存在时传 None）
pub type ValuePredicate = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    Goal,
    Variable,
    Output,
    Custom,
}

impl FromStr for ConditionKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "goal" => Ok(ConditionKind::Goal),
            "variable" => Ok(ConditionKind::Variable),
            "output" => Ok(ConditionKind::Output),
            "custom" => Ok(ConditionKind::Custom),
            other => Err(AgentError::ConfigError(format!(
                "Unknown termination condition type: {other}"
            ))),
        }
    }
}

/// 各种类条件的构造参数
pub enum ConditionParams {
    Goal {
        description: String,
        evaluator: Evaluator,
    },
    Variable {
        variable_name: String,
        condition: ValuePredicate,
        description: String,
    },
    Output {
        required_outputs: Vec<String>,
        description: String,
    },
    Custom {
        reason: String,
        evaluator: Evaluator,
    },
}

impl ConditionParams {
    pub fn goal<F>(description: impl Into<String>, evaluator: F) -> Self
    where
        F: Fn(&ExecutionScope) -> bool + Send + Sync + 'static,
    {
        ConditionParams::Goal {
            description: description.into(),
            evaluator: Arc::new(evaluator),
        }
    }

    pub fn variable<F>(
        variable_name: impl Into<String>,
        description: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        ConditionParams::Variable {
            variable_name: variable_name.into(),
            condition: Arc::new(condition),
            description: description.into(),
        }
    }

    pub fn output<I, S>(required_outputs: I, description: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ConditionParams::Output {
            required_outputs: required_outputs.into_iter().map(Into::into).collect(),
            description: description.into(),
        }
    }

    pub fn custom<F>(reason: impl Into<String>, evaluator: F) -> Self
    where
        F: Fn(&ExecutionScope) -> bool + Send + Sync + 'static,
    {
        ConditionParams::Custom {
            reason: reason.into(),
            evaluator: Arc::new(evaluator),
        }
    }

    pub fn kind(&self) -> ConditionKind {
        match self {
            ConditionParams::Goal { .. } => ConditionKind::Goal,
            ConditionParams::Variable { .. } => ConditionKind::Variable,
            ConditionParams::Output { .. } => ConditionKind::Output,
            ConditionParams::Custom { .. } => ConditionKind::Custom,
        }
    }
}

/// 一个终止条件：种类、原因文本、求值闭包
#[derive(Clone)]
pub struct TerminationCondition {
    kind: ConditionKind,
    reason: String,
    evaluator: Evaluator,
}

impl fmt::Debug for TerminationCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminationCondition")
            .field("kind", &self.kind)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl From<ConditionParams> for TerminationCondition {
    fn from(params: ConditionParams) -> Self {
        match params {
            ConditionParams::Goal {
                description,
                evaluator,
            } => Self {
                kind: ConditionKind::Goal,
                reason: description,
                evaluator,
            },
            ConditionParams::Variable {
                variable_name,
                condition,
                description,
            } => Self {
                kind: ConditionKind::Variable,
                reason: description,
                evaluator: Arc::new(move |scope: &ExecutionScope| {
                    condition(scope.variables.get(&variable_name))
                }),
            },
            ConditionParams::Output {
                required_outputs,
                description,
            } => Self {
                kind: ConditionKind::Output,
                reason: description,
                evaluator: Arc::new(move |scope: &ExecutionScope| {
                    required_outputs
                        .iter()
                        .all(|name| scope.emitted_variables.contains_key(name))
                }),
            },
            ConditionParams::Custom { reason, evaluator } => Self {
                kind: ConditionKind::Custom,
                reason,
                evaluator,
            },
        }
    }
}

impl TerminationCondition {
    pub fn kind(&self) -> ConditionKind {
        self.kind
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn evaluate(&self, scope: &ExecutionScope) -> bool {
        (self.evaluator)(scope)
    }
}

/// 按名称构造终止条件；种类字符串只在这里解析一次
pub fn create_termination_condition(
    kind: &str,
    params: ConditionParams,
) -> Result<TerminationCondition, AgentError> {
    let kind: ConditionKind = kind.parse()?;
    if params.kind() != kind {
        return Err(AgentError::ConfigError(format!(
            "Parameters for {:?} condition do not match requested type {:?}",
            params.kind(),
            kind
        )));
    }
    Ok(TerminationCondition::from(params))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationStatus {
    Success,
    Error,
    Timeout,
    MaxTurns,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationVerdict {
    pub status: TerminationStatus,
    pub reason: String,
    /// 由声明的条件触发时记录其种类
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionKind>,
}

impl TerminationVerdict {
    pub fn new(status: TerminationStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            condition: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(TerminationStatus::Error, reason)
    }

    pub fn is_success(&self) -> bool {
        self.status == TerminationStatus::Success
    }
}

/// 一轮结束后交给引擎的摘要
#[derive(Debug, Clone, Copy, Default)]
pub struct TurnOutcome {
    /// 本轮没有工具调用，且模型输出可解析（即最终回复）
    pub final_response: bool,
    pub outputs_complete: bool,
}

/// 单次运行的终止统计（写入 executionMetadata）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTerminationStats {
    pub conditions_declared: usize,
    pub condition_evaluations: u64,
    pub matched_condition: Option<ConditionKind>,
}

/// 每个运行独占一个引擎
pub struct TerminationEngine<'a> {
    conditions: &'a [TerminationCondition],
    max_turns: u32,
    timeout: Duration,
    evaluations: u64,
    matched: Option<ConditionKind>,
}

pub const COMPLETED_REASON: &str = "Agent completed task";

impl<'a> TerminationEngine<'a> {
    pub fn new(conditions: &'a [TerminationCondition], max_turns: u32, timeout_ms: u64) -> Self {
        Self {
            conditions,
            max_turns,
            timeout: Duration::from_millis(timeout_ms),
            evaluations: 0,
            matched: None,
        }
    }

    /// 调用模型前检查：只看取消与超时
    pub fn check_interrupts(&self, scope: &ExecutionScope) -> Option<TerminationVerdict> {
        self.cancelled(scope).or_else(|| self.timed_out(scope))
    }

    /// 轮内检查：只看取消（工具分派前、故障上抛前）
    pub fn check_cancelled(&self, scope: &ExecutionScope) -> Option<TerminationVerdict> {
        self.cancelled(scope)
    }

    pub fn evaluate(
        &mut self,
        scope: &ExecutionScope,
        outcome: &TurnOutcome,
    ) -> Option<TerminationVerdict> {
        if let Some(v) = self.cancelled(scope) {
            return Some(v);
        }

        for condition in self.conditions {
            self.evaluations += 1;
            if condition.evaluate(scope) {
                tracing::debug!(
                    scope_id = %scope.scope_id(),
                    kind = ?condition.kind(),
                    "termination condition met"
                );
                self.matched = Some(condition.kind());
                return Some(TerminationVerdict {
                    status: TerminationStatus::Success,
                    reason: condition.reason().to_string(),
                    condition: Some(condition.kind()),
                });
            }
        }

        if outcome.final_response && outcome.outputs_complete {
            return Some(TerminationVerdict::new(
                TerminationStatus::Success,
                COMPLETED_REASON,
            ));
        }

        if scope.turn_count >= self.max_turns {
            return Some(TerminationVerdict::new(
                TerminationStatus::MaxTurns,
                format!("Reached maximum turns ({})", self.max_turns),
            ));
        }

        self.timed_out(scope)
    }

    /// 距超时还剩多少时间（用于限制单次模型调用）
    pub fn remaining(&self, scope: &ExecutionScope) -> Duration {
        self.timeout.saturating_sub(scope.elapsed())
    }

    pub fn timeout_verdict(&self) -> TerminationVerdict {
        TerminationVerdict::new(
            TerminationStatus::Timeout,
            format!("Execution timed out after {} ms", self.timeout.as_millis()),
        )
    }

    pub fn run_stats(&self) -> RunTerminationStats {
        RunTerminationStats {
            conditions_declared: self.conditions.len(),
            condition_evaluations: self.evaluations,
            matched_condition: self.matched,
        }
    }

    fn cancelled(&self, scope: &ExecutionScope) -> Option<TerminationVerdict> {
        if !scope.cancellation_requested() {
            return None;
        }
        let reason = scope
            .control()
            .cancel_reason()
            .unwrap_or_else(|| "Cancelled".to_string());
        Some(TerminationVerdict::new(TerminationStatus::Cancelled, reason))
    }

    fn timed_out(&self, scope: &ExecutionScope) -> Option<TerminationVerdict> {
        (scope.elapsed() >= self.timeout).then(|| self.timeout_verdict())
    }
}

/// 跨运行的终止统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationStats {
    pub total: u64,
    pub by_status: BTreeMap<TerminationStatus, u64>,
    pub by_condition: BTreeMap<ConditionKind, u64>,
}

impl TerminationStats {
    pub fn record(&mut self, verdict: &TerminationVerdict) {
        self.total += 1;
        *self.by_status.entry(verdict.status).or_default() += 1;
        if let Some(kind) = verdict.condition {
            *self.by_condition.entry(kind).or_default() += 1;
        }
    }

    pub fn count(&self, status: TerminationStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subagent::config::Variables;
    use crate::subagent::scope::ScopeControl;
    use serde_json::json;

    fn scope() -> ExecutionScope {
        ExecutionScope::new(Arc::new(ScopeControl::new("t")), Variables::new())
    }

    #[test]
    fn test_create_all_kinds() {
        let cases = [
            ("goal", ConditionParams::goal("done", |_| true), ConditionKind::Goal),
            (
                "variable",
                ConditionParams::variable("x", "x set", |v| v.is_some()),
                ConditionKind::Variable,
            ),
            ("output", ConditionParams::output(["a"], "a emitted"), ConditionKind::Output),
            ("custom", ConditionParams::custom("always", |_| false), ConditionKind::Custom),
        ];
        let s = scope();
        for (name, params, kind) in cases {
            let c = create_termination_condition(name, params).unwrap();
            assert_eq!(c.kind(), kind);
            // 可调用
            let _ = c.evaluate(&s);
        }
    }

    #[test]
    fn test_unknown_kind_is_config_error() {
        let err =
            create_termination_condition("bogus", ConditionParams::custom("r", |_| true)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_kind_params_mismatch() {
        let err = create_termination_condition("goal", ConditionParams::output(["a"], "d"))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_variable_condition_reads_scope_variables() {
        let c = TerminationCondition::from(ConditionParams::variable("status", "ready", |v| {
            v == Some(&json!("ready"))
        }));
        let mut s = scope();
        assert!(!c.evaluate(&s));
        s.variables.insert("status".into(), json!("ready"));
        assert!(c.evaluate(&s));
    }

    #[test]
    fn test_output_condition_requires_all() {
        let c = TerminationCondition::from(ConditionParams::output(["a", "b"], "both"));
        let mut s = scope();
        s.emit("a", json!(1));
        assert!(!c.evaluate(&s));
        s.emit("b", json!(2));
        assert!(c.evaluate(&s));
    }

    #[test]
    fn test_first_match_short_circuits() {
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = counter.clone();
        let conditions = vec![
            TerminationCondition::from(ConditionParams::custom("first", |_| true)),
            TerminationCondition::from(ConditionParams::custom("second", move |_| {
                seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                true
            })),
        ];
        let mut engine = TerminationEngine::new(&conditions, 10, 60_000);
        let v = engine.evaluate(&scope(), &TurnOutcome::default()).unwrap();
        assert_eq!(v.status, TerminationStatus::Success);
        assert_eq!(v.reason, "first");
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(engine.run_stats().condition_evaluations, 1);
    }

    #[test]
    fn test_cancellation_wins_over_conditions() {
        let conditions = vec![TerminationCondition::from(ConditionParams::custom(
            "done",
            |_| true,
        ))];
        let mut engine = TerminationEngine::new(&conditions, 10, 60_000);
        let s = scope();
        s.control().request_cancel("user stop");
        let v = engine.evaluate(&s, &TurnOutcome::default()).unwrap();
        assert_eq!(v.status, TerminationStatus::Cancelled);
        assert_eq!(v.reason, "user stop");
    }

    #[test]
    fn test_max_turns_ceiling() {
        let mut engine = TerminationEngine::new(&[], 2, 60_000);
        let mut s = scope();
        s.next_turn();
        assert!(engine.evaluate(&s, &TurnOutcome::default()).is_none());
        s.next_turn();
        let v = engine.evaluate(&s, &TurnOutcome::default()).unwrap();
        assert_eq!(v.status, TerminationStatus::MaxTurns);
    }

    #[test]
    fn test_final_response_needs_outputs() {
        let mut engine = TerminationEngine::new(&[], 5, 60_000);
        let s = scope();
        let incomplete = TurnOutcome {
            final_response: true,
            outputs_complete: false,
        };
        assert!(engine.evaluate(&s, &incomplete).is_none());
        let complete = TurnOutcome {
            outputs_complete: true,
            ..incomplete
        };
        let v = engine.evaluate(&s, &complete).unwrap();
        assert_eq!(v.reason, COMPLETED_REASON);
    }

    #[test]
    fn test_timeout_ceiling() {
        let engine = TerminationEngine::new(&[], 5, 1);
        let s = scope();
        std::thread::sleep(Duration::from_millis(5));
        let v = engine.check_interrupts(&s).unwrap();
        assert_eq!(v.status, TerminationStatus::Timeout);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = TerminationStats::default();
        stats.record(&TerminationVerdict::error("x"));
        stats.record(&TerminationVerdict {
            status: TerminationStatus::Success,
            reason: "ok".into(),
            condition: Some(ConditionKind::Goal),
        });
        assert_eq!(stats.total, 2);
        assert_eq!(stats.count(TerminationStatus::Error), 1);
        assert_eq!(stats.by_condition[&ConditionKind::Goal], 1);
    }
}
