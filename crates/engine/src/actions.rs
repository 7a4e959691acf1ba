//! Ordered action execution for firing rules.
//!
//! Each action runs to completion (or error) before the next starts and
//! records `action_completed`/`action_failed` with its duration. An error
//! aborts the remaining actions of the firing rule unless a surrounding
//! `try_catch` handles it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, info, warn};

use reflex_core::{
    Action, DurationSpec, EngineError, LogLevel, OnExpire, Rule, TimerConfig, TraceEntry,
    TraceEntryType,
};

use crate::conditions;
use crate::context::EvalContext;
use crate::engine::Engine;
use crate::interpolate::{interpolate_map, interpolate_string, interpolate_value};

type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;

/// Execute a rule's action list in declared order.
pub(crate) fn execute_actions<'a>(
    engine: &'a Arc<Engine>,
    rule: &'a Rule,
    actions: &'a [Action],
    ctx: &'a EvalContext,
    chain_depth: u32,
) -> ActionFuture<'a> {
    Box::pin(async move {
        for action in actions {
            execute_action(engine, rule, action, ctx, chain_depth).await?;
        }
        Ok(())
    })
}

async fn execute_action(
    engine: &Arc<Engine>,
    rule: &Rule,
    action: &Action,
    ctx: &EvalContext,
    chain_depth: u32,
) -> Result<(), EngineError> {
    let started = Instant::now();
    let result = run_action(engine, rule, action, ctx, chain_depth).await;
    let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;

    let entry_type = if result.is_ok() {
        TraceEntryType::ActionCompleted
    } else {
        TraceEntryType::ActionFailed
    };
    let mut entry = TraceEntry::new(entry_type)
        .with_rule(&rule.id, &rule.name)
        .with_correlation(ctx.correlation_id())
        .with_duration(duration_ms)
        .with_detail("actionType", action.type_name());
    if let Err(e) = &result {
        entry = entry.with_detail("error", e.to_string());
    }
    engine.trace.record(entry);

    result.map_err(|e| match e {
        err @ EngineError::ActionFailed { .. } => err,
        other => EngineError::action(action.type_name(), other),
    })
}

async fn run_action(
    engine: &Arc<Engine>,
    rule: &Rule,
    action: &Action,
    ctx: &EvalContext,
    chain_depth: u32,
) -> Result<(), EngineError> {
    match action {
        Action::SetFact { key, value } => {
            let key = interpolate_string(key, ctx);
            let value = interpolate_value(value, ctx);
            let fact = engine.facts.set(&key, value, Some(&rule.id))?;
            engine.enqueue_fact_change(
                fact,
                reflex_core::FactChangeKind::Set,
                ctx.correlation_id().to_string(),
                chain_depth + 1,
            );
            Ok(())
        }
        Action::DeleteFact { key } => {
            let key = interpolate_string(key, ctx);
            if let Some(existing) = engine.facts.get_full(&key) {
                if engine.facts.delete(&key) {
                    engine.enqueue_fact_change(
                        existing,
                        reflex_core::FactChangeKind::Deleted,
                        ctx.correlation_id().to_string(),
                        chain_depth + 1,
                    );
                }
            }
            Ok(())
        }
        Action::EmitEvent { topic, data } => {
            let topic = interpolate_string(topic, ctx);
            let data = interpolate_map(data, ctx);
            let causation = ctx.event().map(|e| e.id.clone());
            engine.chain_emit(
                topic,
                data,
                ctx.correlation_id(),
                causation.as_deref(),
                chain_depth + 1,
            )?;
            Ok(())
        }
        Action::SetTimer { timer } => {
            let config = interpolate_timer_config(timer, ctx);
            engine.set_timer(config, Some(ctx.correlation_id().to_string()))?;
            Ok(())
        }
        Action::CancelTimer { name } => {
            let name = interpolate_string(name, ctx);
            engine.cancel_timer(&name);
            Ok(())
        }
        Action::CallService { service, method, args, timeout_ms } => {
            let service = interpolate_string(service, ctx);
            let method = interpolate_string(method, ctx);
            let args = interpolate_value(args, ctx);
            let timeout = timeout_ms.map(Duration::from_millis);
            engine
                .services
                .call(&service, &method, args, timeout)
                .await
                .map(|_| ())
        }
        Action::Log { level, message } => {
            let message = interpolate_string(message, ctx);
            match level {
                LogLevel::Debug => debug!(rule_id = %rule.id, "{}", message),
                LogLevel::Info => info!(rule_id = %rule.id, "{}", message),
                LogLevel::Warn => warn!(rule_id = %rule.id, "{}", message),
                LogLevel::Error => error!(rule_id = %rule.id, "{}", message),
            }
            Ok(())
        }
        Action::Conditional { conditions: checks, then, otherwise } => {
            let baseline = engine.baseline.read().expect("baseline lock poisoned").clone();
            let mut all_passed = true;
            for condition in checks {
                let outcome = conditions::evaluate(condition, ctx, baseline.as_deref());
                engine.trace.record(
                    TraceEntry::new(TraceEntryType::ConditionEvaluated)
                        .with_rule(&rule.id, &rule.name)
                        .with_correlation(ctx.correlation_id())
                        .with_detail("operator", condition.operator.as_str())
                        .with_detail("passed", outcome.passed)
                        .with_detail("inAction", true),
                );
                if !outcome.passed {
                    all_passed = false;
                    break;
                }
            }
            if all_passed {
                execute_actions(engine, rule, then, ctx, chain_depth).await
            } else if let Some(otherwise) = otherwise {
                execute_actions(engine, rule, otherwise, ctx, chain_depth).await
            } else {
                Ok(())
            }
        }
        Action::TryCatch { try_actions, catch, finally } => {
            let tried = execute_actions(engine, rule, try_actions, ctx, chain_depth).await;

            let handled = match tried {
                Ok(()) => Ok(()),
                Err(e) => match catch {
                    Some(catch) => {
                        let child = ctx.with_binding(&catch.bind_as, json!(e.to_string()));
                        execute_actions(engine, rule, &catch.actions, &child, chain_depth).await
                    }
                    None => Err(e),
                },
            };

            let finished = match finally {
                Some(finally) => execute_actions(engine, rule, finally, ctx, chain_depth).await,
                None => Ok(()),
            };

            handled.and(finished)
        }
    }
}

/// Interpolate every string position of a timer config.
fn interpolate_timer_config(config: &TimerConfig, ctx: &EvalContext) -> TimerConfig {
    TimerConfig {
        name: interpolate_string(&config.name, ctx),
        duration: config.duration.as_ref().map(|d| match d {
            DurationSpec::Millis(ms) => DurationSpec::Millis(*ms),
            DurationSpec::Human(s) => DurationSpec::Human(interpolate_string(s, ctx)),
        }),
        cron: config.cron.as_ref().map(|c| interpolate_string(c, ctx)),
        on_expire: OnExpire {
            topic: interpolate_string(&config.on_expire.topic, ctx),
            data: interpolate_map(&config.on_expire.data, ctx),
        },
        repeat: config.repeat,
        max_count: config.max_count,
    }
}
