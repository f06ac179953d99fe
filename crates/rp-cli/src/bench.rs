use std::time::Instant;

use rp_compiler::{compile, CompilerConfig};
use rp_core::{
    ActionKind, Condition, ConditionTarget, EngineConfig, Header, Operator, Rule, RuleEngine, RuleStatus,
    RuleType, StoredState,
};

pub struct BenchOptions {
    /// Benchmark these rules instead of a synthetic set
    pub rules: Option<Vec<Rule>>,
    pub synthetic_rules: usize,
    pub iterations: usize,
}

const BUDGET_COLD_START_MS: f64 = 50.0;
const BUDGET_HOOK_P99_US: f64 = 500.0;
const BUDGET_MUTATION_P99_US: f64 = 5000.0;
const BUDGET_COMPILE_MS: f64 = 50.0;

const BENCH_URLS: [&str; 5] = [
    "https://pagead2.googlesyndication.com/pagead/js/adsbygoogle.js",
    "https://www.google-analytics.com/analytics.js",
    "https://site3.example.com/style.css",
    "https://cdn.example.com/image.png",
    "https://api12.example.com/v1/data.json?page=2",
];

pub fn run_bench(opts: BenchOptions) -> Result<(), String> {
    println!("Performance Budget Check");
    println!("==================================================");

    let rules = match opts.rules {
        Some(rules) if !rules.is_empty() => rules,
        _ => synthetic_rules(opts.synthetic_rules),
    };
    println!("Rules: {}", rules.len());

    let cold_start_begin = Instant::now();
    let state = StoredState {
        rules,
        ..Default::default()
    };
    let (engine, _notifications) = RuleEngine::with_state(&EngineConfig::default(), state)
        .map_err(|e| format!("Invalid rule set: {}", e))?;
    let cold_start_ms = cold_start_begin.elapsed().as_secs_f64() * 1000.0;

    println!("Warming up...");
    let headers = vec![Header::new("Accept", "*/*"), Header::new("User-Agent", "rp-cli")];
    for _ in 0..1000 {
        let _ = engine.on_before_send(BENCH_URLS[0], &headers);
    }

    println!("Measuring hook latency...");
    let hook_latencies = measure_hook_latency(&engine, &headers, opts.iterations);
    let hook_p50 = percentile(&hook_latencies, 0.50);
    let hook_p99 = percentile(&hook_latencies, 0.99);

    println!("Measuring mutation latency...");
    let mutation_latencies = measure_mutation_latency(&engine, opts.iterations.min(200))?;
    let mutation_p99 = percentile(&mutation_latencies, 0.99);

    let compile_begin = Instant::now();
    let compiled = compile(&engine.table(), &CompilerConfig::default());
    let compile_ms = compile_begin.elapsed().as_secs_f64() * 1000.0;

    let mut passed = true;
    println!();
    println!("Results");
    println!("--------------------------------------------------");
    println!("  Hook P50 Latency: {:.2} μs", hook_p50);
    println!("  Compiled Rules: {}", compiled.len());

    passed &= report_budget("Cold Start", cold_start_ms, BUDGET_COLD_START_MS, "ms");
    passed &= report_budget("Hook P99 Latency", hook_p99, BUDGET_HOOK_P99_US, "μs");
    passed &= report_budget("Mutation P99 Latency", mutation_p99, BUDGET_MUTATION_P99_US, "μs");
    passed &= report_budget("Compile Time", compile_ms, BUDGET_COMPILE_MS, "ms");

    println!();
    println!("==================================================");

    if passed {
        println!("✓ All performance budgets passed");
        Ok(())
    } else {
        Err("Performance budget exceeded".to_string())
    }
}

fn report_budget(name: &str, actual: f64, limit: f64, unit: &str) -> bool {
    let passed = actual <= limit;
    let status = if passed { "✓" } else { "✗" };
    println!(
        "{} {}: {:.2} {} (limit: {:.2} {})",
        status, name, actual, unit, limit, unit
    );
    passed
}

/// One sample per URL per iteration, covering every traffic hook.
fn measure_hook_latency(engine: &RuleEngine, headers: &[Header], iterations: usize) -> Vec<f64> {
    let mut latencies = Vec::with_capacity(iterations * BENCH_URLS.len());

    for _ in 0..iterations {
        for url in BENCH_URLS {
            let start = Instant::now();
            let _ = engine.on_before_send(url, headers);
            let _ = engine.on_headers_received(url, headers);
            let _ = engine.on_before_request(url);
            let _ = engine.on_response_lookup(url, None);
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
        }
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    latencies
}

fn measure_mutation_latency(engine: &RuleEngine, iterations: usize) -> Result<Vec<f64>, String> {
    let Some(id) = engine.table().rules().first().map(|r| r.id.clone()) else {
        return Ok(Vec::new());
    };

    let mut latencies = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let start = Instant::now();
        engine.toggle(&id).map_err(|e| format!("Toggle failed: {}", e))?;
        latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(latencies)
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}

/// A mix of every rule type, roughly a tenth of them using regex conditions.
pub fn synthetic_rules(count: usize) -> Vec<Rule> {
    let now = chrono::Utc::now();
    (0..count)
        .map(|i| {
            let rule_type = RuleType::ALL[i % RuleType::ALL.len()];
            let mut rule = Rule::template(format!("bench_{i}"), rule_type, now);
            rule.status = RuleStatus::Active;

            let (target, operator, value) = match i % 10 {
                0 => (ConditionTarget::Url, Operator::Regex, format!(r"^https://api{i}\.example\.com/v\d+/")),
                1 | 2 => (ConditionTarget::Host, Operator::Equals, format!("site{i}.example.com")),
                3 => (ConditionTarget::Path, Operator::StartsWith, format!("/assets/{i}/")),
                _ => (ConditionTarget::Url, Operator::Contains, format!("site{i}.example.com")),
            };
            rule.conditions[0] = Condition {
                id: format!("bench_{i}_c0"),
                target,
                operator,
                value,
            };

            let action = &mut rule.actions[0];
            match action.kind {
                ActionKind::AddHeader | ActionKind::AddParam => {
                    action.key = Some(format!("x-bench-{i}"));
                    action.value = "1".to_string();
                }
                ActionKind::Redirect => action.value = "https://example.org/".to_string(),
                ActionKind::InjectScript => action.value = format!("console.log({i})"),
                ActionKind::UserAgent => action.value = "Bench/1.0".to_string(),
                ActionKind::ModifyResponse => action.value = r#"{"bench":true}"#.to_string(),
                _ => {}
            }
            rule
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.5), 2.0);
        assert_eq!(percentile(&sorted, 0.99), 4.0);
        assert_eq!(percentile(&[], 0.99), 0.0);
    }

    #[test]
    fn test_synthetic_rules_are_valid() {
        let rules = synthetic_rules(64);
        let state = StoredState {
            rules,
            ..Default::default()
        };
        let (engine, _rx) = RuleEngine::with_state(&EngineConfig::default(), state).unwrap();
        assert_eq!(engine.stats().active_rules, 64);
        assert!(!compile(&engine.table(), &CompilerConfig::default()).is_empty());
    }
}
