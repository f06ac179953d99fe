use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rp_core::{
    Action, ActionKind, Condition, ConditionTarget, EngineConfig, Header, Operator, Rule, RuleEngine, RuleStatus,
    RuleType, StoredState,
};

fn rules(n: usize) -> Vec<Rule> {
    let now = chrono::Utc::now();
    (0..n)
        .map(|i| {
            let mut rule = Rule::template(format!("rule_{i}"), RuleType::ModifyHeaders, now);
            rule.status = RuleStatus::Active;
            rule.conditions = vec![Condition {
                id: format!("rule_{i}_c0"),
                target: if i % 3 == 0 { ConditionTarget::Host } else { ConditionTarget::Url },
                operator: if i % 5 == 0 { Operator::Regex } else { Operator::Contains },
                value: if i % 5 == 0 {
                    format!(r"^https://api{i}\.example\.com/")
                } else {
                    format!("site{i}.example.com")
                },
            }];
            rule.actions = vec![Action {
                id: format!("rule_{i}_a0"),
                kind: ActionKind::AddHeader,
                value: "1".to_string(),
                key: Some(format!("X-Rule-{i}")),
            }];
            rule
        })
        .collect()
}

fn bench_before_send(c: &mut Criterion) {
    let state = StoredState {
        rules: rules(500),
        ..Default::default()
    };
    let (engine, _rx) = RuleEngine::with_state(&EngineConfig::default(), state).unwrap();
    let headers = vec![Header::new("Accept", "*/*"), Header::new("User-Agent", "bench")];

    c.bench_function("on_before_send/miss", |b| {
        b.iter(|| engine.on_before_send(black_box("https://unrelated.org/index.html"), &headers))
    });
    c.bench_function("on_before_send/hit", |b| {
        b.iter(|| engine.on_before_send(black_box("https://site7.example.com/app.js"), &headers))
    });
}

fn bench_toggle(c: &mut Criterion) {
    let state = StoredState {
        rules: rules(500),
        ..Default::default()
    };
    let (engine, _rx) = RuleEngine::with_state(&EngineConfig::default(), state).unwrap();

    c.bench_function("toggle/500", |b| b.iter(|| engine.toggle(black_box("rule_250")).unwrap()));
}

criterion_group!(benches, bench_before_send, bench_toggle);
criterion_main!(benches);
