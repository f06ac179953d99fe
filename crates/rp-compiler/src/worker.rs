//! Background recompilation
//!
//! The [`Recompiler`] follows the engine's table publications and installs a
//! freshly compiled table into the host after each one. Publications that
//! arrive while an install is in flight collapse into a single recompile of
//! the latest table.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use rp_core::{RuleEngine, RuleTable};

use crate::declarative::{compile, CompiledRule, CompilerConfig};

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Compiled table has {requested} rules, host accepts at most {limit}")]
    TooLarge { limit: usize, requested: usize },
    #[error("Host rejected compiled table: {0}")]
    Rejected(String),
}

/// Host side of the declarative table.
#[async_trait]
pub trait DeclarativeSink: Send + Sync {
    /// Replace the whole installed table with `rules`.
    async fn install(&self, rules: Vec<CompiledRule>) -> Result<(), InstallError>;
}

pub struct Recompiler {
    engine: Weak<RuleEngine>,
    tables: watch::Receiver<Arc<RuleTable>>,
    sink: Arc<dyn DeclarativeSink>,
    config: CompilerConfig,
}

impl Recompiler {
    pub fn new(engine: &Arc<RuleEngine>, sink: Arc<dyn DeclarativeSink>, config: CompilerConfig) -> Self {
        Self {
            engine: Arc::downgrade(engine),
            tables: engine.subscribe(),
            sink,
            config,
        }
    }

    /// Start the worker on the current runtime. It stops once the engine is
    /// dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        // Install whatever is current before waiting for changes
        self.tables.mark_changed();

        while self.tables.changed().await.is_ok() {
            let table = self.tables.borrow_and_update().clone();
            // Failures are logged and routed to the synchronous path
            let _ = self.install(&table).await;
        }

        log::debug!("rule engine dropped, recompiler exiting");
    }

    /// Compile and install the engine's current table once.
    pub async fn recompile(&self) -> Result<usize, InstallError> {
        let table = self.tables.borrow().clone();
        self.install(&table).await
    }

    async fn install(&self, table: &Arc<RuleTable>) -> Result<usize, InstallError> {
        let rules = compile(table, &self.config);
        let count = rules.len();

        let result = if count > self.config.max_rules {
            Err(InstallError::TooLarge {
                limit: self.config.max_rules,
                requested: count,
            })
        } else {
            self.sink.install(rules).await
        };

        match result {
            Ok(()) => {
                log::info!("installed {} declarative rules", count);
                Ok(count)
            }
            Err(e) => {
                log::error!("failed to install declarative rules: {}", e);
                if let Some(engine) = self.engine.upgrade() {
                    engine.fall_back_from(table);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rp_core::types::{Condition, ConditionTarget, Decision, Operator, RuleStatus, RuleType};
    use rp_core::{EngineConfig, Routing, Rule, StoredState};
    use tokio::sync::mpsc;

    use super::*;

    struct ChannelSink {
        installs: mpsc::UnboundedSender<Vec<CompiledRule>>,
        reject_non_empty: bool,
    }

    #[async_trait]
    impl DeclarativeSink for ChannelSink {
        async fn install(&self, rules: Vec<CompiledRule>) -> Result<(), InstallError> {
            let non_empty = !rules.is_empty();
            let _ = self.installs.send(rules);
            if self.reject_non_empty && non_empty {
                return Err(InstallError::Rejected("rule quota exceeded".to_string()));
            }
            Ok(())
        }
    }

    fn sink(reject_non_empty: bool) -> (Arc<ChannelSink>, mpsc::UnboundedReceiver<Vec<CompiledRule>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = ChannelSink {
            installs: tx,
            reject_non_empty,
        };
        (Arc::new(sink), rx)
    }

    fn block_rule(id: &str, host: &str) -> Rule {
        let mut rule = Rule::template(id, RuleType::Block, "2024-01-01T00:00:00Z".parse().unwrap());
        rule.status = RuleStatus::Active;
        rule.conditions = vec![Condition {
            id: format!("{id}_c0"),
            target: ConditionTarget::Host,
            operator: Operator::Equals,
            value: host.to_string(),
        }];
        rule
    }

    fn engine(rules: Vec<Rule>) -> Arc<RuleEngine> {
        let state = StoredState {
            rules,
            ..Default::default()
        };
        let (engine, _rx) = RuleEngine::with_state(&EngineConfig::default(), state).unwrap();
        Arc::new(engine)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Vec<CompiledRule>>) -> Vec<CompiledRule> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("install within timeout")
            .expect("sink alive")
    }

    #[tokio::test]
    async fn installs_current_table_then_follows_mutations() {
        let engine = engine(vec![block_rule("a", "ads.example.com")]);
        let (sink, mut installs) = sink(false);
        let handle = Recompiler::new(&engine, sink, CompilerConfig::default()).spawn();

        assert_eq!(next(&mut installs).await.len(), 1);

        engine.add(block_rule("b", "tracker.example.com")).unwrap();
        let mut latest = next(&mut installs).await;
        while latest.len() != 2 {
            latest = next(&mut installs).await;
        }
        assert_eq!(latest[1].condition.domains, Some(vec!["tracker.example.com".to_string()]));

        drop(engine);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker exits after engine drop")
            .unwrap();
    }

    #[tokio::test]
    async fn failed_install_falls_back_to_synchronous_path() {
        let engine = engine(vec![block_rule("a", "ads.example.com")]);
        let (sink, mut installs) = sink(true);
        let _handle = Recompiler::new(&engine, sink, CompilerConfig::default()).spawn();

        assert_eq!(next(&mut installs).await.len(), 1);
        // Fallback republishes, and the recompile clears the host table
        assert!(next(&mut installs).await.is_empty());

        assert_eq!(engine.table().routing(), Routing::Synchronous);
        let verdict = engine.on_before_request("https://ads.example.com/banner.js");
        assert_eq!(verdict.decision, Decision::Block);
        assert_eq!(engine.stats().blocked_requests, 1);
    }

    #[tokio::test]
    async fn oversized_table_is_not_installed() {
        let engine = engine(vec![block_rule("a", "a.example.com"), block_rule("b", "b.example.com")]);
        let (sink, mut installs) = sink(false);
        let config = CompilerConfig {
            max_rules: 1,
            ..Default::default()
        };
        let recompiler = Recompiler::new(&engine, sink, config);

        let err = recompiler.recompile().await.unwrap_err();
        assert!(matches!(err, InstallError::TooLarge { limit: 1, requested: 2 }));
        assert!(installs.try_recv().is_err());
        assert_eq!(engine.table().routing(), Routing::Synchronous);

        // The synchronous table compiles to nothing, which always fits
        assert_eq!(recompiler.recompile().await.unwrap(), 0);
        assert!(next(&mut installs).await.is_empty());
    }

    /// Publishes a new table from inside the first install, then rejects it.
    struct SupersedingSink {
        engine: std::sync::Mutex<Option<Arc<RuleEngine>>>,
    }

    #[async_trait]
    impl DeclarativeSink for SupersedingSink {
        async fn install(&self, _rules: Vec<CompiledRule>) -> Result<(), InstallError> {
            let engine = self.engine.lock().unwrap().take();
            match engine {
                Some(engine) => {
                    engine.add(block_rule("b", "tracker.example.com")).unwrap();
                    Err(InstallError::Rejected("busy".to_string()))
                }
                None => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn failure_of_superseded_table_keeps_declarative_routing() {
        let engine = engine(vec![block_rule("a", "ads.example.com")]);
        let sink = Arc::new(SupersedingSink {
            engine: std::sync::Mutex::new(Some(engine.clone())),
        });
        let recompiler = Recompiler::new(&engine, sink, CompilerConfig::default());

        assert!(recompiler.recompile().await.is_err());
        assert_eq!(engine.table().routing(), Routing::Declarative);
        assert_eq!(recompiler.recompile().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mutation_after_fallback_retries_declarative_install() {
        let engine = engine(vec![block_rule("a", "ads.example.com")]);
        engine.fall_back_to_synchronous();
        let (sink, mut installs) = sink(false);
        let recompiler = Recompiler::new(&engine, sink, CompilerConfig::default());

        assert_eq!(recompiler.recompile().await.unwrap(), 0);
        engine.toggle("a").unwrap();
        engine.toggle("a").unwrap();
        assert_eq!(recompiler.recompile().await.unwrap(), 1);
        assert_eq!(next(&mut installs).await.len(), 0);
        assert_eq!(next(&mut installs).await.len(), 1);
    }
}
