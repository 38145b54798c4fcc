use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{info, warn};

use common::command::CreateStrategy;
use common::{Error, Result, Strategy, StrategyStatus};

const CONFIG_EXT: &str = "toml";

/// In-memory table of strategies keyed by name, backed by one TOML config
/// file per strategy under the strategies directory.
///
/// All mutation happens on the dispatcher task, which processes commands
/// run-to-completion; callers share the registry behind an `RwLock`.
pub struct StrategyRegistry {
    dir: PathBuf,
    strategies: BTreeMap<String, Strategy>,
}

impl StrategyRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), strategies: BTreeMap::new() }
    }

    /// Scan the strategies directory and load every parsable config file.
    ///
    /// Every loaded strategy starts `Stopped` regardless of its state before
    /// the last shutdown: a process is never resurrected across restarts.
    /// Unparsable files are skipped with a warning.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut registry = Self::new(dir);
        for entry in std::fs::read_dir(&registry.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CONFIG_EXT) {
                continue;
            }
            match load_strategy_file(&path) {
                Ok(strategy) => {
                    info!(name = %strategy.name, "Loaded strategy config");
                    registry.strategies.insert(strategy.name.clone(), strategy);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unparsable strategy config");
                }
            }
        }
        Ok(registry)
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{CONFIG_EXT}"))
    }

    pub fn get(&self, name: &str) -> Option<&Strategy> {
        self.strategies.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Strategy> {
        self.strategies.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn list(&self) -> Vec<&Strategy> {
        self.strategies.values().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn count_with_status(&self, status: StrategyStatus) -> usize {
        self.strategies.values().filter(|s| s.status == status).count()
    }

    /// Insert a new strategy. The config file is written before the entry
    /// becomes visible; on a duplicate name nothing is touched.
    pub fn create(&mut self, fields: CreateStrategy) -> Result<&Strategy> {
        if self.strategies.contains_key(&fields.name) {
            return Err(Error::Conflict(format!("strategy '{}' already exists", fields.name)));
        }
        reject_nulls(&fields.config)?;

        let strategy = Strategy::new(
            fields.name,
            fields.strategy_type,
            fields.exchange,
            fields.trading_pair,
            fields.config,
        );
        self.persist(&strategy)?;

        let name = strategy.name.clone();
        info!(name = %name, strategy_type = %strategy.strategy_type, "Created strategy");
        Ok(self.strategies.entry(name).or_insert(strategy))
    }

    /// Deep-merge a partial document into the strategy's config and rewrite
    /// its file. Untouched keys are never dropped: nested objects merge
    /// recursively, scalars and arrays overwrite.
    pub fn update_config(&mut self, name: &str, partial: &Value) -> Result<&Strategy> {
        reject_nulls(partial)?;
        let strategy = self
            .strategies
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        let mut merged = strategy.config.clone();
        deep_merge(&mut merged, partial);

        let previous = std::mem::replace(&mut strategy.config, merged);
        strategy.touch();
        if let Err(e) = persist_to(&self.dir, strategy) {
            // Keep memory and disk consistent when the rewrite fails.
            strategy.config = previous;
            return Err(e);
        }

        info!(name = %name, "Updated strategy config");
        Ok(&self.strategies[name])
    }

    /// Remove a strategy: its config file first, then the entry.
    pub fn remove(&mut self, name: &str) -> Result<Strategy> {
        if !self.strategies.contains_key(name) {
            return Err(Error::NotFound(name.to_string()));
        }
        let path = self.config_path(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        match self.strategies.remove(name) {
            Some(strategy) => {
                info!(name = %name, "Deleted strategy");
                Ok(strategy)
            }
            None => Err(Error::NotFound(name.to_string())),
        }
    }

    pub fn set_status(&mut self, name: &str, status: StrategyStatus) -> Result<()> {
        let strategy = self
            .strategies
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        strategy.status = status;
        strategy.touch();
        Ok(())
    }

    fn persist(&self, strategy: &Strategy) -> Result<()> {
        persist_to(&self.dir, strategy)
    }
}

/// Write the merged document (descriptor fields plus config keys) as TOML.
fn persist_to(dir: &Path, strategy: &Strategy) -> Result<()> {
    let mut doc = Map::new();
    doc.insert("strategy_type".into(), Value::String(strategy.strategy_type.clone()));
    doc.insert("exchange".into(), Value::String(strategy.exchange.clone()));
    doc.insert("trading_pair".into(), Value::String(strategy.trading_pair.clone()));
    if let Value::Object(config) = &strategy.config {
        for (k, v) in config {
            doc.insert(k.clone(), v.clone());
        }
    }

    let toml_value = toml::Value::try_from(Value::Object(doc))
        .map_err(|e| Error::Validation(format!("config not representable as TOML: {e}")))?;
    let content = toml::to_string_pretty(&toml_value)?;

    let path = dir.join(format!("{}.{CONFIG_EXT}", strategy.name));
    std::fs::write(path, content)?;
    Ok(())
}

fn load_strategy_file(path: &Path) -> Result<Strategy> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("bad config filename: {}", path.display())))?
        .to_string();

    let content = std::fs::read_to_string(path)?;
    let doc: toml::Value = toml::from_str(&content)?;
    let mut doc = match serde_json::to_value(doc)? {
        Value::Object(map) => map,
        _ => return Err(Error::Other("strategy config is not a table".into())),
    };

    let strategy_type = take_string(&mut doc, "strategy_type");
    let exchange = take_string(&mut doc, "exchange");
    let trading_pair = take_string(&mut doc, "trading_pair");

    Ok(Strategy::new(name, strategy_type, exchange, trading_pair, Value::Object(doc)))
}

fn take_string(doc: &mut Map<String, Value>, key: &str) -> String {
    match doc.remove(key) {
        Some(Value::String(s)) => s,
        _ => "unknown".to_string(),
    }
}

/// Recursive merge of JSON objects: object-into-object recurses, everything
/// else overwrites.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(slot) if slot.is_object() && patch_value.is_object() => {
                        deep_merge(slot, patch_value);
                    }
                    _ => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (slot, patch_value) => *slot = patch_value.clone(),
    }
}

/// TOML has no null; reject nulls up front so a command fails cleanly
/// instead of at file-write time.
fn reject_nulls(value: &Value) -> Result<()> {
    match value {
        Value::Null => Err(Error::Validation("config values must not be null".into())),
        Value::Object(map) => map.values().try_for_each(reject_nulls),
        Value::Array(items) => items.iter().try_for_each(reject_nulls),
        _ => Ok(()),
    }
}
