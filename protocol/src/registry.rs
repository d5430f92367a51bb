//! Name → constructor lookup for every pluggable piece.
//!
//! Configurations refer to strategies by name (`"elitist"`, `"fittest"`,
//! ...). The registry resolves those names at startup, so an unknown name
//! fails before any network activity instead of halfway through a run.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{GridConfig, NodeConfig};
use crate::engine::{EvolutionEngine, SphereEngine};
use crate::error::ConfigError;
use crate::params::GridParams;
use crate::strategy::{
    ClientEvolveFactory, ClientEvolveStrategy, DefaultClientEvolve, ElitistSplit, FittestReturn,
    FixedCycles, GenotypeInitializer, RandomTopUp, SplitStrategy, TopKReturn, WorkerEvolveStrategy,
    WorkerReturnStrategy,
};

type Ctor<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

struct Table<T: ?Sized> {
    kind: &'static str,
    ctors: BTreeMap<String, Ctor<T>>,
}

impl<T: ?Sized> Table<T> {
    fn new(kind: &'static str) -> Self {
        Self { kind, ctors: BTreeMap::new() }
    }

    fn insert(&mut self, name: &str, ctor: Ctor<T>) {
        self.ctors.insert(name.to_string(), ctor);
    }

    fn resolve(&self, name: &str) -> Result<Arc<T>, ConfigError> {
        match self.ctors.get(name) {
            Some(ctor) => Ok(ctor()),
            None => Err(unknown(self.kind, name, self.ctors.keys())),
        }
    }
}

fn unknown<'a>(kind: &'static str, name: &str, known: impl Iterator<Item = &'a String>) -> ConfigError {
    ConfigError::UnknownName {
        kind,
        name: name.to_string(),
        known: known.map(String::as_str).collect::<Vec<_>>().join(", "),
    }
}

pub struct Registry {
    splits: Table<dyn SplitStrategy>,
    initializers: Table<dyn GenotypeInitializer>,
    worker_evolves: Table<dyn WorkerEvolveStrategy>,
    worker_returns: Table<dyn WorkerReturnStrategy>,
    engines: Table<dyn EvolutionEngine>,
    clients: BTreeMap<String, ClientEvolveFactory>,
    configs: BTreeMap<String, NodeConfig>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Registry {
    /// Nothing registered
    pub fn empty() -> Self {
        Self {
            splits: Table::new("split"),
            initializers: Table::new("initializer"),
            worker_evolves: Table::new("worker-evolve"),
            worker_returns: Table::new("worker-return"),
            engines: Table::new("engine"),
            clients: BTreeMap::new(),
            configs: BTreeMap::new(),
        }
    }

    /// Every built-in strategy, the sphere engine and the stock
    /// configurations `sphere`, `sphere-population`, `sphere-local`, `ping`
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry
            .register_split("elitist", || Arc::new(ElitistSplit))
            .register_initializer("random-top-up", || Arc::new(RandomTopUp))
            .register_worker_evolve("fixed-cycles", || Arc::new(FixedCycles))
            .register_worker_return("fittest", || Arc::new(FittestReturn))
            .register_worker_return("top-k", || Arc::new(TopKReturn))
            .register_engine("sphere", || Arc::new(SphereEngine::default()))
            .register_client_evolve("default", |params| Box::new(DefaultClientEvolve::new(params)))
            .register_client_evolve("local-evolve", |params| {
                Box::new(DefaultClientEvolve::new(params).with_local_cycles(5))
            });

        let sphere = NodeConfig {
            name: "sphere".into(),
            split: "elitist".into(),
            initializer: Some("random-top-up".into()),
            worker_evolve: Some("fixed-cycles".into()),
            worker_return: "fittest".into(),
            client_evolve: "default".into(),
            engine: "sphere".into(),
            params: GridParams::default(),
        };
        registry
            .register_config(NodeConfig {
                name: "sphere-population".into(),
                worker_return: "top-k".into(),
                params: GridParams { return_top_k: 10, ..GridParams::default() },
                ..sphere.clone()
            })
            .register_config(NodeConfig {
                name: "sphere-local".into(),
                client_evolve: "local-evolve".into(),
                ..sphere.clone()
            })
            .register_config(NodeConfig {
                name: "ping".into(),
                initializer: None,
                worker_evolve: None,
                ..sphere.clone()
            })
            .register_config(sphere);
        registry
    }

    pub fn register_split(
        &mut self,
        name: &str,
        ctor: impl Fn() -> Arc<dyn SplitStrategy> + Send + Sync + 'static,
    ) -> &mut Self {
        self.splits.insert(name, Arc::new(ctor));
        self
    }

    pub fn register_initializer(
        &mut self,
        name: &str,
        ctor: impl Fn() -> Arc<dyn GenotypeInitializer> + Send + Sync + 'static,
    ) -> &mut Self {
        self.initializers.insert(name, Arc::new(ctor));
        self
    }

    pub fn register_worker_evolve(
        &mut self,
        name: &str,
        ctor: impl Fn() -> Arc<dyn WorkerEvolveStrategy> + Send + Sync + 'static,
    ) -> &mut Self {
        self.worker_evolves.insert(name, Arc::new(ctor));
        self
    }

    pub fn register_worker_return(
        &mut self,
        name: &str,
        ctor: impl Fn() -> Arc<dyn WorkerReturnStrategy> + Send + Sync + 'static,
    ) -> &mut Self {
        self.worker_returns.insert(name, Arc::new(ctor));
        self
    }

    pub fn register_engine(
        &mut self,
        name: &str,
        ctor: impl Fn() -> Arc<dyn EvolutionEngine> + Send + Sync + 'static,
    ) -> &mut Self {
        self.engines.insert(name, Arc::new(ctor));
        self
    }

    pub fn register_client_evolve(
        &mut self,
        name: &str,
        factory: impl Fn(&GridParams) -> Box<dyn ClientEvolveStrategy> + Send + Sync + 'static,
    ) -> &mut Self {
        self.clients.insert(name.to_string(), Arc::new(factory));
        self
    }

    /// Register (or replace) a named configuration
    pub fn register_config(&mut self, node: NodeConfig) -> &mut Self {
        self.configs.insert(node.name.clone(), node);
        self
    }

    pub fn split(&self, name: &str) -> Result<Arc<dyn SplitStrategy>, ConfigError> {
        self.splits.resolve(name)
    }

    pub fn initializer(&self, name: &str) -> Result<Arc<dyn GenotypeInitializer>, ConfigError> {
        self.initializers.resolve(name)
    }

    pub fn worker_evolve(&self, name: &str) -> Result<Arc<dyn WorkerEvolveStrategy>, ConfigError> {
        self.worker_evolves.resolve(name)
    }

    pub fn worker_return(&self, name: &str) -> Result<Arc<dyn WorkerReturnStrategy>, ConfigError> {
        self.worker_returns.resolve(name)
    }

    pub fn engine(&self, name: &str) -> Result<Arc<dyn EvolutionEngine>, ConfigError> {
        self.engines.resolve(name)
    }

    pub fn client_evolve(&self, name: &str) -> Result<ClientEvolveFactory, ConfigError> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| unknown("client-evolve", name, self.clients.keys()))
    }

    pub fn node_config(&self, name: &str) -> Result<NodeConfig, ConfigError> {
        self.configs
            .get(name)
            .cloned()
            .ok_or_else(|| unknown("configuration", name, self.configs.keys()))
    }

    pub fn config_names(&self) -> Vec<&str> {
        self.configs.keys().map(String::as_str).collect()
    }

    /// Initialize and validate a configuration in one step
    pub fn build_node(&self, node: &NodeConfig) -> Result<GridConfig, ConfigError> {
        let mut config = GridConfig::initialize(node, self)?;
        config.validate()?;
        Ok(config)
    }

    /// [`build_node`](Self::build_node) for a registered configuration name
    pub fn build(&self, config_id: &str) -> Result<GridConfig, ConfigError> {
        self.build_node(&self.node_config(config_id)?)
    }
}
