//! Grid configuration: which strategies a run uses, with which parameters.
//!
//! A [`GridConfig`] holds `Arc` references to the strategies, the static
//! [`GridParams`], a feedback listener and a [`Runtime`] with the random
//! generator and scratch cache. The runtime is never shared between work
//! units: workers call [`GridConfig::for_work_unit`], which rebuilds it.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::engine::EvolutionEngine;
use crate::error::ConfigError;
use crate::feedback::{Feedback, TracingFeedback};
use crate::message::{StrategyRefs, WorkRequest};
use crate::params::GridParams;
use crate::registry::Registry;
use crate::strategy::{
    ClientEvolveFactory, ClientEvolveStrategy, GenotypeInitializer, SplitStrategy,
    WorkerEvolveStrategy, WorkerReturnStrategy,
};

/// Serializable description of a configuration: strategy names plus params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub split: String,
    pub initializer: Option<String>,
    pub worker_evolve: Option<String>,
    pub worker_return: String,
    pub client_evolve: String,
    pub engine: String,
    #[serde(default)]
    pub params: GridParams,
}

/// Transient per-work-unit state. Never serialized, never cloned.
pub struct Runtime {
    pub rng: StdRng,
    pub cache: HashMap<String, serde_json::Value>,
}

impl Runtime {
    /// Seeded from `seed` mixed with `scope`, or from entropy without a seed
    pub fn seeded(seed: Option<u64>, scope: &str) -> Self {
        let rng = match seed {
            Some(seed) => {
                let mut hasher = DefaultHasher::new();
                scope.hash(&mut hasher);
                StdRng::seed_from_u64(seed ^ hasher.finish())
            }
            None => StdRng::from_entropy(),
        };
        Self { rng, cache: HashMap::new() }
    }
}

pub struct GridConfig {
    name: String,
    params: GridParams,
    split: Option<Arc<dyn SplitStrategy>>,
    initializer: Option<Arc<dyn GenotypeInitializer>>,
    worker_evolve: Option<Arc<dyn WorkerEvolveStrategy>>,
    worker_return: Option<Arc<dyn WorkerReturnStrategy>>,
    client_evolve: Option<ClientEvolveFactory>,
    engine: Option<Arc<dyn EvolutionEngine>>,
    feedback: Arc<dyn Feedback>,
    refs: StrategyRefs,
    validated: bool,
    runtime: Runtime,
}

impl GridConfig {
    /// Bare configuration: default params, no strategies, not validated
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: GridParams::default(),
            split: None,
            initializer: None,
            worker_evolve: None,
            worker_return: None,
            client_evolve: None,
            engine: None,
            feedback: Arc::new(TracingFeedback),
            refs: StrategyRefs::default(),
            validated: false,
            runtime: Runtime::seeded(None, name),
        }
    }

    /// Wire every strategy named in `node` from `registry`
    pub fn initialize(node: &NodeConfig, registry: &Registry) -> Result<Self, ConfigError> {
        let mut config = Self::new(&node.name);
        config.params = node.params.clone();
        config.split = Some(registry.split(&node.split)?);
        config.initializer = node.initializer.as_deref().map(|n| registry.initializer(n)).transpose()?;
        config.worker_evolve = node.worker_evolve.as_deref().map(|n| registry.worker_evolve(n)).transpose()?;
        config.worker_return = Some(registry.worker_return(&node.worker_return)?);
        config.client_evolve = Some(registry.client_evolve(&node.client_evolve)?);
        config.engine = Some(registry.engine(&node.engine)?);
        config.refs = StrategyRefs {
            initializer: node.initializer.clone(),
            evolve: node.worker_evolve.clone(),
            result: Some(node.worker_return.clone()),
            engine: Some(node.engine.clone()),
        };
        config.runtime = Runtime::seeded(config.params.seed, &config.name);
        Ok(config)
    }

    /// Fail fast on anything a run cannot do without
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.validated = false;
        self.params.check()?;
        if self.split.is_none() {
            return Err(ConfigError::MissingStrategy("split"));
        }
        if self.worker_return.is_none() {
            return Err(ConfigError::MissingStrategy("worker-return"));
        }
        if self.client_evolve.is_none() {
            return Err(ConfigError::MissingStrategy("client-evolve"));
        }
        if self.engine.is_none() {
            return Err(ConfigError::MissingEngine);
        }
        self.validated = true;
        Ok(())
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Copy for one work unit: shared strategy references and params, a
    /// freshly built runtime
    pub fn derive_scoped(&self, work_unit_id: &str) -> GridConfig {
        GridConfig {
            name: self.name.clone(),
            params: self.params.clone(),
            split: self.split.clone(),
            initializer: self.initializer.clone(),
            worker_evolve: self.worker_evolve.clone(),
            worker_return: self.worker_return.clone(),
            client_evolve: self.client_evolve.clone(),
            engine: self.engine.clone(),
            feedback: self.feedback.clone(),
            refs: self.refs.clone(),
            validated: self.validated,
            runtime: Runtime::seeded(self.params.seed, work_unit_id),
        }
    }

    /// Worker-side configuration built from the request alone, for a
    /// configuration this process never registered
    pub fn from_request(request: &WorkRequest, registry: &Registry) -> Result<GridConfig, ConfigError> {
        GridConfig::new(&request.config_id).for_work_unit(request, registry)
    }

    /// Scoped configuration for `request`: its params, and the worker
    /// strategies and engine it names. An unnamed return strategy or engine
    /// falls back to ours.
    pub fn for_work_unit(&self, request: &WorkRequest, registry: &Registry) -> Result<GridConfig, ConfigError> {
        request.params.check()?;
        let mut scoped = self.derive_scoped(&request.id);
        scoped.params = request.params.clone();
        scoped.runtime = Runtime::seeded(scoped.params.seed, &request.id);

        let refs = &request.strategies;
        scoped.initializer = refs.initializer.as_deref().map(|n| registry.initializer(n)).transpose()?;
        scoped.worker_evolve = refs.evolve.as_deref().map(|n| registry.worker_evolve(n)).transpose()?;
        if let Some(name) = &refs.result {
            scoped.worker_return = Some(registry.worker_return(name)?);
        }
        if let Some(name) = &refs.engine {
            scoped.engine = Some(registry.engine(name)?);
        }
        if scoped.worker_return.is_none() {
            return Err(ConfigError::MissingStrategy("worker-return"));
        }
        scoped.refs = refs.clone();
        Ok(scoped)
    }

    /// Template request carrying this configuration's name, params and
    /// worker strategy names
    pub fn template_request(&self, session: &str) -> WorkRequest {
        let mut template = WorkRequest::template(session, &self.name, self.params.clone());
        template.strategies = self.refs.clone();
        template.title = self.name.clone();
        template.description = format!("{} work unit", self.name);
        template
    }

    pub fn build_client_evolve(&self) -> Result<Box<dyn ClientEvolveStrategy>, ConfigError> {
        let factory = self
            .client_evolve
            .as_ref()
            .ok_or(ConfigError::MissingStrategy("client-evolve"))?;
        Ok(factory(&self.params))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &GridParams {
        &self.params
    }

    pub fn split(&self) -> Option<Arc<dyn SplitStrategy>> {
        self.split.clone()
    }

    pub fn initializer(&self) -> Option<Arc<dyn GenotypeInitializer>> {
        self.initializer.clone()
    }

    pub fn worker_evolve(&self) -> Option<Arc<dyn WorkerEvolveStrategy>> {
        self.worker_evolve.clone()
    }

    pub fn worker_return(&self) -> Option<Arc<dyn WorkerReturnStrategy>> {
        self.worker_return.clone()
    }

    pub fn engine(&self) -> Option<Arc<dyn EvolutionEngine>> {
        self.engine.clone()
    }

    pub fn feedback(&self) -> Arc<dyn Feedback> {
        self.feedback.clone()
    }

    pub fn strategy_refs(&self) -> &StrategyRefs {
        &self.refs
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.runtime.rng
    }

    pub fn cache(&mut self) -> &mut HashMap<String, serde_json::Value> {
        &mut self.runtime.cache
    }

    // Every setter drops the validated flag.

    pub fn set_params(&mut self, params: GridParams) {
        self.runtime = Runtime::seeded(params.seed, &self.name);
        self.params = params;
        self.validated = false;
    }

    pub fn set_split(&mut self, split: Arc<dyn SplitStrategy>) {
        self.split = Some(split);
        self.validated = false;
    }

    pub fn set_initializer(&mut self, initializer: Option<Arc<dyn GenotypeInitializer>>) {
        self.refs.initializer = initializer.as_ref().map(|s| s.name().to_string());
        self.initializer = initializer;
        self.validated = false;
    }

    pub fn set_worker_evolve(&mut self, evolve: Option<Arc<dyn WorkerEvolveStrategy>>) {
        self.refs.evolve = evolve.as_ref().map(|s| s.name().to_string());
        self.worker_evolve = evolve;
        self.validated = false;
    }

    pub fn set_worker_return(&mut self, worker_return: Arc<dyn WorkerReturnStrategy>) {
        self.refs.result = Some(worker_return.name().to_string());
        self.worker_return = Some(worker_return);
        self.validated = false;
    }

    pub fn set_client_evolve(&mut self, factory: ClientEvolveFactory) {
        self.client_evolve = Some(factory);
        self.validated = false;
    }

    pub fn set_engine(&mut self, engine: Arc<dyn EvolutionEngine>) {
        self.refs.engine = Some(engine.name().to_string());
        self.engine = Some(engine);
        self.validated = false;
    }

    pub fn set_feedback(&mut self, feedback: Arc<dyn Feedback>) {
        self.feedback = feedback;
    }
}

impl fmt::Debug for GridConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridConfig")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("split", &self.split.as_ref().map(|s| s.name().to_string()))
            .field("refs", &self.refs)
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_string()))
            .field("validated", &self.validated)
            .finish_non_exhaustive()
    }
}
