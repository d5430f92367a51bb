use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::params::GridParams;
use crate::types::{Candidate, Population};

/// Free-form headers carried next to a message
pub type Headers = HashMap<String, String>;

/// Address / correlation key at the transport layer.
///
/// Owns no payload, only says where one lives. LAN channels ignore it; WAN
/// stores use it as the mailbox name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageContext {
    pub module: String,
    pub kind: String,
    pub id: String,
}

impl MessageContext {
    pub const MODULE: &'static str = "grid";
    pub const REQUESTS: &'static str = "request";
    pub const RESULTS: &'static str = "result";

    pub fn new(module: impl Into<String>, kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self { module: module.into(), kind: kind.into(), id: id.into() }
    }

    /// Mailbox workers of `session` poll for work
    pub fn requests(session: &str) -> Self {
        Self::new(Self::MODULE, Self::REQUESTS, session)
    }

    /// Mailbox the client of `session` polls for results
    pub fn results(session: &str) -> Self {
        Self::new(Self::MODULE, Self::RESULTS, session)
    }

    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.module, self.kind, self.id)
    }
}

impl fmt::Display for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.module, self.kind, self.id)
    }
}

/// Registry names of the worker-side strategies and the engine a request
/// asks for. `None` for initializer or evolve means "skip that step".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyRefs {
    pub initializer: Option<String>,
    pub evolve: Option<String>,
    pub result: Option<String>,
    pub engine: Option<String>,
}

/// One unit of work: a population fragment plus everything a worker needs
/// to evolve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub session: String,
    pub id: String,
    /// Position in the batch, unique per cycle
    pub chunk: u32,
    pub cycle: u64,
    #[serde(default)]
    pub population: Population,
    #[serde(default)]
    pub strategies: StrategyRefs,
    /// Registry name of the grid configuration
    pub config_id: String,
    #[serde(default)]
    pub params: GridParams,
    pub created_at: DateTime<Utc>,
    pub min_fitness_to_report: Option<f64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl WorkRequest {
    /// Template the split strategy copies for every fragment
    pub fn template(session: &str, config_id: &str, params: GridParams) -> Self {
        Self {
            session: session.to_string(),
            id: String::new(),
            chunk: 0,
            cycle: 0,
            population: Population::default(),
            strategies: StrategyRefs::default(),
            config_id: config_id.to_string(),
            min_fitness_to_report: params.min_fitness_to_report,
            params,
            created_at: Utc::now(),
            title: String::new(),
            description: String::new(),
        }
    }

    /// Copy of this template carrying one fragment under a fresh id
    pub fn fragment(&self, chunk: u32, cycle: u64, population: Population) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chunk,
            cycle,
            population,
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// What a worker reports back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ResultPayload {
    /// Nothing better than what was sent
    #[default]
    Empty,
    /// Incremental improvement, merged by addition
    SingleBest(Candidate),
    /// Full state handoff, merged by replacement
    Population(Population),
}

impl ResultPayload {
    pub fn is_empty(&self) -> bool {
        match self {
            ResultPayload::Empty => true,
            ResultPayload::SingleBest(_) => false,
            ResultPayload::Population(p) => p.is_empty(),
        }
    }

    pub fn candidate_count(&self) -> usize {
        match self {
            ResultPayload::Empty => 0,
            ResultPayload::SingleBest(_) => 1,
            ResultPayload::Population(p) => p.len(),
        }
    }

    pub fn best(&self) -> Option<&Candidate> {
        match self {
            ResultPayload::Empty => None,
            ResultPayload::SingleBest(c) => Some(c),
            ResultPayload::Population(p) => p.fittest(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub session: String,
    /// Id of the originating request
    pub id: String,
    pub chunk: u32,
    #[serde(default)]
    pub payload: ResultPayload,
    /// Local evolution cycles completed
    #[serde(default)]
    pub units_of_work: u64,
    #[serde(default)]
    pub duration_ms: u64,
    pub worker: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkResult {
    pub fn for_request(request: &WorkRequest, payload: ResultPayload) -> Self {
        Self {
            session: request.session.clone(),
            id: request.id.clone(),
            chunk: request.chunk,
            payload,
            units_of_work: 0,
            duration_ms: 0,
            worker: None,
            created_at: Utc::now(),
        }
    }

    pub fn empty(request: &WorkRequest) -> Self {
        Self::for_request(request, ResultPayload::Empty)
    }
}

/// The two payload kinds on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    WorkRequest(WorkRequest),
    WorkResult(WorkResult),
}

impl WireMessage {
    pub fn session(&self) -> &str {
        match self {
            WireMessage::WorkRequest(r) => &r.session,
            WireMessage::WorkResult(r) => &r.session,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WireMessage::WorkRequest(r) => &r.id,
            WireMessage::WorkResult(r) => &r.id,
        }
    }
}

/// What the transport actually carries: an addressed, annotated message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub context: MessageContext,
    #[serde(default)]
    pub headers: Headers,
    pub message: WireMessage,
}

impl Envelope {
    pub fn request(request: WorkRequest) -> Self {
        Self {
            context: MessageContext::requests(&request.session),
            headers: Headers::new(),
            message: WireMessage::WorkRequest(request),
        }
    }

    pub fn result(result: WorkResult) -> Self {
        Self {
            context: MessageContext::results(&result.session),
            headers: Headers::new(),
            message: WireMessage::WorkResult(result),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> WorkRequest {
        let template = WorkRequest::template("s1", "sphere", GridParams::default());
        let fragment = Population::filled(vec![
            Candidate::new(-1.5, json!([0.5, 1.0])),
            Candidate::new(-2.0, json!([1.0, 1.0])),
        ]);
        template.fragment(3, 2, fragment)
    }

    #[test]
    fn test_request_roundtrip_keeps_identity_and_population() {
        let req = sample_request();
        let envelope = Envelope::request(req.clone()).with_header("cycle", "2");
        let text = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();

        assert_eq!(back.context, MessageContext::requests("s1"));
        assert_eq!(back.headers.get("cycle").map(String::as_str), Some("2"));
        match back.message {
            WireMessage::WorkRequest(r) => {
                assert_eq!(r.id, req.id);
                assert_eq!(r.session, "s1");
                assert_eq!(r.chunk, 3);
                assert_eq!(r.population, req.population);
            }
            other => panic!("expected work request, got {other:?}"),
        }
    }

    #[test]
    fn test_result_roundtrip_keeps_payload() {
        let req = sample_request();
        let best = req.population.members[0].clone();
        let result = WorkResult::for_request(&req, ResultPayload::SingleBest(best.clone()));
        let text = serde_json::to_string(&WireMessage::WorkResult(result.clone())).unwrap();
        assert!(text.contains(r#""type":"work_result""#));
        assert!(text.contains(r#""kind":"single_best""#));

        let back: WireMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back.id(), req.id);
        assert_eq!(back, WireMessage::WorkResult(result));
    }

    #[test]
    fn test_empty_payload_defaults() {
        let text = json!({
            "session": "s", "id": "x", "chunk": 0, "worker": null,
            "created_at": "2024-01-01T00:00:00Z"
        });
        let result: WorkResult = serde_json::from_value(text).unwrap();
        assert!(result.payload.is_empty());
        assert_eq!(result.payload.candidate_count(), 0);
    }

    #[test]
    fn test_fragment_ids_are_unique() {
        let template = WorkRequest::template("s", "sphere", GridParams::default());
        let a = template.fragment(0, 0, Population::default());
        let b = template.fragment(1, 0, Population::default());
        assert_ne!(a.id, b.id);
        assert_eq!(a.config_id, "sphere");
    }
}
