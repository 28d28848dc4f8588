//! Service layer: settings resolution, routing, gates, agents, and the
//! mission engine built on them.

pub mod agent_executor;
pub mod agents;
pub mod concurrency;
pub mod coverage;
pub mod knowledge_facade;
pub mod mission_control;
pub mod mission_engine;
pub mod model_router;
pub mod settings_resolver;

pub use agent_executor::{AgentExecutor, MissionRun};
pub use agents::AgentPool;
pub use concurrency::{ConcurrencyController, MissionGates};
pub use coverage::{CoveragePolicy, SectionNoteCount};
pub use knowledge_facade::KnowledgeFacade;
pub use mission_control::{InstructionOutcome, MissionControl, MissionReport, MissionStatus};
pub use mission_engine::{MissionEngine, MissionEvent};
pub use model_router::{route, RoutedModel};
pub use settings_resolver::{resolve, resolve_concurrency};
