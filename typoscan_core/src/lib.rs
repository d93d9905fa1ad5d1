pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod input;
pub mod mutator;
pub mod oracle;
pub mod sink;

pub use aggregator::{MatchResult, ResultAggregator, SearchOutcome, StopSignal};
pub use config::TyposcanConfig;
pub use coordinator::{SearchCoordinator, SearchProgress, SearchReport, SearchStats};
pub use error::{ConfigError, OracleError, SinkError};
pub use executor::{CommandOracle, CommandOracleConfig, InputDelivery};
pub use input::TargetSet;
pub use mutator::{CharMap, MutationEngine, MutationRule, Variants};
pub use oracle::{DerivationOracle, DerivedIdentifier};
pub use sink::{AttemptRecord, AttemptRecorder, AttemptSink, SinkSummary};
