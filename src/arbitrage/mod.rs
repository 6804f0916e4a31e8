//! Arbitrage module for detecting and executing opportunities.
//!
//! This module handles:
//! - Route construction and hop-by-hop simulation
//! - Opportunity scoring and parallel scanning
//! - Route lifecycle tracking
//! - Trade execution with retries and margin rollback

pub mod calculator;
pub mod detector;
pub mod executor;
pub mod lifecycle;
pub mod route;
pub mod simulator;

pub use calculator::{
    estimate_execution_secs, interest_adjusted_factor, route_risk_score, Opportunity,
    PriorityWeights,
};
pub use detector::{OpportunityScanner, ScanReport, ScannerSettings, ScannerStats};
pub use executor::{
    ExecutionCoordinator, ExecutionResult, ExecutionSettings, ExecutionStrategy, ExecutorStats,
    RollbackOutcome,
};
pub use lifecycle::{RouteLifecycle, RouteState};
pub use route::Route;
pub use simulator::{resolve_route, HopQuote, RouteSimulationResult, RouteSimulator};
