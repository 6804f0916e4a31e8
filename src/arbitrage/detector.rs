//! Multi-hop opportunity scanning.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, trace};

use super::calculator::{
    estimate_execution_secs, interest_adjusted_factor, route_risk_score, Opportunity,
    PriorityWeights,
};
use super::route::Route;
use super::simulator::RouteSimulator;
use crate::market::SymbolSet;
use crate::metrics;
use crate::orderbook::MarketSnapshot;
use crate::risk::LiquidityAnalyzer;

/// Upper bound on candidate assets.
pub const MAX_CANDIDATE_ASSETS: usize = 20;

/// Scanner tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerSettings {
    /// Asset every cycle starts and ends in.
    pub base_asset: String,
    /// Minimum interest-adjusted net gain, exclusive.
    pub profit_threshold: Decimal,
    /// Longest route in trades (3 or 4).
    pub max_hops: usize,
    /// Candidate assets kept after ranking by depth.
    pub candidate_limit: usize,
    /// Also scan each cycle in the opposite direction.
    pub scan_reverse: bool,
    /// Minimum book confidence.
    pub min_confidence: Decimal,
    /// Maximum estimated execution time in seconds.
    pub max_execution_secs: Decimal,
    /// Maximum estimated total slippage.
    pub max_slippage: Decimal,
    /// Results kept after ranking.
    pub max_results: usize,
    /// Lifetime of cached evaluations.
    pub cache_ttl: Duration,
    /// Expected holding time, billed for margin interest.
    pub hold_secs: u64,
    /// Hourly margin interest rate.
    pub hourly_interest_rate: Decimal,
    /// Priority weights.
    pub weights: PriorityWeights,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            base_asset: "USDT".to_string(),
            profit_threshold: dec!(0.001),
            max_hops: 3,
            candidate_limit: 15,
            scan_reverse: true,
            min_confidence: dec!(0.6),
            max_execution_secs: dec!(10),
            max_slippage: dec!(0.02),
            max_results: 20,
            cache_ttl: Duration::from_secs(2),
            hold_secs: 0,
            hourly_interest_rate: Decimal::ZERO,
            weights: PriorityWeights::default(),
        }
    }
}

/// Scanner counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScannerStats {
    /// Completed scans.
    pub scans: u64,
    /// Route and amount pairs evaluated, cache hits included.
    pub routes_evaluated: u64,
    /// Opportunities that passed every filter.
    pub opportunities_found: u64,
    /// Evaluations answered from the cache.
    pub cache_hits: u64,
    /// Entries currently cached.
    pub cache_entries: usize,
}

/// Result of a cancellable scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Ranked opportunities.
    pub opportunities: Vec<Opportunity>,
    /// Route and amount pairs evaluated.
    pub evaluated: u64,
    /// Scan stopped early.
    pub cancelled: bool,
}

struct CacheEntry {
    opportunity: Option<Opportunity>,
    inserted: Instant,
}

#[derive(Default)]
struct Counters {
    scans: AtomicU64,
    routes_evaluated: AtomicU64,
    opportunities_found: AtomicU64,
    cache_hits: AtomicU64,
}

/// Enumerates, simulates, filters and ranks cycles over a snapshot.
pub struct OpportunityScanner {
    settings: ScannerSettings,
    simulator: RouteSimulator,
    analyzer: LiquidityAnalyzer,
    cache: DashMap<(Route, Decimal), CacheEntry>,
    counters: Counters,
}

impl OpportunityScanner {
    /// Create a scanner.
    pub fn new(settings: ScannerSettings, simulator: RouteSimulator, analyzer: LiquidityAnalyzer) -> Self {
        Self {
            settings,
            simulator,
            analyzer,
            cache: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Route simulator in use.
    pub fn simulator(&self) -> &RouteSimulator {
        &self.simulator
    }

    /// Rank assets quoted in the base asset by top-5 depth, deepest first.
    pub fn select_candidate_assets(&self, snapshot: &MarketSnapshot, symbols: &SymbolSet) -> Vec<String> {
        let base = self.settings.base_asset.as_str();
        let mut scored: Vec<(String, Decimal)> = symbols
            .quoted_in(base)
            .filter(|s| s.base != base)
            .filter_map(|s| {
                snapshot
                    .book(&s.name)
                    .map(|book| (s.base.clone(), book.top_depth(5)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.dedup_by(|a, b| a.0 == b.0);

        let limit = self.settings.candidate_limit.min(MAX_CANDIDATE_ASSETS);
        scored.into_iter().take(limit).map(|(asset, _)| asset).collect()
    }

    /// `assets` without the base asset or repeats, cut to the candidate limit.
    ///
    /// When more assets are given than the limit allows, the deepest books
    /// against the base asset win.
    fn bounded_assets(&self, assets: &[String], snapshot: &MarketSnapshot, symbols: &SymbolSet) -> Vec<String> {
        let base = self.settings.base_asset.as_str();
        let limit = self.settings.candidate_limit.min(MAX_CANDIDATE_ASSETS);
        let mut seen = HashSet::new();
        let unique: Vec<&str> = assets
            .iter()
            .map(String::as_str)
            .filter(|a| *a != base && seen.insert(*a))
            .collect();
        if unique.len() <= limit {
            return unique.into_iter().map(str::to_string).collect();
        }

        let depth = |asset: &str| {
            symbols
                .resolve(asset, base)
                .and_then(|leg| snapshot.book(&leg.symbol.name))
                .map(|book| book.top_depth(5))
                .unwrap_or(Decimal::ZERO)
        };
        let mut scored: Vec<(&str, Decimal)> = unique.into_iter().map(|a| (a, depth(a))).collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        debug!(requested = assets.len(), limit, "Candidate assets capped");
        scored
            .into_iter()
            .take(limit)
            .map(|(asset, _)| asset.to_string())
            .collect()
    }

    /// All cycles of up to `max_hops` trades through `assets`.
    pub fn candidate_routes(&self, assets: &[String]) -> Vec<Route> {
        let base = self.settings.base_asset.as_str();
        let assets: Vec<&str> = assets
            .iter()
            .map(String::as_str)
            .filter(|a| *a != base)
            .collect();
        let mut routes = Vec::new();

        let mut push = |intermediates: &[&str]| {
            if let Ok(route) = Route::cycle(base, intermediates) {
                if self.settings.scan_reverse {
                    routes.push(route.reversed());
                }
                routes.push(route);
            }
        };

        for (i, a) in assets.iter().enumerate() {
            for (j, b) in assets.iter().enumerate().skip(i + 1) {
                push(&[*a, *b]);
                if self.settings.max_hops >= 4 {
                    for c in assets.iter().skip(j + 1) {
                        push(&[*a, *b, *c]);
                    }
                }
            }
        }

        routes
    }

    /// Scan `assets` at every trial amount.
    pub fn scan(
        &self,
        assets: &[String],
        amounts: &[Decimal],
        snapshot: &MarketSnapshot,
        symbols: &SymbolSet,
    ) -> Vec<Opportunity> {
        let never = AtomicBool::new(false);
        self.scan_with_cancel(assets, amounts, snapshot, symbols, &never)
            .opportunities
    }

    /// Scan, checking `cancel` before every evaluation.
    ///
    /// At most `candidate_limit` (capped at [`MAX_CANDIDATE_ASSETS`]) assets
    /// are scanned. Cached evaluations from earlier scans are dropped first,
    /// so results always reflect `snapshot`.
    #[instrument(skip_all, fields(assets = assets.len(), amounts = amounts.len()))]
    pub fn scan_with_cancel(
        &self,
        assets: &[String],
        amounts: &[Decimal],
        snapshot: &MarketSnapshot,
        symbols: &SymbolSet,
        cancel: &AtomicBool,
    ) -> ScanReport {
        self.cache.clear();

        let assets = self.bounded_assets(assets, snapshot, symbols);
        let routes = self.candidate_routes(&assets);
        let work: Vec<(&Route, Decimal)> = routes
            .iter()
            .flat_map(|r| amounts.iter().map(move |a| (r, *a)))
            .collect();

        let evaluated = AtomicU64::new(0);
        let mut opportunities: Vec<Opportunity> = work
            .par_iter()
            .filter_map(|(route, amount)| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                evaluated.fetch_add(1, Ordering::Relaxed);
                self.evaluate_route(route, *amount, snapshot, symbols)
            })
            .collect();

        let cancelled = cancel.load(Ordering::Relaxed);
        let evaluated = evaluated.into_inner();

        opportunities.sort_by(compare_opportunities);
        opportunities.truncate(self.settings.max_results);

        self.counters.scans.fetch_add(1, Ordering::Relaxed);
        self.counters
            .routes_evaluated
            .fetch_add(evaluated, Ordering::Relaxed);
        self.counters
            .opportunities_found
            .fetch_add(opportunities.len() as u64, Ordering::Relaxed);
        metrics::add_routes_evaluated(evaluated);
        metrics::add_opportunities_detected(opportunities.len() as u64);

        if cancelled {
            info!(evaluated, "Scan cancelled");
        } else {
            debug!(
                routes = routes.len(),
                evaluated,
                found = opportunities.len(),
                "Scan complete"
            );
        }

        ScanReport {
            opportunities,
            evaluated,
            cancelled,
        }
    }

    /// Evaluate one route at one amount, using the cache.
    ///
    /// Entries live until the next scan or `cache_ttl`, whichever comes first.
    pub fn evaluate_route(
        &self,
        route: &Route,
        amount: Decimal,
        snapshot: &MarketSnapshot,
        symbols: &SymbolSet,
    ) -> Option<Opportunity> {
        let key = (route.clone(), amount);
        if let Some(entry) = self.cache.get(&key) {
            if entry.inserted.elapsed() < self.settings.cache_ttl {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return entry.opportunity.clone();
            }
        }

        let opportunity = self.evaluate_uncached(route, amount, snapshot, symbols);
        self.cache.insert(
            key,
            CacheEntry {
                opportunity: opportunity.clone(),
                inserted: Instant::now(),
            },
        );
        opportunity
    }

    fn evaluate_uncached(
        &self,
        route: &Route,
        amount: Decimal,
        snapshot: &MarketSnapshot,
        symbols: &SymbolSet,
    ) -> Option<Opportunity> {
        let s = &self.settings;
        let simulation = self.simulator.simulate(route, amount, snapshot, symbols);
        if !simulation.feasible {
            trace!(route = %route, amount = %amount, failure = ?simulation.failure, "Route infeasible");
            return None;
        }

        let factor =
            interest_adjusted_factor(simulation.factor(), s.hourly_interest_rate, s.hold_secs);
        let net_gain = factor - Decimal::ONE;
        if net_gain <= s.profit_threshold {
            trace!(route = %route, amount = %amount, net_gain = %net_gain, "Below threshold");
            return None;
        }

        let hops = route.hops();
        let confidence = self.analyzer.confidence(route, snapshot, symbols);
        let execution_secs = estimate_execution_secs(hops, amount);
        let slippage = simulation.total_slippage();
        let risk_score = route_risk_score(hops, amount, net_gain);

        if confidence < s.min_confidence
            || execution_secs > s.max_execution_secs
            || slippage > s.max_slippage
        {
            debug!(
                route = %route,
                amount = %amount,
                confidence = %confidence,
                execution_secs = %execution_secs,
                slippage = %slippage,
                "Opportunity filtered"
            );
            return None;
        }

        let priority = s.weights.score(net_gain, confidence, execution_secs, risk_score);
        let expected_profit = amount * net_gain;

        Some(Opportunity {
            route: route.clone(),
            amount,
            final_amount: simulation.final_amount,
            expected_profit,
            profit_pct: net_gain * dec!(100),
            net_gain,
            confidence,
            execution_secs,
            slippage,
            risk_score,
            priority,
            simulation,
            detected_at: OffsetDateTime::now_utc(),
        })
    }

    /// Drop every cached evaluation.
    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("Opportunity cache cleared");
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ScannerStats {
        ScannerStats {
            scans: self.counters.scans.load(Ordering::Relaxed),
            routes_evaluated: self.counters.routes_evaluated.load(Ordering::Relaxed),
            opportunities_found: self.counters.opportunities_found.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_entries: self.cache.len(),
        }
    }
}

/// Priority descending at 9 decimals, then fewer hops, larger amount and route text.
fn compare_opportunities(a: &Opportunity, b: &Opportunity) -> CmpOrdering {
    b.priority
        .round_dp(9)
        .cmp(&a.priority.round_dp(9))
        .then_with(|| a.hops().cmp(&b.hops()))
        .then_with(|| b.amount.cmp(&a.amount))
        .then_with(|| a.route.to_string().cmp(&b.route.to_string()))
}
