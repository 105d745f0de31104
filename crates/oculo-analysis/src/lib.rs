//! Deterministic statistical analysis for Oculo traces
//!
//! All analysis is mathematical — no LLMs are involved. The [`Analyzer`] is a
//! pure reader over the store:
//!
//! - Token hotspot detection via Z-score analysis
//! - Memory growth trend analysis via ordinary-least-squares regression
//! - Cost attribution across LLM calls

use chrono::{SecondsFormat, Utc};
use oculo_core::{OperationType, Result, Store, TraceStats};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

mod report;

pub use report::format_report;

/// Z-score above which a span is reported as a hotspot.
const HOTSPOT_THRESHOLD: f64 = 1.5;

/// Regression slope (keys/second) above which growth may be unbounded.
const UNBOUNDED_SLOPE: f64 = 0.1;

/// Minimum R² fit for the unbounded-growth classification.
const UNBOUNDED_R_SQUARED: f64 = 0.7;

/// Pricing applied to models missing from the table, per 1k tokens.
/// A placeholder — reports call it out.
const DEFAULT_PRICING: (f64, f64) = (0.01, 0.03);

/// Performs statistical analysis on trace data. Never writes.
pub struct Analyzer {
    store: Arc<dyn Store>,
}

// ---------------------------------------------------------------------------
// Token hotspot detection
// ---------------------------------------------------------------------------

/// Hotspot severity, classified from the Z-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// An LLM span with abnormally high token consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHotspot {
    pub span_id: String,
    pub operation_name: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub z_score: f64,
    pub severity: Severity,
}

// ---------------------------------------------------------------------------
// Memory growth analysis
// ---------------------------------------------------------------------------

/// Result of the memory growth regression over one trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryGrowthReport {
    pub trace_id: String,
    /// Keys live at the end of the trace.
    pub total_keys: usize,
    pub total_events: usize,
    /// Keys per second, rounded to two decimals.
    pub growth_rate: f64,
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Predicted key count 30 minutes past the last event, floored at zero.
    pub prediction_30_min: u64,
    pub is_unbounded: bool,
    pub key_growth: Vec<KeyGrowthEntry>,
}

/// One memory mutation in the growth timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyGrowthEntry {
    pub key: String,
    pub namespace: String,
    pub timestamp: String,
    pub operation: String,
}

// ---------------------------------------------------------------------------
// Cost attribution
// ---------------------------------------------------------------------------

/// Token cost attributed to a single LLM span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub span_id: String,
    pub operation_name: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub estimated_cost_usd: f64,
    /// Share of the trace total, rounded to one decimal.
    pub percentage: f64,
    /// True when the model was priced with the default fallback.
    pub default_pricing: bool,
}

/// Token costs summed across a trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostReport {
    pub trace_id: String,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_estimated_cost_usd: f64,
    pub entries: Vec<CostEntry>,
}

/// Per-1k-token pricing for well-known models: (prompt, completion).
fn model_pricing(model: &str) -> Option<(f64, f64)> {
    let pricing = match model {
        "gpt-4" => (0.03, 0.06),
        "gpt-4-turbo" => (0.01, 0.03),
        "gpt-4o" => (0.005, 0.015),
        "gpt-4o-mini" => (0.00015, 0.0006),
        "gpt-3.5-turbo" => (0.0005, 0.0015),
        "claude-3-opus" => (0.015, 0.075),
        "claude-3-sonnet" => (0.003, 0.015),
        "claude-3-haiku" => (0.00025, 0.00125),
        _ => return None,
    };
    Some(pricing)
}

// ---------------------------------------------------------------------------
// Full report
// ---------------------------------------------------------------------------

/// Complete output of `oculo analyze`: one section per analysis pass plus the
/// warnings derived from them. A failed pass leaves its section `None` and
/// appends a warning instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub trace_id: String,
    pub generated_at: String,
    pub stats: Option<TraceStats>,
    pub token_hotspots: Vec<TokenHotspot>,
    pub memory_growth: Option<MemoryGrowthReport>,
    pub cost_attribution: Option<CostReport>,
    pub warnings: Vec<String>,
}

impl Analyzer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Find LLM spans whose total token count is a statistical outlier.
    ///
    /// Computes the Z-score of `prompt_tokens + completion_tokens` over the
    /// trace's LLM spans and reports every span above 1.5, classified low
    /// (≤ 2.0), medium (≤ 3.0), or high (> 3.0), sorted by Z-score
    /// descending. Fewer than two LLM spans, or zero variance, yields no
    /// hotspots.
    pub async fn detect_token_hotspots(&self, trace_id: &str) -> Result<Vec<TokenHotspot>> {
        let spans = self.store.query_timeline(trace_id).await?;
        let llm_spans: Vec<_> = spans
            .iter()
            .filter(|s| s.operation_type == OperationType::Llm)
            .collect();

        if llm_spans.len() < 2 {
            return Ok(Vec::new());
        }

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut totals = Vec::with_capacity(llm_spans.len());
        for span in &llm_spans {
            let total = f64::from(span.total_tokens());
            totals.push(total);
            sum += total;
            sum_sq += total * total;
        }

        let n = llm_spans.len() as f64;
        let mean = sum / n;
        let variance = (sum_sq / n) - (mean * mean);
        let stddev = variance.sqrt();

        if stddev == 0.0 {
            // Every span consumed the same amount — nothing stands out.
            return Ok(Vec::new());
        }

        let mut hotspots = Vec::new();
        for (span, &total) in llm_spans.iter().zip(&totals) {
            let z_score = (total - mean) / stddev;
            if z_score <= HOTSPOT_THRESHOLD {
                continue;
            }

            let severity = if z_score > 3.0 {
                Severity::High
            } else if z_score > 2.0 {
                Severity::Medium
            } else {
                Severity::Low
            };

            hotspots.push(TokenHotspot {
                span_id: span.span_id.clone(),
                operation_name: span.operation_name.clone(),
                prompt_tokens: span.prompt_tokens,
                completion_tokens: span.completion_tokens,
                total_tokens: span.total_tokens(),
                z_score: round2(z_score),
                severity,
            });
        }

        hotspots.sort_by(|a, b| {
            b.z_score
                .partial_cmp(&a.z_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(hotspots)
    }

    /// Regress the live key count against time to decide whether the agent's
    /// memory is growing without bound.
    ///
    /// Replays every memory event of the trace in timestamp order through a
    /// running key set (`ADD` inserts, `DELETE` removes, `UPDATE` leaves
    /// membership unchanged), samples `(seconds since first event, key
    /// count)` at each step, and fits an ordinary-least-squares line. Growth
    /// is flagged unbounded when the slope exceeds 0.1 keys/s with R² above
    /// 0.7.
    pub async fn analyze_memory_growth(&self, trace_id: &str) -> Result<MemoryGrowthReport> {
        let spans = self.store.query_timeline(trace_id).await?;

        let mut events = Vec::new();
        for span in &spans {
            match self.store.memory_diffs(&span.span_id).await {
                Ok(diffs) => events.extend(diffs),
                Err(e) => {
                    warn!(span_id = %span.span_id, error = %e, "skipping span in memory analysis");
                    continue;
                }
            }
        }

        if events.len() < 2 {
            return Ok(MemoryGrowthReport {
                trace_id: trace_id.to_string(),
                total_events: events.len(),
                ..MemoryGrowthReport::default()
            });
        }

        events.sort_by_key(|e| e.timestamp);

        let base_time = events[0].timestamp;
        let mut key_set: HashSet<String> = HashSet::new();
        let mut points = Vec::with_capacity(events.len());
        let mut key_growth = Vec::with_capacity(events.len());

        for event in &events {
            let qualified = format!("{}.{}", event.namespace, event.key);
            match event.operation {
                oculo_core::MemoryOp::Add => {
                    key_set.insert(qualified);
                }
                oculo_core::MemoryOp::Delete => {
                    key_set.remove(&qualified);
                }
                oculo_core::MemoryOp::Update => {}
            }

            let t = (event.timestamp - base_time) as f64 / 1e9;
            points.push((t, key_set.len() as f64));

            key_growth.push(KeyGrowthEntry {
                key: event.key.clone(),
                namespace: event.namespace.clone(),
                timestamp: report::format_timestamp(event.timestamp),
                operation: event.operation.as_str().to_string(),
            });
        }

        let (slope, intercept, r_squared) = linear_regression(&points);

        let last_time = points[points.len() - 1].0;
        let predicted = slope * (last_time + 1800.0) + intercept;
        let is_unbounded = slope > UNBOUNDED_SLOPE && r_squared > UNBOUNDED_R_SQUARED;

        Ok(MemoryGrowthReport {
            trace_id: trace_id.to_string(),
            total_keys: key_set.len(),
            total_events: events.len(),
            growth_rate: round2(slope),
            slope: round3(slope),
            intercept: round2(intercept),
            r_squared: round3(r_squared),
            prediction_30_min: predicted.max(0.0) as u64,
            is_unbounded,
            key_growth,
        })
    }

    /// Estimate per-span dollar costs for every LLM call in a trace.
    ///
    /// Pricing is looked up by exact model string; unknown models fall back
    /// to the default placeholder and are marked as such.
    pub async fn attribute_costs(&self, trace_id: &str) -> Result<CostReport> {
        let spans = self.store.query_timeline(trace_id).await?;

        let mut report = CostReport {
            trace_id: trace_id.to_string(),
            ..CostReport::default()
        };

        for span in &spans {
            if span.operation_type != OperationType::Llm {
                continue;
            }

            let model = span.model.as_deref().unwrap_or("unknown");
            let (pricing, default_pricing) = match model_pricing(model) {
                Some(p) => (p, false),
                None => (DEFAULT_PRICING, true),
            };

            let prompt_cost = f64::from(span.prompt_tokens) / 1000.0 * pricing.0;
            let completion_cost = f64::from(span.completion_tokens) / 1000.0 * pricing.1;
            let total_cost = prompt_cost + completion_cost;

            report.total_prompt_tokens += u64::from(span.prompt_tokens);
            report.total_completion_tokens += u64::from(span.completion_tokens);
            report.total_estimated_cost_usd += total_cost;

            report.entries.push(CostEntry {
                span_id: span.span_id.clone(),
                operation_name: span.operation_name.clone(),
                model: model.to_string(),
                prompt_tokens: span.prompt_tokens,
                completion_tokens: span.completion_tokens,
                estimated_cost_usd: round4(total_cost),
                percentage: 0.0,
                default_pricing,
            });
        }

        if report.total_estimated_cost_usd > 0.0 {
            for entry in &mut report.entries {
                entry.percentage =
                    round1(entry.estimated_cost_usd / report.total_estimated_cost_usd * 100.0);
            }
        }

        Ok(report)
    }

    /// Run every analysis pass and assemble the combined report.
    ///
    /// A failing pass is downgraded to a warning; the report itself is
    /// infallible once the trace id is known.
    pub async fn full_analysis(&self, trace_id: &str) -> AnalysisReport {
        let mut report = AnalysisReport {
            trace_id: trace_id.to_string(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            stats: None,
            token_hotspots: Vec::new(),
            memory_growth: None,
            cost_attribution: None,
            warnings: Vec::new(),
        };

        match self.store.trace_stats(trace_id).await {
            Ok(stats) => report.stats = Some(stats),
            Err(e) => report.warnings.push(format!("Trace stats failed: {e}")),
        }

        match self.detect_token_hotspots(trace_id).await {
            Ok(hotspots) => report.token_hotspots = hotspots,
            Err(e) => report
                .warnings
                .push(format!("Token hotspot analysis failed: {e}")),
        }

        match self.analyze_memory_growth(trace_id).await {
            Ok(growth) => report.memory_growth = Some(growth),
            Err(e) => report
                .warnings
                .push(format!("Memory growth analysis failed: {e}")),
        }

        match self.attribute_costs(trace_id).await {
            Ok(costs) => report.cost_attribution = Some(costs),
            Err(e) => report.warnings.push(format!("Cost attribution failed: {e}")),
        }

        if let Some(growth) = &report.memory_growth {
            if growth.is_unbounded {
                report.warnings.push(format!(
                    "⚠ UNBOUNDED MEMORY GROWTH detected (slope={:.3} keys/sec, R²={:.3}). \
                     Agent may accumulate excessive state.",
                    growth.slope, growth.r_squared
                ));
            }
        }

        for hotspot in &report.token_hotspots {
            if hotspot.severity == Severity::High {
                report.warnings.push(format!(
                    "⚠ TOKEN HOTSPOT: {} consumed {} tokens (Z-score: {:.2}). \
                     Consider prompt optimization.",
                    hotspot.operation_name, hotspot.total_tokens, hotspot.z_score
                ));
            }
        }

        report
    }
}

// ---------------------------------------------------------------------------
// Regression
// ---------------------------------------------------------------------------

/// Ordinary-least-squares fit of `y = m·x + b` over `(x, y)` points.
/// Returns `(slope, intercept, r_squared)`.
///
/// A degenerate x-range yields slope 0 and intercept ȳ; a degenerate y-range
/// yields R² = 1 (the flat line is a perfect fit).
fn linear_regression(points: &[(f64, f64)]) -> (f64, f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let n = points.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;
    for &(x, y) in points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denom = n * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        return (0.0, sum_y / n, 0.0);
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean_y = sum_y / n;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for &(x, y) in points {
        let predicted = slope * x + intercept;
        ss_res += (y - predicted) * (y - predicted);
        ss_tot += (y - mean_y) * (y - mean_y);
    }

    let r_squared = if ss_tot == 0.0 {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    (slope, intercept, r_squared)
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn round4(x: f64) -> f64 {
    (x * 10000.0).round() / 10000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
