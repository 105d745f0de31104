//! Markdown rendering for analysis reports.

use crate::AnalysisReport;
use chrono::DateTime;
use std::fmt::Write;

/// Render a human-readable markdown report.
pub fn format_report(report: &AnalysisReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Oculo Analysis Report\n");
    let _ = writeln!(out, "**Trace ID:** `{}`", report.trace_id);
    let _ = writeln!(out, "**Generated:** {}\n", report.generated_at);

    if let Some(stats) = &report.stats {
        let _ = writeln!(out, "## Execution Summary\n");
        let _ = writeln!(out, "| Metric | Value |");
        let _ = writeln!(out, "|--------|-------|");
        let _ = writeln!(out, "| Total Spans | {} |", stats.total_spans);
        let _ = writeln!(out, "| LLM Calls | {} |", stats.llm_calls);
        let _ = writeln!(out, "| Tool Calls | {} |", stats.tool_calls);
        let _ = writeln!(out, "| Memory Operations | {} |", stats.memory_ops);
        let _ = writeln!(out, "| Total Prompt Tokens | {} |", stats.total_prompt_tokens);
        let _ = writeln!(
            out,
            "| Total Completion Tokens | {} |",
            stats.total_completion_tokens
        );
        let _ = writeln!(
            out,
            "| Total Duration | {} |\n",
            format_duration_ms(stats.total_duration_ms)
        );
    }

    if !report.token_hotspots.is_empty() {
        let _ = writeln!(out, "## Token Hotspots\n");
        let _ = writeln!(out, "| Operation | Tokens | Z-Score | Severity |");
        let _ = writeln!(out, "|-----------|--------|---------|----------|");
        for hotspot in &report.token_hotspots {
            let _ = writeln!(
                out,
                "| {} | {} | {:.2} | {} |",
                hotspot.operation_name, hotspot.total_tokens, hotspot.z_score, hotspot.severity
            );
        }
        out.push('\n');
    }

    if let Some(growth) = &report.memory_growth {
        let _ = writeln!(out, "## Memory Growth Analysis\n");
        let _ = writeln!(out, "- **Current Keys:** {}", growth.total_keys);
        let _ = writeln!(out, "- **Total Events:** {}", growth.total_events);
        let _ = writeln!(out, "- **Growth Rate:** {:.2} keys/sec", growth.growth_rate);
        let _ = writeln!(out, "- **R² Fit:** {:.3}", growth.r_squared);
        let _ = writeln!(
            out,
            "- **30-min Prediction:** {} keys",
            growth.prediction_30_min
        );
        if growth.is_unbounded {
            let _ = writeln!(out, "- **⚠ WARNING:** Unbounded growth detected!");
        }
        out.push('\n');
    }

    if let Some(costs) = &report.cost_attribution {
        let _ = writeln!(out, "## Cost Attribution\n");
        let _ = writeln!(
            out,
            "**Total Estimated Cost:** ${:.4}\n",
            costs.total_estimated_cost_usd
        );
        if !costs.entries.is_empty() {
            let _ = writeln!(out, "| Operation | Model | Tokens | Cost | % |");
            let _ = writeln!(out, "|-----------|-------|--------|------|---|");
            let mut any_default = false;
            for entry in &costs.entries {
                let marker = if entry.default_pricing {
                    any_default = true;
                    "\\*"
                } else {
                    ""
                };
                let _ = writeln!(
                    out,
                    "| {} | {}{} | {} | ${:.4} | {:.1}% |",
                    entry.operation_name,
                    entry.model,
                    marker,
                    entry.prompt_tokens + entry.completion_tokens,
                    entry.estimated_cost_usd,
                    entry.percentage
                );
            }
            if any_default {
                let _ = writeln!(out, "\n\\* priced with the default estimate (unknown model)");
            }
        }
        out.push('\n');
    }

    if !report.warnings.is_empty() {
        let _ = writeln!(out, "## Warnings\n");
        for warning in &report.warnings {
            let _ = writeln!(out, "- {warning}");
        }
    }

    out
}

/// "HH:MM:SS.mmm" form of a Unix-nanosecond timestamp.
pub(crate) fn format_timestamp(ns: i64) -> String {
    DateTime::from_timestamp_nanos(ns)
        .format("%H:%M:%S%.3f")
        .to_string()
}

/// Humanize a millisecond duration: "450ms", "1.2s", "2m 15.3s".
fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    let seconds = ms as f64 / 1000.0;
    if seconds < 60.0 {
        return format!("{seconds:.1}s");
    }
    let minutes = (seconds / 60.0) as u64;
    let remaining = seconds - (minutes * 60) as f64;
    format!("{minutes}m {remaining:.1}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CostEntry, CostReport, MemoryGrowthReport, Severity, TokenHotspot};
    use oculo_core::TraceStats;

    fn sample_report() -> AnalysisReport {
        AnalysisReport {
            trace_id: "t1".to_string(),
            generated_at: "2025-01-01T00:00:00Z".to_string(),
            stats: Some(TraceStats {
                trace_id: "t1".to_string(),
                total_spans: 3,
                llm_calls: 2,
                tool_calls: 1,
                memory_ops: 0,
                total_prompt_tokens: 2000,
                total_completion_tokens: 2000,
                total_duration_ms: 1234,
                memory_event_count: 0,
            }),
            token_hotspots: vec![TokenHotspot {
                span_id: "hot".to_string(),
                operation_name: "summarize".to_string(),
                prompt_tokens: 4000,
                completion_tokens: 1000,
                total_tokens: 5000,
                z_score: 3.32,
                severity: Severity::High,
            }],
            memory_growth: Some(MemoryGrowthReport {
                trace_id: "t1".to_string(),
                total_keys: 50,
                total_events: 50,
                growth_rate: 1.0,
                slope: 1.0,
                intercept: 1.0,
                r_squared: 1.0,
                prediction_30_min: 1850,
                is_unbounded: true,
                key_growth: vec![],
            }),
            cost_attribution: Some(CostReport {
                trace_id: "t1".to_string(),
                total_prompt_tokens: 2000,
                total_completion_tokens: 2000,
                total_estimated_cost_usd: 0.18,
                entries: vec![CostEntry {
                    span_id: "s1".to_string(),
                    operation_name: "chat".to_string(),
                    model: "mystery-model".to_string(),
                    prompt_tokens: 1000,
                    completion_tokens: 1000,
                    estimated_cost_usd: 0.04,
                    percentage: 100.0,
                    default_pricing: true,
                }],
            }),
            warnings: vec!["⚠ UNBOUNDED MEMORY GROWTH detected".to_string()],
        }
    }

    #[test]
    fn test_report_contains_all_sections() {
        let md = format_report(&sample_report());
        assert!(md.contains("# Oculo Analysis Report"));
        assert!(md.contains("## Execution Summary"));
        assert!(md.contains("## Token Hotspots"));
        assert!(md.contains("## Memory Growth Analysis"));
        assert!(md.contains("## Cost Attribution"));
        assert!(md.contains("## Warnings"));
        assert!(md.contains("| Total Spans | 3 |"));
        assert!(md.contains("$0.1800"));
    }

    #[test]
    fn test_report_marks_default_pricing() {
        let md = format_report(&sample_report());
        assert!(md.contains("mystery-model\\*"));
        assert!(md.contains("default estimate"));
    }

    #[test]
    fn test_report_skips_empty_sections() {
        let report = AnalysisReport {
            trace_id: "t1".to_string(),
            generated_at: "2025-01-01T00:00:00Z".to_string(),
            stats: None,
            token_hotspots: vec![],
            memory_growth: None,
            cost_attribution: None,
            warnings: vec![],
        };
        let md = format_report(&report);
        assert!(!md.contains("## Execution Summary"));
        assert!(!md.contains("## Token Hotspots"));
        assert!(!md.contains("## Warnings"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(450), "450ms");
        assert_eq!(format_duration_ms(1234), "1.2s");
        assert_eq!(format_duration_ms(135_300), "2m 15.3s");
    }

    #[test]
    fn test_format_timestamp() {
        // 1970-01-01T00:00:01.500
        assert_eq!(format_timestamp(1_500_000_000), "00:00:01.500");
    }
}
