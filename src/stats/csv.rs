use super::report::Report;

/// Generate CSV output from a [`Report`]
pub fn generate_csv(report: &Report) -> String {
    let mut out = String::from("metric_name,metric_type,value\n");

    out.push_str(&format!("iterations,counter,{}\n", report.iterations));
    out.push_str(&format!("peak_vus,gauge,{}\n", report.peak_vus));
    out.push_str(&format!(
        "run_duration_ms,gauge,{}\n",
        report.run_duration_ms
    ));

    for (name, count) in &report.outcomes {
        out.push_str(&format!("outcome_{},counter,{}\n", name, count));
    }

    for (name, value) in &report.metrics.counters {
        out.push_str(&format!("{},counter,{}\n", name, value));
    }

    for (name, rate) in &report.metrics.rates {
        out.push_str(&format!("{}_rate,gauge,{:.4}\n", name, rate.rate));
    }

    for (name, t) in &report.metrics.trends {
        out.push_str(&format!("{}_count,counter,{}\n", name, t.count));
        out.push_str(&format!("{}_avg,gauge,{:.3}\n", name, t.avg));
        out.push_str(&format!("{}_min,gauge,{:.3}\n", name, t.min));
        out.push_str(&format!("{}_med,gauge,{:.3}\n", name, t.med));
        out.push_str(&format!("{}_max,gauge,{:.3}\n", name, t.max));
        out.push_str(&format!("{}_p90,gauge,{:.3}\n", name, t.p90));
        out.push_str(&format!("{}_p95,gauge,{:.3}\n", name, t.p95));
        out.push_str(&format!("{}_p99,gauge,{:.3}\n", name, t.p99));
    }

    if let Some(inv) = &report.inventory {
        out.push_str(&format!("inventory_consumed,gauge,{}\n", inv.consumed));
    }

    for t in &report.thresholds {
        let safe_name = format!("{}_{}", t.metric, t.expression).replace([' ', '(', ')'], "");
        let safe_name = safe_name
            .replace("<=", "_le_")
            .replace(">=", "_ge_")
            .replace('<', "_lt_")
            .replace('>', "_gt_")
            .replace("==", "_eq_");
        out.push_str(&format!(
            "threshold_{},check,{}\n",
            safe_name,
            if t.passed { 1 } else { 0 }
        ));
    }

    out
}
