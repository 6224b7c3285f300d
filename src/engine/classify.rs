//! Maps raw HTTP results onto business outcomes and records them.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::http_client::{RequestResult, TransportError};
use super::scenario::Scenario;
use super::workload::RequestParams;
use crate::error::ConfigError;
use crate::stats::{Counter, MetricSink, Rate, Trend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    Queued,
    Duplicate,
    SoldOut,
    Found,
    UnexpectedStatus,
    TransportError,
    ParseError,
}

impl OutcomeCategory {
    pub fn name(&self) -> &'static str {
        match self {
            OutcomeCategory::Queued => "queued",
            OutcomeCategory::Duplicate => "duplicate",
            OutcomeCategory::SoldOut => "sold_out",
            OutcomeCategory::Found => "found",
            OutcomeCategory::UnexpectedStatus => "unexpected_status",
            OutcomeCategory::TransportError => "transport_error",
            OutcomeCategory::ParseError => "parse_error",
        }
    }

    /// Business outcomes (queued, duplicate, sold out, found) are not errors
    /// even when their status code is >= 400.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            OutcomeCategory::UnexpectedStatus
                | OutcomeCategory::TransportError
                | OutcomeCategory::ParseError
        )
    }

    pub fn counter_name(&self) -> String {
        format!("{}_total", self.name())
    }

    pub fn rate_name(&self) -> String {
        format!("{}_responses", self.name())
    }
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ProductResponse {
    id: u64,
}

/// Pure classification against the scenario's fixed table.
pub fn classify(
    scenario: &Scenario,
    result: &Result<RequestResult, TransportError>,
    params: &RequestParams,
) -> OutcomeCategory {
    let response = match result {
        Ok(r) => r,
        Err(_) => return OutcomeCategory::TransportError,
    };

    match scenario {
        Scenario::CouponIssue => match response.status {
            200 => match serde_json::from_slice::<IssueResponse>(&response.body) {
                Ok(body) if body.status == "QUEUED" => OutcomeCategory::Queued,
                _ => OutcomeCategory::ParseError,
            },
            409 => OutcomeCategory::Duplicate,
            410 => OutcomeCategory::SoldOut,
            _ => OutcomeCategory::UnexpectedStatus,
        },
        Scenario::PopularProducts { .. } => match response.status {
            200 => match serde_json::from_slice::<ProductResponse>(&response.body) {
                Ok(body) if body.id == params.target_id => OutcomeCategory::Found,
                _ => OutcomeCategory::ParseError,
            },
            _ => OutcomeCategory::UnexpectedStatus,
        },
    }
}

#[derive(Debug)]
enum ScenarioSeries {
    Coupon {
        success: Arc<Counter>,
        fail: Arc<Counter>,
    },
    Products {
        total_requests: Arc<Counter>,
        cache_hits: Arc<Rate>,
        cache_hit_threshold: Duration,
    },
}

/// Classifies results and writes them to the sink.
///
/// Handles are resolved once at construction. [`Classifier::record`] never
/// awaits, so a cancelled VU either records a whole iteration or none of it.
#[derive(Debug)]
pub struct Classifier {
    scenario: Scenario,
    http_reqs: Arc<Counter>,
    iterations: Arc<Counter>,
    parse_errors: Arc<Counter>,
    transport_errors: Arc<Counter>,
    http_req_failed: Arc<Rate>,
    errors: Arc<Rate>,
    http_req_duration: Arc<Trend>,
    scenario_trend: Arc<Trend>,
    categories: Vec<(OutcomeCategory, Arc<Counter>, Arc<Rate>)>,
    extra: ScenarioSeries,
}

fn counter(sink: &MetricSink, name: &str) -> Result<Arc<Counter>, ConfigError> {
    sink.counter(name)
        .ok_or_else(|| ConfigError::UnknownMetric(name.to_string()))
}

fn rate(sink: &MetricSink, name: &str) -> Result<Arc<Rate>, ConfigError> {
    sink.rate(name)
        .ok_or_else(|| ConfigError::UnknownMetric(name.to_string()))
}

fn trend(sink: &MetricSink, name: &str) -> Result<Arc<Trend>, ConfigError> {
    sink.trend(name)
        .ok_or_else(|| ConfigError::UnknownMetric(name.to_string()))
}

impl Classifier {
    pub fn new(scenario: Scenario, sink: &MetricSink) -> Result<Self, ConfigError> {
        let categories = scenario
            .categories()
            .iter()
            .map(|c| Ok((*c, counter(sink, &c.counter_name())?, rate(sink, &c.rate_name())?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let extra = match &scenario {
            Scenario::CouponIssue => ScenarioSeries::Coupon {
                success: counter(sink, "success_count")?,
                fail: counter(sink, "fail_count")?,
            },
            Scenario::PopularProducts {
                cache_hit_threshold,
            } => ScenarioSeries::Products {
                total_requests: counter(sink, "total_requests")?,
                cache_hits: rate(sink, "cache_hit_rate_estimated")?,
                cache_hit_threshold: *cache_hit_threshold,
            },
        };

        Ok(Self {
            http_reqs: counter(sink, "http_reqs")?,
            iterations: counter(sink, "iterations")?,
            parse_errors: counter(sink, "parse_errors")?,
            transport_errors: counter(sink, "transport_errors")?,
            http_req_failed: rate(sink, "http_req_failed")?,
            errors: rate(sink, "errors")?,
            http_req_duration: trend(sink, "http_req_duration")?,
            scenario_trend: trend(sink, scenario.trend_name())?,
            categories,
            extra,
            scenario,
        })
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn classify(
        &self,
        result: &Result<RequestResult, TransportError>,
        params: &RequestParams,
    ) -> OutcomeCategory {
        classify(&self.scenario, result, params)
    }

    /// Record one completed iteration.
    pub fn record(
        &self,
        category: OutcomeCategory,
        result: &Result<RequestResult, TransportError>,
    ) {
        for (c, total, rate) in &self.categories {
            let hit = *c == category;
            if hit {
                total.add(1);
            }
            rate.add(hit);
        }

        self.http_reqs.add(1);
        self.iterations.add(1);
        self.errors.add(category.is_error());
        match category {
            OutcomeCategory::ParseError => self.parse_errors.add(1),
            OutcomeCategory::TransportError => self.transport_errors.add(1),
            _ => {}
        }

        let latency = match result {
            Ok(response) => {
                self.http_req_failed.add(response.status >= 400);
                self.http_req_duration.add(response.latency);
                self.scenario_trend.add(response.latency);
                Some(response.latency)
            }
            Err(_) => {
                self.http_req_failed.add(true);
                None
            }
        };

        match &self.extra {
            ScenarioSeries::Coupon { success, fail } => {
                if category == OutcomeCategory::Queued {
                    success.add(1);
                } else {
                    fail.add(1);
                }
            }
            ScenarioSeries::Products {
                total_requests,
                cache_hits,
                cache_hit_threshold,
            } => {
                total_requests.add(1);
                // latency-based estimate only; the target does not report cache state
                cache_hits.add(latency.is_some_and(|l| l < *cache_hit_threshold));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn response(status: u16, body: &str) -> Result<RequestResult, TransportError> {
        Ok(RequestResult {
            status,
            latency: Duration::from_millis(10),
            body: Bytes::from(body.to_string()),
        })
    }

    fn params(id: u64) -> RequestParams {
        RequestParams {
            user_id: Some(1),
            target_id: id,
        }
    }

    #[test]
    fn test_coupon_table() {
        let s = Scenario::CouponIssue;
        let p = params(1);
        assert_eq!(
            classify(&s, &response(200, r#"{"status":"QUEUED","userId":1}"#), &p),
            OutcomeCategory::Queued
        );
        assert_eq!(
            classify(&s, &response(200, r#"{"status":"ISSUED"}"#), &p),
            OutcomeCategory::ParseError
        );
        assert_eq!(
            classify(&s, &response(200, "not json"), &p),
            OutcomeCategory::ParseError
        );
        assert_eq!(classify(&s, &response(409, ""), &p), OutcomeCategory::Duplicate);
        assert_eq!(classify(&s, &response(410, ""), &p), OutcomeCategory::SoldOut);
        assert_eq!(
            classify(&s, &response(500, ""), &p),
            OutcomeCategory::UnexpectedStatus
        );
        assert_eq!(
            classify(&s, &response(201, r#"{"status":"QUEUED"}"#), &p),
            OutcomeCategory::UnexpectedStatus
        );
        assert_eq!(
            classify(&s, &Err(TransportError::Timeout(Duration::from_secs(1))), &p),
            OutcomeCategory::TransportError
        );
    }

    #[test]
    fn test_product_table() {
        let s = Scenario::popular_products();
        assert_eq!(
            classify(&s, &response(200, r#"{"id":5,"name":"x"}"#), &params(5)),
            OutcomeCategory::Found
        );
        assert_eq!(
            classify(&s, &response(200, r#"{"id":6}"#), &params(5)),
            OutcomeCategory::ParseError
        );
        assert_eq!(
            classify(&s, &response(200, "<html>"), &params(5)),
            OutcomeCategory::ParseError
        );
        assert_eq!(
            classify(&s, &response(404, ""), &params(5)),
            OutcomeCategory::UnexpectedStatus
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let s = Scenario::CouponIssue;
        let r = response(200, r#"{"status":"QUEUED"}"#);
        let first = classify(&s, &r, &params(1));
        for _ in 0..100 {
            assert_eq!(classify(&s, &r, &params(1)), first);
        }
    }

    #[test]
    fn test_record_updates_series() {
        let scenario = Scenario::CouponIssue;
        let sink = scenario.sink_builder().build();
        let classifier = Classifier::new(scenario, &sink).unwrap();

        let queued = response(200, r#"{"status":"QUEUED"}"#);
        let sold_out = response(410, "");
        let broken = Err(TransportError::Connection("refused".to_string()));
        for r in [&queued, &queued, &sold_out, &broken] {
            let category = classifier.classify(r, &params(1));
            classifier.record(category, r);
        }

        let snap = sink.snapshot();
        assert_eq!(snap.counter("http_reqs"), 4);
        assert_eq!(snap.counter("iterations"), 4);
        assert_eq!(snap.counter("queued_total"), 2);
        assert_eq!(snap.counter("sold_out_total"), 1);
        assert_eq!(snap.counter("transport_error_total"), 1);
        assert_eq!(snap.counter("transport_errors"), 1);
        assert_eq!(snap.counter("success_count"), 2);
        assert_eq!(snap.counter("fail_count"), 2);
        assert_eq!(snap.rate("queued_responses"), 0.5);
        assert_eq!(snap.rate("sold_out_responses"), 0.25);
        assert_eq!(snap.rate("errors"), 0.25);
        // 410 and the transport failure
        assert_eq!(snap.rate("http_req_failed"), 0.5);
        assert_eq!(snap.trends["http_req_duration"].count, 3);
        assert_eq!(snap.trends["api_response_time"].count, 3);
    }

    #[test]
    fn test_record_cache_hit_estimate() {
        let scenario = Scenario::popular_products();
        let sink = scenario.sink_builder().build();
        let classifier = Classifier::new(scenario, &sink).unwrap();

        let fast = response(200, r#"{"id":1}"#);
        let slow = Ok(RequestResult {
            status: 200,
            latency: Duration::from_millis(80),
            body: Bytes::from_static(br#"{"id":1}"#),
        });
        for r in [&fast, &slow] {
            classifier.record(classifier.classify(r, &params(1)), r);
        }

        let snap = sink.snapshot();
        assert_eq!(snap.counter("found_total"), 2);
        assert_eq!(snap.counter("total_requests"), 2);
        assert_eq!(snap.rate("cache_hit_rate_estimated"), 0.5);
        assert_eq!(snap.rate("errors"), 0.0);
    }

    #[test]
    fn test_classifier_requires_declared_series() {
        let sink = MetricSink::builder().counter("http_reqs").build();
        assert!(Classifier::new(Scenario::CouponIssue, &sink).is_err());
    }
}
