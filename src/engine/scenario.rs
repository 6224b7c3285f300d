//! Scenario presets: how to build a request and which series a run records.

use std::time::Duration;

use super::classify::OutcomeCategory;
use super::http_client::RequestSpec;
use super::schedule::Stage;
use super::workload::RequestParams;
use crate::stats::{MetricKind, MetricSink, MetricSinkBuilder};

/// The built-in scenarios.
#[derive(Debug, Clone, PartialEq)]
pub enum Scenario {
    /// `POST /coupons/{id}/issue` with a `userId` header.
    CouponIssue,
    /// `GET /products/{id}`, expecting the product echoed back.
    PopularProducts {
        /// Responses faster than this are counted as estimated cache hits.
        cache_hit_threshold: Duration,
    },
}

pub const DEFAULT_CACHE_HIT_THRESHOLD: Duration = Duration::from_millis(50);

const COUPON_CATEGORIES: &[OutcomeCategory] = &[
    OutcomeCategory::Queued,
    OutcomeCategory::Duplicate,
    OutcomeCategory::SoldOut,
    OutcomeCategory::UnexpectedStatus,
    OutcomeCategory::TransportError,
    OutcomeCategory::ParseError,
];

const PRODUCT_CATEGORIES: &[OutcomeCategory] = &[
    OutcomeCategory::Found,
    OutcomeCategory::UnexpectedStatus,
    OutcomeCategory::TransportError,
    OutcomeCategory::ParseError,
];

impl Scenario {
    pub fn popular_products() -> Self {
        Scenario::PopularProducts {
            cache_hit_threshold: DEFAULT_CACHE_HIT_THRESHOLD,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::CouponIssue => "coupon-issue",
            Scenario::PopularProducts { .. } => "popular-products",
        }
    }

    pub fn build_request(&self, base_url: &str, params: &RequestParams) -> RequestSpec {
        let base = base_url.trim_end_matches('/');
        match self {
            Scenario::CouponIssue => {
                let mut spec =
                    RequestSpec::post(format!("{}/coupons/{}/issue", base, params.target_id))
                        .header("Content-Type", "application/json")
                        .header("Accept", "application/json");
                if let Some(user_id) = params.user_id {
                    spec = spec.header("userId", user_id.to_string());
                }
                spec
            }
            Scenario::PopularProducts { .. } => {
                RequestSpec::get(format!("{}/products/{}", base, params.target_id))
                    .header("Content-Type", "application/json")
            }
        }
    }

    /// Every outcome this scenario's classification table can produce.
    pub fn categories(&self) -> &'static [OutcomeCategory] {
        match self {
            Scenario::CouponIssue => COUPON_CATEGORIES,
            Scenario::PopularProducts { .. } => PRODUCT_CATEGORIES,
        }
    }

    /// Scenario-specific latency trend, recorded next to `http_req_duration`.
    pub fn trend_name(&self) -> &'static str {
        match self {
            Scenario::CouponIssue => "api_response_time",
            Scenario::PopularProducts { .. } => "product_query_time",
        }
    }

    /// Name and kind of every series a run of this scenario records.
    pub fn metric_catalog(&self) -> Vec<(String, MetricKind)> {
        let mut catalog: Vec<(String, MetricKind)> = [
            ("http_reqs", MetricKind::Counter),
            ("iterations", MetricKind::Counter),
            ("parse_errors", MetricKind::Counter),
            ("transport_errors", MetricKind::Counter),
            ("http_req_failed", MetricKind::Rate),
            ("errors", MetricKind::Rate),
            ("http_req_duration", MetricKind::Trend),
            (self.trend_name(), MetricKind::Trend),
        ]
        .into_iter()
        .map(|(n, k)| (n.to_string(), k))
        .collect();

        for category in self.categories() {
            catalog.push((category.counter_name(), MetricKind::Counter));
            catalog.push((category.rate_name(), MetricKind::Rate));
        }

        match self {
            Scenario::CouponIssue => {
                catalog.push(("success_count".to_string(), MetricKind::Counter));
                catalog.push(("fail_count".to_string(), MetricKind::Counter));
            }
            Scenario::PopularProducts { .. } => {
                catalog.push(("total_requests".to_string(), MetricKind::Counter));
                catalog.push(("cache_hit_rate_estimated".to_string(), MetricKind::Rate));
            }
        }
        catalog
    }

    pub fn sink_builder(&self) -> MetricSinkBuilder {
        self.metric_catalog()
            .into_iter()
            .fold(MetricSink::builder(), |b, (name, kind)| b.series(name, kind))
    }

    pub fn kind_of(&self, metric: &str) -> Option<MetricKind> {
        self.metric_catalog()
            .into_iter()
            .find(|(name, _)| name == metric)
            .map(|(_, kind)| kind)
    }

    pub fn default_stages(&self) -> Vec<Stage> {
        [(15, 50), (15, 100), (30, 300), (15, 100), (15, 0)]
            .into_iter()
            .map(|(secs, target)| Stage::new(Duration::from_secs(secs), target))
            .collect()
    }

    /// `(metric, expression)` pairs applied when the config names none.
    pub fn default_thresholds(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Scenario::CouponIssue => &[
                ("http_req_duration", "p(50)<100"),
                ("http_req_duration", "p(95)<300"),
                ("http_req_duration", "p(99)<500"),
                ("errors", "rate<0.10"),
                ("http_req_failed", "rate<0.10"),
                ("http_reqs", "rate>50"),
            ],
            Scenario::PopularProducts { .. } => &[
                ("http_req_duration", "p(50)<50"),
                ("http_req_duration", "p(95)<200"),
                ("http_req_duration", "p(99)<500"),
                ("errors", "rate<0.05"),
                ("http_req_failed", "rate<0.05"),
                ("http_reqs", "rate>100"),
            ],
        }
    }

    /// Default `(min, max)` pause between iterations.
    pub fn default_think_time(&self) -> (Duration, Duration) {
        match self {
            Scenario::CouponIssue => (Duration::from_millis(500), Duration::from_secs(2)),
            Scenario::PopularProducts { .. } => (Duration::from_secs(1), Duration::from_secs(3)),
        }
    }

    pub fn default_health_check(&self) -> Option<&'static str> {
        match self {
            Scenario::CouponIssue => None,
            Scenario::PopularProducts { .. } => Some("/actuator/health"),
        }
    }

    /// Inventory endpoint for the given target id, if the scenario consumes stock.
    pub fn default_inventory_path(&self, target_id: u64) -> Option<String> {
        match self {
            Scenario::CouponIssue => Some(format!("/api/coupons/{}", target_id)),
            Scenario::PopularProducts { .. } => None,
        }
    }
}
