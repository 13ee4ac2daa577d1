//! Profit-First target allocations by industry
//!
//! Used to seed a client's first quarterly review when no earlier review
//! exists to copy targets from.

use serde::Serialize;

/// Target allocation percentages of real revenue. Always sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProfitFirstTargets {
    pub profit_pct: f64,
    pub owner_pay_pct: f64,
    pub tax_pct: f64,
    pub opex_pct: f64,
}

const fn t(profit_pct: f64, owner_pay_pct: f64, tax_pct: f64, opex_pct: f64) -> ProfitFirstTargets {
    ProfitFirstTargets {
        profit_pct,
        owner_pay_pct,
        tax_pct,
        opex_pct,
    }
}

static BENCHMARKS: &[(&str, ProfitFirstTargets)] = &[
    ("construction", t(5.0, 20.0, 15.0, 60.0)),
    ("consulting", t(12.0, 40.0, 15.0, 33.0)),
    ("ecommerce", t(5.0, 20.0, 10.0, 65.0)),
    ("healthcare", t(10.0, 30.0, 15.0, 45.0)),
    ("professional_services", t(10.0, 35.0, 15.0, 40.0)),
    ("real_estate", t(10.0, 30.0, 15.0, 45.0)),
    ("restaurant", t(5.0, 10.0, 10.0, 75.0)),
    ("retail", t(5.0, 15.0, 10.0, 70.0)),
    ("technology", t(10.0, 30.0, 15.0, 45.0)),
    ("trades", t(8.0, 25.0, 15.0, 52.0)),
];

/// Normalize an industry label: lowercase, spaces and hyphens become underscores
pub fn normalize_industry(industry: &str) -> String {
    industry
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Look up benchmark targets for an industry label
pub fn targets_for_industry(industry: &str) -> Option<ProfitFirstTargets> {
    let key = normalize_industry(industry);
    BENCHMARKS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, targets)| *targets)
}
