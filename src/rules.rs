//! The single rule table shared by live assessment, the fallback dataset and
//! tests. Thresholds follow the school's dropout-risk policy; changing a value
//! here changes every code path that classifies a student.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::RiskLevel;

/// A metric that is risky when it falls strictly below a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BelowRule {
    pub high: f64,
    pub medium: f64,
}

impl BelowRule {
    pub fn level(&self, value: f64) -> RiskLevel {
        if value < self.high {
            RiskLevel::High
        } else if value < self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Overdue billing periods at or above which a student is at risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverdueRule {
    pub high: u32,
    pub medium: u32,
}

impl OverdueRule {
    pub fn level(&self, periods: u32) -> RiskLevel {
        if periods >= self.high {
            RiskLevel::High
        } else if periods >= self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub attendance: f64,
    pub performance: f64,
    pub fees: f64,
}

impl RiskWeights {
    fn total(&self) -> f64 {
        self.attendance + self.performance + self.fees
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTable {
    pub attendance: BelowRule,
    pub performance: BelowRule,
    pub fees: OverdueRule,
    pub weights: RiskWeights,
    pub fee_points_per_period: f64,
}

impl RuleTable {
    pub const STANDARD: RuleTable = RuleTable {
        attendance: BelowRule {
            high: 60.0,
            medium: 75.0,
        },
        performance: BelowRule {
            high: 40.0,
            medium: 60.0,
        },
        fees: OverdueRule { high: 2, medium: 1 },
        weights: RiskWeights {
            attendance: 0.40,
            performance: 0.35,
            fees: 0.25,
        },
        fee_points_per_period: 30.0,
    };

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (metric, rule) in [
            ("attendance", self.attendance),
            ("performance", self.performance),
        ] {
            if rule.high > rule.medium {
                return Err(ConfigError::InvertedThresholds {
                    metric,
                    high: rule.high,
                    medium: rule.medium,
                });
            }
        }

        if self.fees.high < self.fees.medium {
            return Err(ConfigError::InvertedThresholds {
                metric: "fees",
                high: f64::from(self.fees.high),
                medium: f64::from(self.fees.medium),
            });
        }

        let weights = [
            self.weights.attendance,
            self.weights.performance,
            self.weights.fees,
        ];
        if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.0)
            || self.weights.total() <= 0.0
            || !self.fee_points_per_period.is_finite()
            || self.fee_points_per_period < 0.0
        {
            return Err(ConfigError::InvalidWeights);
        }

        Ok(())
    }

    /// Weighted severity in 0..=100 before level banding.
    pub fn severity(&self, attendance_pct: f64, score_pct: f64, overdue_periods: u32) -> f64 {
        let attendance_risk = (100.0 - attendance_pct).max(0.0);
        let performance_risk = (100.0 - score_pct).max(0.0);
        let fee_risk = (f64::from(overdue_periods) * self.fee_points_per_period).min(100.0);

        let weighted = attendance_risk * self.weights.attendance
            + performance_risk * self.weights.performance
            + fee_risk * self.weights.fees;

        (weighted / self.weights.total()).clamp(0.0, 100.0)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::STANDARD
    }
}
