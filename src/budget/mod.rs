//! Complexity budget tracking.
//!
//! Each part receives a point allocation. Consumption is charged per
//! category and rejected once it would pass the allocation, unless the caller
//! supplies an authorization reference, in which case the excess is recorded
//! as an override. Threshold crossings produce [`BudgetEvent`]s that the
//! orchestrator drains into the audit log.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::BudgetError;
use crate::model::PartId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetCategory {
    #[default]
    Technical,
    Scope,
    Operational,
}

impl fmt::Display for BudgetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetCategory::Technical => write!(f, "technical"),
            BudgetCategory::Scope => write!(f, "scope"),
            BudgetCategory::Operational => write!(f, "operational"),
        }
    }
}

impl FromStr for BudgetCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "technical" => Ok(BudgetCategory::Technical),
            "scope" => Ok(BudgetCategory::Scope),
            "operational" => Ok(BudgetCategory::Operational),
            _ => Err(format!(
                "Invalid budget category: {}. Use technical, scope, or operational",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    Normal,
    Warning,
    Critical,
    Exhausted,
    Overridden,
}

impl fmt::Display for BudgetLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BudgetLevel::Normal => "normal",
            BudgetLevel::Warning => "warning",
            BudgetLevel::Critical => "critical",
            BudgetLevel::Exhausted => "exhausted",
            BudgetLevel::Overridden => "overridden",
        };
        f.write_str(s)
    }
}

/// Consumption beyond the allocation, approved by an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub authorization_id: String,
    pub category: BudgetCategory,
    /// Points above the allocation covered by this record.
    pub points: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityBudget {
    pub total: u32,
    pub consumed: u32,
    #[serde(default)]
    pub breakdown: BTreeMap<BudgetCategory, u32>,
    #[serde(default)]
    pub overrides: Vec<OverrideRecord>,
    #[serde(default)]
    warned: bool,
    #[serde(default)]
    critical: bool,
}

impl ComplexityBudget {
    fn new(total: u32) -> Self {
        Self {
            total,
            consumed: 0,
            breakdown: BTreeMap::new(),
            overrides: Vec::new(),
            warned: false,
            critical: false,
        }
    }

    fn percent(&self) -> f64 {
        if self.total == 0 {
            return if self.consumed == 0 { 0.0 } else { 100.0 };
        }
        self.consumed as f64 / self.total as f64 * 100.0
    }

    fn overridden_points(&self) -> u32 {
        self.overrides.iter().fold(0u32, |sum, o| sum.saturating_add(o.points))
    }
}

/// Snapshot of a part's budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub part: PartId,
    pub total: u32,
    pub consumed: u32,
    pub remaining: u32,
    pub percent: f64,
    pub level: BudgetLevel,
    pub breakdown: BTreeMap<BudgetCategory, u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BudgetEvent {
    Warning { part: PartId, percent: f64 },
    Critical { part: PartId, percent: f64 },
    Exceeded {
        part: PartId,
        requested: u32,
        consumed: u32,
        total: u32,
    },
    Overridden {
        part: PartId,
        points: u32,
        authorization_id: String,
    },
}

fn default_warn_percent() -> u8 {
    80
}

fn default_critical_percent() -> u8 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityBudgetTracker {
    #[serde(default = "default_warn_percent")]
    warn_percent: u8,
    #[serde(default = "default_critical_percent")]
    critical_percent: u8,
    #[serde(default)]
    budgets: BTreeMap<PartId, ComplexityBudget>,
    #[serde(skip)]
    events: Vec<BudgetEvent>,
}

impl Default for ComplexityBudgetTracker {
    fn default() -> Self {
        Self::new(default_warn_percent(), default_critical_percent())
    }
}

impl ComplexityBudgetTracker {
    pub fn new(warn_percent: u8, critical_percent: u8) -> Self {
        Self {
            warn_percent,
            critical_percent,
            budgets: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Set a part's allocation. Consumption already charged is kept.
    pub fn allocate(&mut self, part: PartId, points: u32) {
        let budget = self
            .budgets
            .entry(part)
            .or_insert_with(|| ComplexityBudget::new(points));
        budget.total = points;
        let percent = budget.percent();
        budget.warned = percent >= self.warn_percent as f64;
        budget.critical = percent >= self.critical_percent as f64;
        info!(%part, points, "budget allocated");
    }

    pub fn consume(
        &mut self,
        part: PartId,
        category: BudgetCategory,
        points: u32,
    ) -> Result<BudgetStatus, BudgetError> {
        let budget = self.budgets.get(&part).ok_or(BudgetError::UnknownPart(part))?;
        if budget.consumed.saturating_add(points) > budget.total {
            let err = BudgetError::Exceeded {
                part,
                requested: points,
                consumed: budget.consumed,
                total: budget.total,
            };
            warn!(%part, requested = points, consumed = budget.consumed, total = budget.total, "budget exceeded");
            self.events.push(BudgetEvent::Exceeded {
                part,
                requested: points,
                consumed: budget.consumed,
                total: budget.total,
            });
            return Err(err);
        }
        self.charge(part, category, points)
    }

    /// Consume past the allocation under an authorization. The part of
    /// `points` that lands above the allocation is recorded as an override.
    pub fn consume_with_override(
        &mut self,
        part: PartId,
        category: BudgetCategory,
        points: u32,
        authorization_id: &str,
    ) -> Result<BudgetStatus, BudgetError> {
        if authorization_id.trim().is_empty() {
            return Err(BudgetError::MissingAuthorization);
        }
        let budget = self.budgets.get_mut(&part).ok_or(BudgetError::UnknownPart(part))?;
        let already_over = budget.consumed.saturating_sub(budget.total);
        let excess = budget.consumed.saturating_add(points).saturating_sub(budget.total) - already_over;
        if excess > 0 {
            budget.overrides.push(OverrideRecord {
                authorization_id: authorization_id.to_string(),
                category,
                points: excess,
                at: Utc::now(),
            });
            warn!(%part, excess, authorization_id, "budget override recorded");
            self.events.push(BudgetEvent::Overridden {
                part,
                points: excess,
                authorization_id: authorization_id.to_string(),
            });
        }
        self.charge(part, category, points)
    }

    fn charge(&mut self, part: PartId, category: BudgetCategory, points: u32) -> Result<BudgetStatus, BudgetError> {
        let warn_at = self.warn_percent as f64;
        let critical_at = self.critical_percent as f64;
        let budget = self.budgets.get_mut(&part).ok_or(BudgetError::UnknownPart(part))?;
        budget.consumed = budget.consumed.saturating_add(points);
        let spent = budget.breakdown.entry(category).or_insert(0);
        *spent = spent.saturating_add(points);

        let percent = budget.percent();
        if !budget.warned && percent >= warn_at {
            budget.warned = true;
            warn!(%part, percent, "budget warning threshold crossed");
            self.events.push(BudgetEvent::Warning { part, percent });
        }
        if !budget.critical && percent >= critical_at {
            budget.critical = true;
            warn!(%part, percent, "budget critical threshold crossed");
            self.events.push(BudgetEvent::Critical { part, percent });
        }
        self.status(part).ok_or(BudgetError::UnknownPart(part))
    }

    pub fn status(&self, part: PartId) -> Option<BudgetStatus> {
        let budget = self.budgets.get(&part)?;
        let percent = budget.percent();
        let level = if budget.consumed > budget.total {
            BudgetLevel::Overridden
        } else if budget.consumed == budget.total && budget.total > 0 {
            BudgetLevel::Exhausted
        } else if percent >= self.critical_percent as f64 {
            BudgetLevel::Critical
        } else if percent >= self.warn_percent as f64 {
            BudgetLevel::Warning
        } else {
            BudgetLevel::Normal
        };
        Some(BudgetStatus {
            part,
            total: budget.total,
            consumed: budget.consumed,
            remaining: budget.total.saturating_sub(budget.consumed),
            percent,
            level,
            breakdown: budget.breakdown.clone(),
        })
    }

    /// `consumed <= total`, or every point above the allocation is covered by
    /// an override record.
    pub fn is_conserved(&self, part: PartId) -> bool {
        self.budgets.get(&part).is_none_or(|b| {
            b.consumed <= b.total || b.consumed - b.total <= b.overridden_points()
        })
    }

    pub fn overrides(&self, part: PartId) -> &[OverrideRecord] {
        self.budgets.get(&part).map(|b| b.overrides.as_slice()).unwrap_or(&[])
    }

    pub fn drain_events(&mut self) -> Vec<BudgetEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PART: PartId = PartId(1);

    fn tracker() -> ComplexityBudgetTracker {
        let mut t = ComplexityBudgetTracker::default();
        t.allocate(PART, 25);
        t
    }

    #[test]
    fn test_third_task_rejected_when_it_would_exceed() {
        let mut t = tracker();
        t.consume(PART, BudgetCategory::Technical, 10).unwrap();
        let status = t.consume(PART, BudgetCategory::Scope, 12).unwrap();
        assert_eq!(status.consumed, 22);
        assert_eq!(status.remaining, 3);

        let err = t.consume(PART, BudgetCategory::Technical, 5).unwrap_err();
        assert_eq!(
            err,
            BudgetError::Exceeded {
                part: PART,
                requested: 5,
                consumed: 22,
                total: 25
            }
        );
        assert_eq!(t.status(PART).unwrap().consumed, 22);
        assert!(t.is_conserved(PART));
    }

    #[test]
    fn test_oversized_charges_saturate() {
        let mut t = tracker();
        t.consume(PART, BudgetCategory::Technical, 10).unwrap();
        assert!(matches!(
            t.consume(PART, BudgetCategory::Scope, u32::MAX),
            Err(BudgetError::Exceeded { consumed: 10, .. })
        ));

        let status = t
            .consume_with_override(PART, BudgetCategory::Scope, u32::MAX, "auth-1")
            .unwrap();
        assert_eq!(status.consumed, u32::MAX);
        assert_eq!(status.level, BudgetLevel::Overridden);
        assert!(t.is_conserved(PART));

        t.consume_with_override(PART, BudgetCategory::Scope, 5, "auth-1").unwrap();
        assert_eq!(t.status(PART).unwrap().consumed, u32::MAX);
        assert!(t.is_conserved(PART));
    }

    #[test]
    fn test_threshold_events_fire_once() {
        let mut t = tracker();
        t.consume(PART, BudgetCategory::Technical, 19).unwrap();
        assert!(t.drain_events().is_empty());

        t.consume(PART, BudgetCategory::Technical, 1).unwrap(); // 80%
        let events = t.drain_events();
        assert!(matches!(events.as_slice(), [BudgetEvent::Warning { .. }]));

        t.consume(PART, BudgetCategory::Operational, 3).unwrap(); // 92%
        let events = t.drain_events();
        assert!(matches!(events.as_slice(), [BudgetEvent::Critical { .. }]));

        t.consume(PART, BudgetCategory::Operational, 1).unwrap();
        assert!(t.drain_events().is_empty());
        assert_eq!(t.status(PART).unwrap().level, BudgetLevel::Critical);
    }

    #[test]
    fn test_single_jump_emits_both_thresholds() {
        let mut t = tracker();
        t.consume(PART, BudgetCategory::Technical, 25).unwrap();
        let events = t.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(t.status(PART).unwrap().level, BudgetLevel::Exhausted);
    }

    #[test]
    fn test_override_records_only_the_excess() {
        let mut t = tracker();
        t.consume(PART, BudgetCategory::Technical, 22).unwrap();
        let status = t
            .consume_with_override(PART, BudgetCategory::Scope, 5, "AUTH-42")
            .unwrap();
        assert_eq!(status.consumed, 27);
        assert_eq!(status.level, BudgetLevel::Overridden);

        let overrides = t.overrides(PART);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].points, 2);
        assert_eq!(overrides[0].authorization_id, "AUTH-42");
        assert!(t.is_conserved(PART));

        t.consume_with_override(PART, BudgetCategory::Scope, 3, "AUTH-43").unwrap();
        assert_eq!(t.overrides(PART)[1].points, 3);
        assert!(t.is_conserved(PART));
    }

    #[test]
    fn test_override_requires_authorization() {
        let mut t = tracker();
        assert_eq!(
            t.consume_with_override(PART, BudgetCategory::Scope, 30, " "),
            Err(BudgetError::MissingAuthorization)
        );
        assert_eq!(t.status(PART).unwrap().consumed, 0);
    }

    #[test]
    fn test_unknown_part() {
        let mut t = tracker();
        assert_eq!(
            t.consume(PartId(9), BudgetCategory::Technical, 1),
            Err(BudgetError::UnknownPart(PartId(9)))
        );
        assert!(t.status(PartId(9)).is_none());
    }

    #[test]
    fn test_breakdown_by_category() {
        let mut t = tracker();
        t.consume(PART, BudgetCategory::Technical, 3).unwrap();
        t.consume(PART, BudgetCategory::Scope, 2).unwrap();
        t.consume(PART, BudgetCategory::Technical, 4).unwrap();
        let status = t.status(PART).unwrap();
        assert_eq!(status.breakdown[&BudgetCategory::Technical], 7);
        assert_eq!(status.breakdown[&BudgetCategory::Scope], 2);
        assert!(!status.breakdown.contains_key(&BudgetCategory::Operational));
    }

    #[test]
    fn test_state_survives_serialization() {
        let mut t = tracker();
        t.consume(PART, BudgetCategory::Technical, 21).unwrap();
        t.drain_events();
        let json = serde_json::to_string(&t).unwrap();
        let mut back: ComplexityBudgetTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status(PART).unwrap().consumed, 21);
        // Warning already fired before the save.
        back.consume(PART, BudgetCategory::Technical, 1).unwrap();
        assert!(back.drain_events().is_empty());
    }
}
