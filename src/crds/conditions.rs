/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds/conditions.rs
*
* The condition record shared by every Oz status and the small set of helpers
* used to maintain it. A status carries at most one condition per type;
* writing a condition replaces the previous record of that type and only moves
* `lastTransitionTime` when the status value actually flips.
*
* SPDX-License-Identifier: Apache-2.0
*/

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Condition types written by the template and request reconcilers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionType {
    // Templates
    TemplateDurationsValid,
    TargetRefExists,
    // Requests
    TargetTemplateExists,
    RequestDurationsValid,
    AccessStillValid,
    AccessResourcesCreated,
    AccessResourcesReady,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::TemplateDurationsValid => "TemplateDurationsValid",
            ConditionType::TargetRefExists => "TargetRefExists",
            ConditionType::TargetTemplateExists => "TargetTemplateExists",
            ConditionType::RequestDurationsValid => "RequestDurationsValid",
            ConditionType::AccessStillValid => "AccessStillValid",
            ConditionType::AccessResourcesCreated => "AccessResourcesCreated",
            ConditionType::AccessResourcesReady => "AccessResourcesReady",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions that must all be `True` before a template is ready.
pub const TEMPLATE_CONDITIONS: &[ConditionType] = &[
    ConditionType::TargetRefExists,
    ConditionType::TemplateDurationsValid,
];

/// Conditions that must all be `True` before a request is ready.
pub const REQUEST_CONDITIONS: &[ConditionType] = &[
    ConditionType::TargetTemplateExists,
    ConditionType::RequestDurationsValid,
    ConditionType::AccessStillValid,
    ConditionType::AccessResourcesCreated,
    ConditionType::AccessResourcesReady,
];

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// RFC 3339 timestamp of the last status flip.
    #[serde(default)]
    pub last_transition_time: String,
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        observed_generation: Option<i64>,
    ) -> Self {
        Self {
            type_: type_.as_str().to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation,
            last_transition_time: now_rfc3339(),
        }
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: ConditionType) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_.as_str())
}

pub fn is_condition_true(conditions: &[Condition], type_: ConditionType) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True)
}

/// True when every condition in `required` is present and `True`.
pub fn all_true(conditions: &[Condition], required: &[ConditionType]) -> bool {
    required.iter().all(|t| is_condition_true(conditions, *t))
}

/// Inserts or replaces the condition of the same type.
///
/// The previous `lastTransitionTime` is kept when the status did not change.
/// Returns `true` when the stored record changed in any field other than the
/// timestamp.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status == new.status {
                new.last_transition_time = existing.last_transition_time.clone();
            }
            let changed = *existing != new;
            *existing = new;
            changed
        }
        None => {
            conditions.push(new);
            true
        }
    }
}
