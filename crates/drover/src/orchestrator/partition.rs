/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Deterministic work partitioning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// One slice of a storage partitioning: slice `index` of `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionRange {
    pub index: u32,
    pub count: u32,
}

/// A unit of child work.
///
/// `category = None` covers every category of the definition and
/// `partition = None` covers all storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<PartitionRange>,
}

impl WorkUnit {
    /// The single unit used when no parallelism is requested.
    pub fn whole() -> Self {
        Self {
            category: None,
            partition: None,
        }
    }

    /// Stable natural key, e.g. `Patient#2/4`, `Patient`, `*#0/2` or `*`.
    ///
    /// Used as the child's idempotency key, so it must never change for a
    /// given unit.
    pub fn key(&self) -> String {
        let category = self.category.as_deref().unwrap_or("*");
        match self.partition {
            Some(range) => format!("{}#{}/{}", category, range.index, range.count),
            None => category.to_string(),
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn default_partitions() -> u32 {
    1
}

/// A coordinator job's definition.
///
/// ```rust,ignore
/// // Two categories over four storage partitions: eight children.
/// let definition = FanOutDefinition::parallel(
///     vec!["Patient".into(), "Observation".into()],
///     4,
///     json!({ "since": "2024-01-01" }),
/// );
/// assert_eq!(definition.work_units().len(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutDefinition {
    /// Resource categories to cover. Duplicates are ignored.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Number of storage partitions each category is split into.
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Without parallelism the whole operation runs as one child.
    #[serde(default)]
    pub parallel: bool,
    /// Opaque input handed to every child.
    #[serde(default)]
    pub payload: Value,
}

impl FanOutDefinition {
    pub fn parallel(categories: Vec<String>, partitions: u32, payload: Value) -> Self {
        Self {
            categories,
            partitions,
            parallel: true,
            payload,
        }
    }

    pub fn single(categories: Vec<String>, payload: Value) -> Self {
        Self {
            categories,
            partitions: 1,
            parallel: false,
            payload,
        }
    }

    /// The full candidate set of child units.
    ///
    /// A pure function of the definition: the cross product of distinct
    /// categories and partition ranges, or the single [`WorkUnit::whole`]
    /// unit when parallelism is off.
    pub fn work_units(&self) -> BTreeSet<WorkUnit> {
        if !self.parallel {
            return BTreeSet::from([WorkUnit::whole()]);
        }

        let categories: Vec<Option<String>> = if self.categories.is_empty() {
            vec![None]
        } else {
            self.categories
                .iter()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|category| Some(category.clone()))
                .collect()
        };

        let count = self.partitions.max(1);
        let partitions: Vec<Option<PartitionRange>> = if count == 1 {
            vec![None]
        } else {
            (0..count)
                .map(|index| Some(PartitionRange { index, count }))
                .collect()
        };

        categories
            .iter()
            .flat_map(|category| {
                partitions.iter().map(move |partition| WorkUnit {
                    category: category.clone(),
                    partition: *partition,
                })
            })
            .collect()
    }
}

/// The definition stored on every processing child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildDefinition {
    pub unit: WorkUnit,
    /// Every category of the operation, for units that cover them all.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub payload: Value,
    /// The coordinator's `created_at`, shared by every child of the group.
    pub group_created_at: DateTime<Utc>,
}

impl ChildDefinition {
    pub fn for_unit(
        definition: &FanOutDefinition,
        unit: WorkUnit,
        group_created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            unit,
            categories: definition.categories.clone(),
            payload: definition.payload.clone(),
            group_created_at,
        }
    }

    /// The categories this child is responsible for.
    pub fn categories_in_scope(&self) -> Vec<String> {
        match &self.unit.category {
            Some(category) => vec![category.clone()],
            None => self.categories.clone(),
        }
    }

    /// File-name stem for artifacts this child writes, e.g.
    /// `export-20250301T101500Z-Patient-2`.
    ///
    /// Children of one group share the timestamp, so re-runs overwrite
    /// rather than scatter their output.
    pub fn artifact_stem(&self, prefix: &str) -> String {
        let mut stem = format!(
            "{}-{}-{}",
            prefix,
            self.group_created_at.format("%Y%m%dT%H%M%SZ"),
            self.unit.category.as_deref().unwrap_or("all")
        );
        if let Some(range) = self.unit.partition {
            stem.push_str(&format!("-{}", range.index));
        }
        stem
    }
}
