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

//! `drover admin reap`: retention for finished groups.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use drover::JobEngine;
use tracing::info;

/// Parses durations such as `30d`, `12h` or `1d6h30m`.
///
/// Units are `d`, `h`, `m` and `s`, case-insensitive. Every number needs a
/// unit and the total must be positive.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err(anyhow!("Duration cannot be empty"));
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return Err(anyhow!("Expected a number before '{}'", c));
        }
        let amount: i64 = digits
            .parse()
            .with_context(|| format!("Number out of range: {}", digits))?;
        digits.clear();

        let step = match c {
            'd' => Duration::try_days(amount),
            'h' => Duration::try_hours(amount),
            'm' => Duration::try_minutes(amount),
            's' => Duration::try_seconds(amount),
            other => return Err(anyhow!("Unknown duration unit '{}'; use d, h, m or s", other)),
        };
        total = step
            .and_then(|step| total.checked_add(&step))
            .ok_or_else(|| anyhow!("Duration '{}' is too large", s))?;
    }

    if !digits.is_empty() {
        return Err(anyhow!("Duration '{}' ends without a unit (d, h, m or s)", s));
    }
    if total <= Duration::zero() {
        return Err(anyhow!("Duration must be greater than zero"));
    }
    Ok(total)
}

/// The instant `age` before now; groups finished earlier are reaped.
pub fn cutoff_for(age: Duration) -> Result<DateTime<Utc>> {
    Utc::now()
        .checked_sub_signed(age)
        .ok_or_else(|| anyhow!("Duration reaches before the earliest representable time"))
}

pub async fn run(engine: &JobEngine, older_than: &str, dry_run: bool) -> Result<()> {
    let age = parse_duration(older_than)
        .with_context(|| format!("Invalid duration: '{}'", older_than))?;
    let cutoff = cutoff_for(age)?;

    let report = engine
        .dal()
        .job()
        .reap_finished_groups(cutoff, dry_run)
        .await
        .context("Failed to reap finished groups")?;

    if report.groups.is_empty() {
        info!(%cutoff, "No finished groups older than the cutoff");
    } else if dry_run {
        info!(
            groups = report.groups.len(),
            jobs = report.jobs_deleted,
            %cutoff,
            "[DRY RUN] Would delete finished groups"
        );
    } else {
        info!(
            groups = report.groups.len(),
            jobs = report.jobs_deleted,
            %cutoff,
            "Deleted finished groups"
        );
    }
    Ok(())
}
