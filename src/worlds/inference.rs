//! Back-fills missing world names from photos taken close in time.
//!
//! A photo with an authoritative world is an *anchor*. A photo whose metadata
//! parses but has no world (or only an inferred one) is a *candidate*: it
//! borrows the world of the anchor nearest in time, if that anchor is at most
//! [`MATCH_WINDOW_HOURS`] away. Photos with missing or unparseable metadata
//! are skipped.
//!
//! Timestamps come from the embedded `date`, falling back to the insert time,
//! for anchors and candidates alike.
//!
//! When several anchors are equally close, the one fetched first wins. Fetch
//! order is the store's concern, so callers should not rely on which of the
//! equidistant worlds is picked.

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::{ImageRecord, MetadataUpdate, PhotoStore, Scope};
use crate::error::Result;
use crate::metadata::{MetadataView, PhotoMetadata};
use crate::worlds::locks::{acquire, ScopeLocks};

pub const MATCH_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone)]
struct Anchor {
    order: usize,
    photo_id: i64,
    name: String,
    at: DateTime<Utc>,
}

#[derive(Debug)]
struct Candidate {
    photo_id: i64,
    at: DateTime<Utc>,
    metadata: PhotoMetadata,
    current: Option<String>,
}

/// Anchors sorted by timestamp, then fetch order.
#[derive(Debug)]
struct AnchorIndex {
    anchors: Vec<Anchor>,
}

impl AnchorIndex {
    fn new(mut anchors: Vec<Anchor>) -> Self {
        anchors.sort_by_key(|a| (a.at, a.order));
        Self { anchors }
    }

    /// Closest anchor to `at`, earliest fetched on equal distance.
    fn nearest(&self, at: DateTime<Utc>) -> Option<(&Anchor, Duration)> {
        let split = self.anchors.partition_point(|a| a.at <= at);

        let before = split.checked_sub(1).map(|last| {
            let ts = self.anchors[last].at;
            let first = self.anchors[..split].partition_point(|a| a.at < ts);
            &self.anchors[first]
        });
        let after = self.anchors.get(split);

        let best = [before, after]
            .into_iter()
            .flatten()
            .map(|a| (a, (a.at - at).abs()))
            .min_by_key(|(a, distance)| (*distance, a.order))?;
        Some(best)
    }
}

/// A world name chosen for a candidate photo.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldAssignment {
    pub photo_id: i64,
    pub world_name: String,
    /// Anchor the name was borrowed from.
    pub source_photo_id: i64,
    pub distance: Duration,
    /// False when the photo already carries this inferred name.
    pub changed: bool,
    metadata: PhotoMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct BackfillPlan {
    pub assignments: Vec<WorldAssignment>,
    pub anchored: usize,
    pub candidates: usize,
    pub skipped: usize,
    pub unmatched: usize,
}

impl BackfillPlan {
    /// Metadata rewrites for assignments that change something. Each one
    /// gets a fresh marker id.
    pub fn updates(&self) -> Result<Vec<MetadataUpdate>> {
        self.assignments
            .iter()
            .filter(|a| a.changed)
            .map(|a| {
                let marker = Uuid::new_v4().to_string();
                let image_data = a.metadata.with_inferred_world(&a.world_name, &marker).to_json()?;
                Ok(MetadataUpdate { photo_id: a.photo_id, image_data })
            })
            .collect()
    }

    pub fn assignment(&self, photo_id: i64) -> Option<&WorldAssignment> {
        self.assignments.iter().find(|a| a.photo_id == photo_id)
    }

    pub fn assigned_name(&self, photo_id: i64) -> Option<&str> {
        self.assignment(photo_id).map(|a| a.world_name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub scope: Scope,
    pub anchored: usize,
    pub candidates: usize,
    pub skipped: usize,
    pub updated: usize,
    pub unmatched: usize,
}

impl BackfillReport {
    fn new(scope: Scope, plan: &BackfillPlan, updated: usize) -> Self {
        Self {
            scope,
            anchored: plan.anchored,
            candidates: plan.candidates,
            skipped: plan.skipped,
            updated,
            unmatched: plan.unmatched,
        }
    }
}

/// Works out which candidates get which world. Touches nothing.
pub fn plan_backfill(records: &[ImageRecord]) -> BackfillPlan {
    let window = Duration::hours(MATCH_WINDOW_HOURS);
    let mut plan = BackfillPlan::default();
    let mut anchors = Vec::new();
    let mut candidates = Vec::new();

    for (order, record) in records.iter().enumerate() {
        let metadata = match record.metadata() {
            MetadataView::Structured(meta) => meta,
            MetadataView::Absent | MetadataView::Opaque => {
                plan.skipped += 1;
                continue;
            }
        };
        let at = metadata.date().unwrap_or(record.created_at);

        match metadata.world() {
            Some(world) if !world.auto_assigned => anchors.push(Anchor {
                order,
                photo_id: record.id,
                name: world.name,
                at,
            }),
            world => candidates.push(Candidate {
                photo_id: record.id,
                at,
                current: world.map(|w| w.name),
                metadata,
            }),
        }
    }

    plan.anchored = anchors.len();
    plan.candidates = candidates.len();
    let index = AnchorIndex::new(anchors);

    for candidate in candidates {
        match index.nearest(candidate.at) {
            Some((anchor, distance)) if distance <= window => {
                debug!(
                    "Photo {} takes world '{}' from photo {} ({}s apart)",
                    candidate.photo_id,
                    anchor.name,
                    anchor.photo_id,
                    distance.num_seconds()
                );
                plan.assignments.push(WorldAssignment {
                    photo_id: candidate.photo_id,
                    world_name: anchor.name.clone(),
                    source_photo_id: anchor.photo_id,
                    distance,
                    changed: candidate.current.as_deref() != Some(anchor.name.as_str()),
                    metadata: candidate.metadata,
                });
            }
            _ => plan.unmatched += 1,
        }
    }

    plan
}

/// Fills in missing worlds for one scope and persists them in one batch.
///
/// Holds the scope's lock from fetch to write. Metadata problems only skip
/// the affected photo; store errors are returned and nothing is written.
pub fn backfill_world<S: PhotoStore>(store: &mut S, scope: &Scope, locks: &ScopeLocks) -> Result<BackfillReport> {
    let handle = locks.handle(scope);
    let _guard = acquire(&handle);

    let records = store.fetch_scope(scope)?;
    let plan = plan_backfill(&records);
    let updates = plan.updates()?;
    store.apply_metadata_updates(&updates)?;

    let report = BackfillReport::new(scope.clone(), &plan, updates.len());
    info!(
        "World backfill for {}: {} anchored, {} candidates, {} updated, {} unmatched, {} skipped",
        scope, report.anchored, report.candidates, report.updated, report.unmatched, report.skipped
    );
    Ok(report)
}

/// Backfills every scope. Planning runs in parallel; all writes go to the
/// store as a single batch.
pub fn backfill_all<S: PhotoStore>(store: &mut S, locks: &ScopeLocks) -> Result<Vec<BackfillReport>> {
    let scopes = store.list_scopes()?;
    let handles: Vec<_> = scopes.iter().map(|scope| locks.handle(scope)).collect();
    let _guards: Vec<_> = handles.iter().map(|h| acquire(h)).collect();

    let fetched = scopes
        .into_iter()
        .map(|scope| store.fetch_scope(&scope).map(|records| (scope, records)))
        .collect::<Result<Vec<_>>>()?;

    let planned = fetched
        .par_iter()
        .map(|(scope, records)| {
            let plan = plan_backfill(records);
            plan.updates().map(|updates| (scope.clone(), plan, updates))
        })
        .collect::<Result<Vec<_>>>()?;

    let all_updates: Vec<MetadataUpdate> = planned
        .iter()
        .flat_map(|(_, _, updates)| updates.iter().cloned())
        .collect();
    store.apply_metadata_updates(&all_updates)?;

    let reports: Vec<_> = planned
        .iter()
        .map(|(scope, plan, updates)| BackfillReport::new(scope.clone(), plan, updates.len()))
        .collect();
    info!(
        "World backfill over {} scopes updated {} photos",
        reports.len(),
        all_updates.len()
    );
    Ok(reports)
}
