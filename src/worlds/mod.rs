//! World inference and grouping over one collection scope at a time.

pub mod grouping;
pub mod inference;
pub mod locks;

pub use grouping::{group_by_world, preview_groups, WorldGroup, WorldGroups, NO_WORLD_GROUP};
pub use inference::{backfill_all, backfill_world, plan_backfill, BackfillPlan, BackfillReport, WorldAssignment};
pub use locks::ScopeLocks;
