use std::collections::HashMap;

use crate::database::ImageRecord;
use crate::worlds::inference::BackfillPlan;

/// Group label for photos without a world name.
pub const NO_WORLD_GROUP: &str = "No world info";

#[derive(Debug, Clone, PartialEq)]
pub struct WorldGroup {
    pub name: String,
    pub records: Vec<ImageRecord>,
}

/// Photos partitioned by world, groups in order of first appearance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldGroups {
    groups: Vec<WorldGroup>,
}

impl WorldGroups {
    pub fn get(&self, name: &str) -> Option<&[ImageRecord]> {
        self.groups
            .iter()
            .find(|g| g.name == name)
            .map(|g| g.records.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.name.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WorldGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.groups.iter().map(|g| g.records.len()).sum()
    }

    fn push(&mut self, slots: &mut HashMap<String, usize>, name: String, record: ImageRecord) {
        let index = *slots.entry(name.clone()).or_insert_with(|| {
            self.groups.push(WorldGroup { name, records: Vec::new() });
            self.groups.len() - 1
        });
        self.groups[index].records.push(record);
    }
}

impl IntoIterator for WorldGroups {
    type Item = WorldGroup;
    type IntoIter = std::vec::IntoIter<WorldGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

/// Groups photos by the world name stored in their metadata.
///
/// Inferred names count the same as authoritative ones. Photos that were
/// never backfilled simply land in [`NO_WORLD_GROUP`].
pub fn group_by_world(records: Vec<ImageRecord>) -> WorldGroups {
    group_with(records, |record| record.world_name())
}

/// Groups as if `plan` had been applied, without writing anything.
///
/// Used to present a scope whose stored metadata has not caught up yet.
/// `plan` must come from [`plan_backfill`](crate::worlds::plan_backfill)
/// over the same records.
pub fn preview_groups(records: Vec<ImageRecord>, plan: &BackfillPlan) -> WorldGroups {
    group_with(records, |record| {
        plan.assigned_name(record.id)
            .map(str::to_string)
            .or_else(|| record.world_name())
    })
}

fn group_with<F>(records: Vec<ImageRecord>, world_of: F) -> WorldGroups
where
    F: Fn(&ImageRecord) -> Option<String>,
{
    let mut groups = WorldGroups::default();
    let mut slots = HashMap::new();
    for record in records {
        let name = world_of(&record).unwrap_or_else(|| NO_WORLD_GROUP.to_string());
        groups.push(&mut slots, name, record);
    }
    groups
}
