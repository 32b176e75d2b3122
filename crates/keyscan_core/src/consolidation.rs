//! Grouping consumer: merges records that share a foreign key into a single
//! primary record and removes the emptied duplicates.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backoff::{Sleeper, ThreadSleeper};
use crate::cancel::CancellationToken;
use crate::error::FetchError;
use crate::record::Record;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_PAUSE_MS: u64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub group_field: String,
    pub member_field: String,
    /// Records whose field is present but falsy (`false`, `null`, `0`, `""`,
    /// empty array or object) are ignored. A missing field means enabled.
    pub enabled_field: String,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub dry_run: bool,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            group_field: "accountKey".to_string(),
            member_field: "userKeys".to_string(),
            enabled_field: "enabled".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause_ms: DEFAULT_BATCH_PAUSE_MS,
            dry_run: false,
        }
    }
}

impl ConsolidationConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

/// Records bucketed by group key, in group-key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordGroups {
    pub groups: BTreeMap<String, Vec<Record>>,
    pub skipped_disabled: usize,
    pub ungrouped: usize,
}

impl RecordGroups {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups holding more than one record.
    pub fn duplicated(&self) -> impl Iterator<Item = (&String, &Vec<Record>)> {
        self.groups.iter().filter(|(_, records)| records.len() > 1)
    }
}

pub fn group_records<'a, I>(records: I, config: &ConsolidationConfig) -> RecordGroups
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut grouped = RecordGroups::default();
    for record in records {
        if record.get(&config.enabled_field).is_some_and(|value| !is_truthy(value)) {
            grouped.skipped_disabled += 1;
            continue;
        }
        match record.string_field(&config.group_field) {
            Some(group_key) => grouped
                .groups
                .entry(group_key)
                .or_default()
                .push(record.clone()),
            None => grouped.ungrouped += 1,
        }
    }
    grouped
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

/// Reconciliation of one duplicate into the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStep {
    pub source_key: i64,
    pub members_to_move: Vec<String>,
    pub members_already_present: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationPlan {
    pub group_key: String,
    pub primary_key: i64,
    pub primary_members: Vec<String>,
    pub merges: Vec<MergeStep>,
}

impl ConsolidationPlan {
    /// Keys of the records removed once their members are moved.
    pub fn deletions(&self) -> impl Iterator<Item = i64> + '_ {
        self.merges.iter().map(|merge| merge.source_key)
    }

    pub fn members_to_move(&self) -> usize {
        self.merges.iter().map(|merge| merge.members_to_move.len()).sum()
    }
}

/// Plans the merge of a group. `None` for groups with fewer than two records.
///
/// The primary is the record with the most members; the first one wins ties.
/// A member is moved at most once even when several duplicates carry it.
pub fn plan_group(
    group_key: &str,
    records: &[Record],
    member_field: &str,
) -> Option<ConsolidationPlan> {
    if records.len() < 2 {
        return None;
    }

    let mut primary_index = 0;
    let mut primary_size = records[0].string_list(member_field).len();
    for (index, record) in records.iter().enumerate().skip(1) {
        let size = record.string_list(member_field).len();
        if size > primary_size {
            primary_index = index;
            primary_size = size;
        }
    }

    let primary = &records[primary_index];
    let primary_members = primary.string_list(member_field);
    let mut present: HashSet<String> = primary_members.iter().cloned().collect();

    let merges = records
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != primary_index)
        .map(|(_, record)| {
            let (members_to_move, members_already_present) = record
                .string_list(member_field)
                .into_iter()
                .partition(|member| present.insert(member.clone()));
            MergeStep {
                source_key: record.key,
                members_to_move,
                members_already_present,
            }
        })
        .collect();

    Some(ConsolidationPlan {
        group_key: group_key.to_string(),
        primary_key: primary.key,
        primary_members,
        merges,
    })
}

/// Remote mutations applied by the consolidator. Calls are never retried.
pub trait GroupMutator {
    fn move_member(&self, member: &str, target_key: i64) -> Result<(), FetchError>;
    fn delete_group(&self, key: i64) -> Result<(), FetchError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    pub groups_seen: usize,
    pub groups_consolidated: usize,
    pub batches: usize,
    pub members_moved: usize,
    pub members_skipped: usize,
    pub move_failures: usize,
    pub duplicates_deleted: usize,
    pub deletes_skipped: usize,
    pub delete_failures: usize,
}

impl ConsolidationReport {
    pub fn has_failures(&self) -> bool {
        self.move_failures > 0 || self.delete_failures > 0
    }
}

pub struct Consolidator {
    config: ConsolidationConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl Consolidator {
    pub fn new(config: ConsolidationConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn plan(&self, groups: &RecordGroups) -> Vec<ConsolidationPlan> {
        groups
            .duplicated()
            .filter_map(|(group_key, records)| {
                plan_group(group_key, records, &self.config.member_field)
            })
            .collect()
    }

    /// Applies every plan batch by batch. Batches run sequentially with a
    /// fixed pause between them; calls inside a batch are serial.
    pub fn run(&self, groups: &RecordGroups, mutator: &dyn GroupMutator) -> ConsolidationReport {
        let plans = self.plan(groups);
        let mut report = ConsolidationReport {
            groups_seen: groups.len(),
            ..ConsolidationReport::default()
        };
        if plans.is_empty() {
            log::info!("No duplicated groups found");
            return report;
        }

        let batch_size = self.config.batch_size.max(1);
        let total_batches = plans.len().div_ceil(batch_size);
        let pause = CancellationToken::new();

        for (index, batch) in plans.chunks(batch_size).enumerate() {
            if index > 0 {
                self.sleeper.sleep(self.config.batch_pause(), &pause);
            }
            log::info!(
                "Processing batch {}/{} ({} groups)",
                index + 1,
                total_batches,
                batch.len()
            );
            for plan in batch {
                self.apply(plan, mutator, &mut report);
            }
            report.batches += 1;
        }

        log::info!(
            "Consolidated {} groups: {} members moved, {} duplicates deleted, {} failures",
            report.groups_consolidated,
            report.members_moved,
            report.duplicates_deleted,
            report.move_failures + report.delete_failures
        );
        report
    }

    fn apply(
        &self,
        plan: &ConsolidationPlan,
        mutator: &dyn GroupMutator,
        report: &mut ConsolidationReport,
    ) {
        log::info!(
            "Group {}: keeping {} with {} members, merging {} duplicates",
            plan.group_key,
            plan.primary_key,
            plan.primary_members.len(),
            plan.merges.len()
        );
        report.groups_consolidated += 1;

        for merge in &plan.merges {
            report.members_skipped += merge.members_already_present.len();

            if self.config.dry_run {
                log::info!(
                    "[dry run] would move {:?} from {} to {} and delete {}",
                    merge.members_to_move,
                    merge.source_key,
                    plan.primary_key,
                    merge.source_key
                );
                continue;
            }

            let mut all_moved = true;
            for member in &merge.members_to_move {
                match mutator.move_member(member, plan.primary_key) {
                    Ok(()) => {
                        log::debug!(
                            "Moved {} from {} to {}",
                            member,
                            merge.source_key,
                            plan.primary_key
                        );
                        report.members_moved += 1;
                    }
                    Err(error) => {
                        log::error!(
                            "Failed to move {} from {} to {}: {}",
                            member,
                            merge.source_key,
                            plan.primary_key,
                            error
                        );
                        report.move_failures += 1;
                        all_moved = false;
                    }
                }
            }

            if !all_moved {
                log::warn!(
                    "Keeping {} because some of its members were not moved",
                    merge.source_key
                );
                report.deletes_skipped += 1;
                continue;
            }

            match mutator.delete_group(merge.source_key) {
                Ok(()) => {
                    log::info!("Deleted {}", merge.source_key);
                    report.duplicates_deleted += 1;
                }
                Err(error) => {
                    log::error!("Failed to delete {}: {}", merge.source_key, error);
                    report.delete_failures += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::backoff::RecordingSleeper;

    fn license(key: i64, account: &str, users: &[&str]) -> Record {
        Record::new(key)
            .with_property("accountKey", account)
            .with_property("userKeys", json!(users))
    }

    #[derive(Default)]
    struct FakeMutator {
        failing_members: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeMutator {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("poisoned mutex").clone()
        }
    }

    impl GroupMutator for FakeMutator {
        fn move_member(&self, member: &str, target_key: i64) -> Result<(), FetchError> {
            self.calls
                .lock()
                .expect("poisoned mutex")
                .push(format!("move {member} -> {target_key}"));
            if self.failing_members.iter().any(|failing| failing == member) {
                return Err(FetchError::from_status(500, "boom"));
            }
            Ok(())
        }

        fn delete_group(&self, key: i64) -> Result<(), FetchError> {
            self.calls
                .lock()
                .expect("poisoned mutex")
                .push(format!("delete {key}"));
            Ok(())
        }
    }

    #[test]
    fn grouping_skips_disabled_and_ungrouped_records() {
        let records = vec![
            license(1, "a", &["u1"]),
            license(2, "a", &["u2"]).with_property("enabled", false),
            license(3, "b", &[]).with_property("enabled", true),
            Record::new(4),
        ];

        let groups = group_records(&records, &ConsolidationConfig::default());

        assert_eq!(groups.len(), 2);
        assert_eq!(groups.skipped_disabled, 1);
        assert_eq!(groups.ungrouped, 1);
        assert_eq!(groups.duplicated().count(), 0);
    }

    #[test]
    fn grouping_treats_null_and_falsy_enabled_as_disabled() {
        let records = vec![
            license(1, "a", &["u1"]).with_property("enabled", Value::Null),
            license(2, "a", &["u2"]).with_property("enabled", 0),
            license(3, "a", &["u3"]).with_property("enabled", ""),
            license(4, "a", &["u4"]).with_property("enabled", "yes"),
            license(5, "a", &["u5"]),
        ];

        let groups = group_records(&records, &ConsolidationConfig::default());

        assert_eq!(groups.skipped_disabled, 3);
        let kept: Vec<i64> = groups.groups["a"].iter().map(|record| record.key).collect();
        assert_eq!(kept, vec![4, 5]);
    }

    #[test]
    fn plan_picks_largest_member_set_as_primary() {
        let records = vec![
            license(1, "acct", &["a", "b"]),
            license(2, "acct", &["a", "c", "d", "e", "f"]),
            license(3, "acct", &["g"]),
        ];

        let plan = plan_group("acct", &records, "userKeys").expect("group should be planned");

        assert_eq!(plan.primary_key, 2);
        assert_eq!(plan.deletions().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(plan.merges[0].members_to_move, vec!["b"]);
        assert_eq!(plan.merges[0].members_already_present, vec!["a"]);
        assert_eq!(plan.merges[1].members_to_move, vec!["g"]);
    }

    #[test]
    fn plan_moves_shared_member_only_once_and_keeps_first_on_tie() {
        let records = vec![
            license(7, "acct", &["x"]),
            license(8, "acct", &["y"]),
            license(9, "acct", &["y"]),
        ];

        let plan = plan_group("acct", &records, "userKeys").expect("group should be planned");

        assert_eq!(plan.primary_key, 7);
        assert_eq!(plan.merges[0].members_to_move, vec!["y"]);
        assert!(plan.merges[1].members_to_move.is_empty());
        assert_eq!(plan.merges[1].members_already_present, vec!["y"]);
    }

    #[test]
    fn single_record_group_has_no_plan() {
        assert!(plan_group("acct", &[license(1, "acct", &["a"])], "userKeys").is_none());
    }

    #[test]
    fn failed_move_keeps_duplicate_and_continues() {
        let records = vec![
            license(1, "acct", &["a", "b", "c"]),
            license(2, "acct", &["d", "e"]),
            license(3, "acct", &["f"]),
        ];
        let config = ConsolidationConfig::default();
        let groups = group_records(&records, &config);
        let mutator = FakeMutator {
            failing_members: vec!["d".to_string()],
            ..FakeMutator::default()
        };

        let report = Consolidator::new(config)
            .with_sleeper(Arc::new(RecordingSleeper::new()))
            .run(&groups, &mutator);

        assert_eq!(
            mutator.calls(),
            vec!["move d -> 1", "move e -> 1", "move f -> 1", "delete 3"]
        );
        assert_eq!(report.members_moved, 2);
        assert_eq!(report.move_failures, 1);
        assert_eq!(report.deletes_skipped, 1);
        assert_eq!(report.duplicates_deleted, 1);
        assert!(report.has_failures());
    }

    #[test]
    fn batches_pause_between_but_not_after() {
        let records: Vec<Record> = (0..5)
            .flat_map(|group| {
                let account = format!("acct-{group}");
                vec![
                    license(group * 2, &account, &["a"]),
                    license(group * 2 + 1, &account, &["b"]),
                ]
            })
            .collect();
        let config = ConsolidationConfig {
            batch_size: 2,
            batch_pause_ms: 1_000,
            ..ConsolidationConfig::default()
        };
        let groups = group_records(&records, &config);
        let sleeper = Arc::new(RecordingSleeper::new());

        let report = Consolidator::new(config)
            .with_sleeper(sleeper.clone())
            .run(&groups, &FakeMutator::default());

        assert_eq!(report.batches, 3);
        assert_eq!(report.groups_consolidated, 5);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(1); 2]);
    }

    #[test]
    fn dry_run_does_not_mutate() {
        let records = vec![license(1, "acct", &["a"]), license(2, "acct", &["b"])];
        let config = ConsolidationConfig {
            dry_run: true,
            ..ConsolidationConfig::default()
        };
        let groups = group_records(&records, &config);
        let mutator = FakeMutator::default();

        let report = Consolidator::new(config).run(&groups, &mutator);

        assert!(mutator.calls().is_empty());
        assert_eq!(report.groups_consolidated, 1);
        assert_eq!(report.duplicates_deleted, 0);
    }
}
