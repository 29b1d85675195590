//! Applies committed log entries to a state machine.
//!
//! The executor owns the state machine and the applied watermark. Each call
//! to [`Executor::apply`] walks the log from `last_applied + 1` up to the
//! commit index:
//!
//! - Initialize and Configuration entries are consumed here and released
//!   immediately.
//! - Command payloads are decoded into the machine's operation type and
//!   handed over as a [`Commit`].
//! - Indices reclaimed by compaction are passed over.
//!
//! A failing handler yields an `Err` in that index's [`Applied`] and the loop
//! moves on. Only a failure to read the log aborts a call.

use crate::commit::{Commit, CommitMeta};
use crate::error::{ApplyError, Result};
use crate::state_machine::StateMachine;
use replog_core::{CommandEntry, ConfigurationEntry, Entry, Indexed};
use replog_durability::{CompactionTracker, Log};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of applying one command.
#[derive(Debug)]
pub struct Applied<T> {
    /// Log index of the command
    pub index: u64,
    /// Handler output or failure
    pub result: std::result::Result<T, ApplyError>,
}

/// Drives a [`StateMachine`] from a [`Log`].
pub struct Executor<S: StateMachine> {
    machine: S,
    last_applied: u64,
    last_timestamp: u64,
    configuration: Option<ConfigurationEntry>,
}

impl<S: StateMachine> Executor<S> {
    /// Create an executor that has applied nothing yet
    pub fn new(machine: S) -> Self {
        Self::resume(machine, 0)
    }

    /// Create an executor whose machine already reflects every entry up to
    /// `last_applied`, e.g. after restoring a snapshot.
    pub fn resume(machine: S, last_applied: u64) -> Self {
        Executor {
            machine,
            last_applied,
            last_timestamp: 0,
            configuration: None,
        }
    }

    /// Highest index applied so far
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Leader timestamp of the last applied entry
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    /// Most recent cluster configuration seen in the log
    pub fn configuration(&self) -> Option<&ConfigurationEntry> {
        self.configuration.as_ref()
    }

    /// The state machine
    pub fn machine(&self) -> &S {
        &self.machine
    }

    /// The state machine, mutably
    pub fn machine_mut(&mut self) -> &mut S {
        &mut self.machine
    }

    /// Consume the executor and return the state machine
    pub fn into_machine(self) -> S {
        self.machine
    }

    /// Apply every committed entry not yet applied.
    ///
    /// Returns one [`Applied`] per command, in index order. On a log read
    /// error the entries before the failure stay applied and
    /// `last_applied` reflects them.
    pub fn apply(&mut self, log: &Log) -> Result<Vec<Applied<S::Output>>> {
        let upto = log.commit_index().min(log.last_index());
        let mut results = Vec::new();
        if upto <= self.last_applied {
            return Ok(results);
        }

        let tracker = log.tracker();
        for read in log.reader(self.last_applied + 1) {
            let indexed = read?;
            if indexed.index > upto {
                break;
            }
            self.last_applied = indexed.index;
            self.last_timestamp = self.last_timestamp.max(indexed.entry.timestamp());
            if let Some(applied) = self.apply_entry(tracker, indexed) {
                results.push(applied);
            }
        }
        // Trailing indices were compacted or skipped
        self.last_applied = upto;

        debug!(
            target: "replog::executor",
            last_applied = self.last_applied,
            commands = results.len(),
            "Applied committed entries"
        );
        Ok(results)
    }

    fn apply_entry(
        &mut self,
        tracker: &Arc<CompactionTracker>,
        indexed: Indexed,
    ) -> Option<Applied<S::Output>> {
        let index = indexed.index;
        let mode = indexed.compaction_mode();
        match indexed.entry {
            Entry::Initialize(_) => {
                tracker.release(index, mode, None);
                None
            }
            Entry::Configuration(configuration) => {
                tracker.release(index, mode, Some(replog_core::CONFIGURATION_KEY));
                self.configuration = Some(configuration);
                None
            }
            Entry::Command(command) => Some(self.apply_command(tracker, index, indexed.term, command)),
        }
    }

    fn apply_command(
        &mut self,
        tracker: &Arc<CompactionTracker>,
        index: u64,
        term: u64,
        command: CommandEntry,
    ) -> Applied<S::Output> {
        let operation: S::Operation = match rmp_serde::from_slice(&command.operation) {
            Ok(operation) => operation,
            Err(e) => {
                tracker.release(index, command.mode, command.key.as_deref());
                warn!(
                    target: "replog::executor",
                    index,
                    error = %e,
                    "Failed to decode command"
                );
                return Applied {
                    index,
                    result: Err(ApplyError::Decode {
                        index,
                        message: e.to_string(),
                    }),
                };
            }
        };

        let meta = CommitMeta {
            index,
            term,
            timestamp: command.timestamp,
            session: command.session,
            sequence: command.sequence,
        };
        let commit = Commit::new(meta, command.mode, command.key, operation, Arc::clone(tracker));
        let result = self.machine.apply(commit);
        if let Err(e) = &result {
            warn!(
                target: "replog::executor",
                index,
                session = command.session,
                sequence = command.sequence,
                error = %e,
                "State machine failed to apply command"
            );
        }
        Applied { index, result }
    }
}

impl<S: StateMachine> std::fmt::Debug for Executor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("last_applied", &self.last_applied)
            .field("last_timestamp", &self.last_timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replog_core::{CompactionMode, InitializeEntry, Member, MemberType};
    use replog_durability::StorageConfig;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize)]
    struct Add(u64);

    #[derive(Default)]
    struct Sum {
        total: u64,
        seen: Vec<u64>,
    }

    impl StateMachine for Sum {
        type Operation = Add;
        type Output = u64;

        fn apply(&mut self, commit: Commit<Add>) -> std::result::Result<u64, ApplyError> {
            if commit.operation().0 == 0 {
                return Err(ApplyError::InvalidOperation("zero".into()));
            }
            self.total += commit.operation().0;
            self.seen.push(commit.index());
            commit.release();
            Ok(self.total)
        }
    }

    fn add(n: u64) -> CommandEntry {
        let bytes = rmp_serde::to_vec(&Add(n)).unwrap();
        CommandEntry::new(1, n, 100 + n, CompactionMode::Release, bytes)
    }

    #[test]
    fn test_applies_up_to_commit_index() {
        let dir = tempdir().unwrap();
        let mut log = Log::open("exec", StorageConfig::for_testing(dir.path())).unwrap();
        for n in 1..=5 {
            log.append(1, add(n)).unwrap();
        }
        log.commit(3);

        let mut executor = Executor::new(Sum::default());
        let applied = executor.apply(&log).unwrap();
        assert_eq!(applied.len(), 3);
        assert_eq!(applied[2].result.as_ref().unwrap(), &6);
        assert_eq!(executor.last_applied(), 3);
        assert_eq!(executor.last_timestamp(), 103);

        // Nothing new committed
        assert!(executor.apply(&log).unwrap().is_empty());

        log.commit(5);
        let applied = executor.apply(&log).unwrap();
        assert_eq!(applied.iter().map(|a| a.index).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(executor.machine().total, 15);
        assert!(log.tracker().is_released(5));
    }

    #[test]
    fn test_internal_entries_released_not_dispatched() {
        let dir = tempdir().unwrap();
        let mut log = Log::open("exec", StorageConfig::for_testing(dir.path())).unwrap();
        log.append(1, InitializeEntry::new(1)).unwrap();
        log.append(
            1,
            ConfigurationEntry::new(2, vec![Member::new(1, MemberType::Active, "a:1")]),
        )
        .unwrap();
        log.append(1, add(7)).unwrap();
        log.commit(3);

        let mut executor = Executor::new(Sum::default());
        let applied = executor.apply(&log).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].index, 3);
        assert!(log.tracker().is_released(1));
        assert!(log.tracker().is_released(2));
        assert_eq!(executor.configuration().unwrap().members.len(), 1);
    }

    #[test]
    fn test_handler_failure_reported_and_released() {
        let dir = tempdir().unwrap();
        let mut log = Log::open("exec", StorageConfig::for_testing(dir.path())).unwrap();
        log.append(1, add(1)).unwrap();
        log.append(1, add(0)).unwrap();
        log.append(1, add(2)).unwrap();
        log.commit(3);

        let mut executor = Executor::new(Sum::default());
        let applied = executor.apply(&log).unwrap();
        assert_eq!(applied.len(), 3);
        assert!(matches!(applied[1].result, Err(ApplyError::InvalidOperation(_))));
        assert_eq!(executor.machine().seen, vec![1, 3]);
        assert!(log.tracker().is_released(2));
    }

    #[test]
    fn test_undecodable_command_released() {
        let dir = tempdir().unwrap();
        let mut log = Log::open("exec", StorageConfig::for_testing(dir.path())).unwrap();
        log.append(
            1,
            CommandEntry::new(1, 1, 1, CompactionMode::Release, vec![0xc1]),
        )
        .unwrap();
        log.commit(1);

        let mut executor = Executor::new(Sum::default());
        let applied = executor.apply(&log).unwrap();
        assert!(matches!(
            applied[0].result,
            Err(ApplyError::Decode { index: 1, .. })
        ));
        assert!(log.tracker().is_released(1));
    }

    #[test]
    fn test_resume_skips_applied_prefix() {
        let dir = tempdir().unwrap();
        let mut log = Log::open("exec", StorageConfig::for_testing(dir.path())).unwrap();
        for n in 1..=4 {
            log.append(1, add(n)).unwrap();
        }
        log.skip(2).unwrap();
        log.commit(6);

        let mut executor = Executor::resume(Sum::default(), 2);
        let applied = executor.apply(&log).unwrap();
        assert_eq!(applied.iter().map(|a| a.index).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(executor.last_applied(), 6);
    }
}
