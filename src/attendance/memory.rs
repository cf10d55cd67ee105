//! In-memory `AttendanceStore` for tests and dry runs

use super::store::AttendanceStore;
use super::types::*;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, AttendanceRecord>,
    members: HashMap<String, Member>,
}

/// Store holding everything in process memory
#[derive(Default)]
pub struct MemoryAttendanceStore {
    state: RwLock<MemoryState>,
}

impl MemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a member row
    pub async fn put_member(&self, member: Member) {
        self.state
            .write()
            .await
            .members
            .insert(member.id.clone(), member);
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }
}

#[async_trait]
impl AttendanceStore for MemoryAttendanceStore {
    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<InsertOutcome> {
        let mut state = self.state.write().await;
        if state.records.contains_key(&record.id) {
            return Ok(InsertOutcome::Duplicate);
        }
        state.records.insert(record.id.clone(), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn update_member_last_access(&self, member_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let member = match state.members.get_mut(member_id) {
            Some(m) => m,
            None => return Ok(false),
        };
        let mut changed = false;
        if member.first_access.is_none() {
            member.first_access = Some(at);
            changed = true;
        }
        if member.last_access.map(|last| last < at).unwrap_or(true) {
            member.last_access = Some(at);
            changed = true;
        }
        Ok(changed)
    }

    async fn list_active_members_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut ids: Vec<String> = state
            .members
            .values()
            .filter(|m| is_stale(m, threshold))
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn set_members_inactive(&self, member_ids: &[String], threshold: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut changed = 0;
        for id in member_ids {
            if let Some(member) = state.members.get_mut(id) {
                if is_stale(member, threshold) {
                    member.status = MemberStatus::Inactive;
                    member.needs_sync = true;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn set_member_status(&self, member_id: &str, status: MemberStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.members.get_mut(member_id) {
            Some(member) => {
                member.status = status;
                member.needs_sync = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_member(&self, member_id: &str) -> Result<Option<Member>> {
        Ok(self.state.read().await.members.get(member_id).cloned())
    }

    async fn list_attendance(&self, query: &AttendanceQuery) -> Result<Vec<AttendanceRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<AttendanceRecord> = state
            .records
            .values()
            .filter(|r| match &query.subject_id {
                Some(subject) => r.subject_id.as_deref() == Some(subject.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        records.truncate(query.limit as usize);
        Ok(records)
    }

    async fn purge_attendance_before(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let len = state.records.len();
        state.records.retain(|_, r| r.timestamp >= before);
        Ok((len - state.records.len()) as u64)
    }
}

fn is_stale(member: &Member, threshold: DateTime<Utc>) -> bool {
    member.status == MemberStatus::Active
        && member.last_access.map(|last| last < threshold).unwrap_or(false)
}
