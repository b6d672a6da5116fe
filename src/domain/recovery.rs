use crate::foundation::MemberId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Announcement broadcast by every member of a terminated keep: where that
/// member wants its share of the custodied bitcoin sent, and the highest
/// fee rate it is willing to pay.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecoveryAnnouncement {
    pub sender_member_id: MemberId,
    pub btc_recovery_address: String,
    pub max_fee_per_vbyte: i32,
}

impl RecoveryAnnouncement {
    pub fn to_wire(&self) -> crate::foundation::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_wire(bytes: &[u8]) -> crate::foundation::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Announcements collected during one liquidation recovery, keyed by the
/// sender's member id. One entry per member; later duplicates win, which is
/// harmless because members re-send identical payloads.
#[derive(Debug, Default)]
pub struct AnnouncementSet {
    expected: Vec<MemberId>,
    received: BTreeMap<MemberId, RecoveryAnnouncement>,
}

impl AnnouncementSet {
    pub fn new(expected: Vec<MemberId>) -> Self {
        Self { expected, received: BTreeMap::new() }
    }

    /// Records an announcement; senders outside the group are dropped.
    pub fn insert(&mut self, announcement: RecoveryAnnouncement) -> bool {
        if !self.expected.contains(&announcement.sender_member_id) {
            return false;
        }
        self.received.insert(announcement.sender_member_id.clone(), announcement);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.expected.iter().all(|member| self.received.contains_key(member))
    }

    pub fn missing_members(&self) -> Vec<&MemberId> {
        self.expected.iter().filter(|member| !self.received.contains_key(*member)).collect()
    }

    /// The sweep fee rate: the minimum of every member's stated maximum, so
    /// no member's cap is ever exceeded.
    pub fn min_fee_per_vbyte(&self) -> i32 {
        self.received.values().map(|a| a.max_fee_per_vbyte).fold(i32::MAX, i32::min)
    }

    /// Beneficiary addresses exactly as announced, one per member.
    pub fn raw_addresses(&self) -> Vec<(MemberId, String)> {
        self.received.iter().map(|(member, a)| (member.clone(), a.btc_recovery_address.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }
}
