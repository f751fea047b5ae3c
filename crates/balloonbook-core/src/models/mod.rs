//! Wire types returned by the balloonbook backend.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One recorded balloon donation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalloonRecord {
    pub id: i64,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_nickname: Option<String>,
    pub count: i64,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub recorded_at: Option<NaiveDateTime>,
}

impl BalloonRecord {
    /// Nickname if known, otherwise the user id
    pub fn donor_name(&self) -> &str {
        self.user_nickname
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.user_id)
    }
}

/// A donation to record; the backend assigns the id and an empty memo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBalloonRecord {
    pub user_id: String,
    #[serde(default)]
    pub user_nickname: String,
    pub count: i64,
    #[serde(default)]
    pub tag: String,
    /// Stored without a timestamp when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<NaiveDateTime>,
}

/// Per-donor totals across the filtered records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorSummary {
    pub user_id: String,
    #[serde(default)]
    pub user_nickname: Option<String>,
    pub total_count: i64,
    pub donation_count: i64,
    #[serde(default)]
    pub last_donated: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalloonPage {
    #[serde(default)]
    pub records: Vec<BalloonRecord>,
    #[serde(default)]
    pub summary: Vec<DonorSummary>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

impl BalloonPage {
    pub fn total_pages(&self) -> u32 {
        if self.limit == 0 || self.total <= 0 {
            return 0;
        }
        let total = self.total as u64;
        let limit = self.limit as u64;
        total.div_ceil(limit) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_balloon_page() {
        let json = r#"{"ok": true,
            "records": [{"id": 3, "user_id": "fan01", "user_nickname": "Fan", "count": 100, "tag": "mission", "memo": "", "recorded_at": "2025-01-02T03:04:05"},
                        {"id": 2, "user_id": "fan02", "user_nickname": null, "count": 10, "tag": null, "memo": null, "recorded_at": null}],
            "summary": [{"user_id": "fan01", "user_nickname": "Fan", "total_count": 100, "donation_count": 1, "last_donated": "2025-01-02T03:04:05.123456"}],
            "total": 2, "page": 1, "limit": 100}"#;

        let page: BalloonPage = serde_json::from_str(json).expect("Failed to parse balloon page JSON");
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].donor_name(), "Fan");
        assert_eq!(page.records[1].donor_name(), "fan02");
        assert!(page.records[1].recorded_at.is_none());
        assert_eq!(page.summary[0].total_count, 100);
        assert!(page.summary[0].last_donated.is_some());
        assert_eq!(page.total_pages(), 1);
    }

    #[test]
    fn test_total_pages() {
        let page = BalloonPage { records: vec![], summary: vec![], total: 201, page: 1, limit: 100 };
        assert_eq!(page.total_pages(), 3);

        let empty = BalloonPage { records: vec![], summary: vec![], total: 0, page: 1, limit: 100 };
        assert_eq!(empty.total_pages(), 0);
    }
}
