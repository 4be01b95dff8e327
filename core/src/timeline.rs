/// Presentation helpers derived from message timestamps
use crate::chat_types::Message;
use chrono::{DateTime, Duration, Utc};

/// Gap between consecutive messages that earns a timestamp divider (5 min)
pub const DIVIDER_GAP_MS: i64 = 300_000;

/// Whether a divider goes above `cur` in an ascending message list
pub fn show_divider(prev: Option<&Message>, cur: &Message) -> bool {
    match prev {
        None => true,
        Some(prev) => (cur.created_at - prev.created_at).num_milliseconds() > DIVIDER_GAP_MS,
    }
}

/// Short relative age for list rows: "Now", "5m", "3h", "2d", else "Mar 4"
pub fn relative_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now - at;
    if age < Duration::minutes(1) {
        "Now".to_string()
    } else if age < Duration::hours(1) {
        format!("{}m", age.num_minutes())
    } else if age < Duration::days(1) {
        format!("{}h", age.num_hours())
    } else if age < Duration::days(7) {
        format!("{}d", age.num_days())
    } else {
        at.format("%b %-d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> Message {
        Message {
            id: format!("{}{}{}", h, m, s),
            conversation_id: "1".into(),
            sender_id: "1".into(),
            text: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 4, h, m, s).unwrap(),
        }
    }

    #[test]
    fn test_first_message_gets_divider() {
        assert!(show_divider(None, &at(10, 0, 0)));
    }

    #[test]
    fn test_divider_requires_strictly_more_than_five_minutes() {
        assert!(!show_divider(Some(&at(10, 0, 0)), &at(10, 5, 0)));
        assert!(show_divider(Some(&at(10, 0, 0)), &at(10, 5, 1)));
    }

    #[test]
    fn test_relative_labels() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        assert_eq!(relative_label(now - Duration::seconds(30), now), "Now");
        assert_eq!(relative_label(now - Duration::minutes(5), now), "5m");
        assert_eq!(relative_label(now - Duration::hours(3), now), "3h");
        assert_eq!(relative_label(now - Duration::days(2), now), "2d");
        assert_eq!(
            relative_label(Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap(), now),
            "Mar 4"
        );
    }
}
