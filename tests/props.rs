use proptest::prelude::*;
use std::collections::HashMap;
use wwwatch::{parse_date, parse_extra, parse_line};

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone)]
struct Fields {
    remote_addr: String,
    date: String,
    method: String,
    path: String,
    http_version: String,
    status_code: String,
    bytes_sent: u32,
    referer: String,
    user_agent: String,
    forwarded_for: String,
    extra: Vec<(String, String)>,
}

impl Fields {
    fn render(&self) -> String {
        let mut line = format!(
            r#"{} - - [{}] "{} {} HTTP/{}" {} {} "{}" "{}" "{}""#,
            self.remote_addr,
            self.date,
            self.method,
            self.path,
            self.http_version,
            self.status_code,
            self.bytes_sent,
            self.referer,
            self.user_agent,
            self.forwarded_for,
        );
        for (key, value) in &self.extra {
            if value.contains(' ') {
                line.push_str(&format!(r#" {key}="{value}""#));
            } else {
                line.push_str(&format!(" {key}={value}"));
            }
        }
        line
    }
}

fn arb_date() -> impl Strategy<Value = String> {
    (
        1u32..=28,
        0usize..12,
        1970u32..2100,
        0u32..24,
        0u32..60,
        0u32..60,
        prop_oneof![Just('+'), Just('-')],
        0u32..14,
        prop_oneof![Just(0u32), Just(30), Just(45)],
    )
        .prop_map(|(d, m, y, hh, mm, ss, sign, zh, zm)| {
            format!(
                "{d:02}/{}/{y}:{hh:02}:{mm:02}:{ss:02} {sign}{zh:02}{zm:02}",
                MONTHS[m]
            )
        })
}

fn arb_extra() -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::btree_map("[a-z_]{1,6}", "[a-zA-Z0-9.,:]{1,8}( [a-z]{1,5})?", 0..5)
        .prop_map(|map| map.into_iter().collect())
}

fn arb_fields() -> impl Strategy<Value = Fields> {
    (
        "[0-9a-f.:]{1,39}",
        arb_date(),
        "[A-Z]{3,7}",
        "/[a-zA-Z0-9/._?=&%-]{0,40}",
        prop_oneof![Just("1.0".to_string()), Just("1.1".to_string())],
        100u32..600,
        any::<u32>(),
        "[a-zA-Z0-9:/._-]{1,30}",
        "[a-zA-Z0-9 /.();_-]{1,40}",
        "[0-9., -]{1,20}",
        arb_extra(),
    )
        .prop_map(
            |(
                remote_addr,
                date,
                method,
                path,
                http_version,
                status,
                bytes_sent,
                referer,
                user_agent,
                forwarded_for,
                extra,
            )| Fields {
                remote_addr,
                date,
                method,
                path,
                http_version,
                status_code: status.to_string(),
                bytes_sent,
                referer,
                user_agent,
                forwarded_for,
                extra,
            },
        )
}

// Every captured field of a rendered line comes back unchanged.
proptest! {
    #[test]
    fn prop_parse_recovers_fields(fields in arb_fields()) {
        let record = parse_line(&fields.render()).unwrap();

        prop_assert_eq!(&record.remote_addr, &fields.remote_addr);
        prop_assert_eq!(&record.date, &fields.date);
        prop_assert_eq!(&record.method, &fields.method);
        prop_assert_eq!(&record.path, &fields.path);
        prop_assert_eq!(&record.http_version, &fields.http_version);
        prop_assert_eq!(&record.status_code, &fields.status_code);

        let expected: HashMap<String, String> = fields.extra.iter().cloned().collect();
        prop_assert_eq!(record.extra, expected);
    }
}

// The zone offset moves the epoch value by exactly its length in seconds.
proptest! {
    #[test]
    fn prop_zone_offset_shifts_epoch(
        date in arb_date(),
    ) {
        let (stamp, zone) = date.split_once(' ').unwrap();
        let sign = if zone.starts_with('-') { -1 } else { 1 };
        let hours: i64 = zone[1..3].parse().unwrap();
        let minutes: i64 = zone[3..5].parse().unwrap();

        let local = parse_date(&date).unwrap();
        let as_utc = parse_date(&format!("{stamp} +0000")).unwrap();
        prop_assert_eq!(as_utc - local, sign * (hours * 3600 + minutes * 60));
    }
}

// Unquoted and quoted extras survive a render/parse cycle; `-` never does.
proptest! {
    #[test]
    fn prop_extra_drops_dashes(
        pairs in proptest::collection::btree_map("[a-z]{1,4}", prop_oneof![Just("-".to_string()), "[a-z0-9]{1,4}"], 0..6)
    ) {
        let text: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let parsed = parse_extra(&text.join(" "));

        let expected: HashMap<String, String> = pairs
            .into_iter()
            .filter(|(_, v)| v != "-")
            .collect();
        prop_assert_eq!(parsed, expected);
    }
}
