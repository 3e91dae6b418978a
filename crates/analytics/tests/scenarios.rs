//! End-to-end checks against the reference booking dataset: three users, views and
//! demo bookings spread over 16:00Z–18:00Z on 2024-09-08.

use chrono::{DateTime, Duration, TimeZone, Utc};
use insight_analytics::InsightService;
use insight_core::{AppConfig, AttributePredicate, AttributeValue, UserAttributes, WindowBoundary};
use std::sync::Arc;

const VIEW: &str = "view";
const BOOK: &str = "book";

fn at(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 8, h, 0, 0).unwrap()
}

fn city(name: &str) -> UserAttributes {
    [("city".to_string(), AttributeValue::from(name))]
        .into_iter()
        .collect()
}

fn record(service: &InsightService, user: &str, event: &str, hour: u32, times: usize) {
    for i in 0..times {
        // Spread within the hour; every occurrence lands in the same bucket.
        let ts = at(hour) + Duration::minutes((i % 60) as i64);
        service.ingest(user, event, ts).unwrap();
    }
}

fn seeded(boundary: WindowBoundary) -> InsightService {
    let mut config = AppConfig::default();
    config.query.boundary = boundary;
    let service = InsightService::new(&config);

    record(&service, "user123", VIEW, 18, 10);
    record(&service, "user456", VIEW, 18, 5);
    record(&service, "user456", VIEW, 17, 5);
    record(&service, "user789", VIEW, 16, 20);
    record(&service, "user123", BOOK, 18, 1);
    record(&service, "user789", BOOK, 16, 1);

    service.set_user("user123", city("Chicago")).unwrap();
    service.set_user("user456", city("SF")).unwrap();
    service.set_user("user789", city("SF")).unwrap();
    service
}

#[test]
fn last_24_hours_of_views() {
    let service = seeded(WindowBoundary::ClampToHistory);
    let now = at(18) + Duration::minutes(30);
    assert_eq!(service.last_24_hour_sum_at(VIEW, now), 40);
    assert_eq!(service.window_sum(VIEW, at(19), 24, None).unwrap(), 40);
    assert_eq!(service.last_24_hour_sum_at("unknown", now), 0);
}

#[test]
fn conversion_rates_per_city() {
    let service = seeded(WindowBoundary::ClampToHistory);
    let rates = service.conversion_rates(BOOK, at(19), Some(24)).unwrap();
    assert_eq!(rates["city"][&AttributeValue::from("SF")], 0.5);
    assert_eq!(rates["city"][&AttributeValue::from("Chicago")], 1.0);
    assert_eq!(rates.len(), 1);
}

#[test]
fn chicago_is_most_likely_to_convert() {
    let service = seeded(WindowBoundary::ClampToHistory);
    let best = service
        .most_likely_converter(BOOK, at(19), Some(24))
        .unwrap()
        .unwrap();
    assert_eq!(best.attribute, "city");
    assert_eq!(best.value, AttributeValue::from("Chicago"));
    assert_eq!(best.rate, 1.0);

    let json = serde_json::to_value(&best).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"attribute": "city", "value": "Chicago", "rate": 1.0})
    );
}

#[test]
fn filtered_rolling_average_with_nominal_window() {
    let service = seeded(WindowBoundary::Nominal);
    let sf: AttributePredicate = city("SF");
    let series = service
        .rolling_average(VIEW, at(18), 1, Some(6), Some(&sf))
        .unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].timestamp, at(18));
    // (12:00, 18:00] holds user456's 10 views and user789's 20, both in SF.
    assert_eq!(series[0].average, 30.0 / 6.0);
}

#[test]
fn filtered_rolling_average_clamped_to_history() {
    let service = seeded(WindowBoundary::ClampToHistory);
    let sf: AttributePredicate = city("SF");
    let series = service
        .rolling_average(VIEW, at(18), 3, Some(6), Some(&sf))
        .unwrap();
    // Views start at 16:00, so 18:00 averages over 3 hours, 17:00 over 2, 16:00 over 1.
    assert_eq!(series[0].average, 30.0 / 3.0);
    assert_eq!(series[1].average, 25.0 / 2.0);
    assert_eq!(series[2].average, 20.0);
}

#[test]
fn chicago_filter_sees_only_user123() {
    let service = seeded(WindowBoundary::Nominal);
    let chicago = city("Chicago");
    assert_eq!(
        service.window_sum(VIEW, at(18), 6, Some(&chicago)).unwrap(),
        10
    );
}

#[test]
fn rolling_series_length_matches_request() {
    let service = seeded(WindowBoundary::ClampToHistory);
    for n in [0, 1, 5, 48] {
        let series = service
            .rolling_average("never-recorded", at(18), n, None, None)
            .unwrap();
        assert_eq!(series.len(), n);
        assert!(series.iter().all(|p| p.average == 0.0));
    }
}

#[test]
fn replacing_attributes_moves_user_between_segments() {
    let service = seeded(WindowBoundary::ClampToHistory);
    service.set_user("user789", city("Chicago")).unwrap();

    let rates = service.conversion_rates(BOOK, at(19), Some(24)).unwrap();
    // Chicago: user123 (1) + user789 (1) over 2 users; SF: user456 (0) over 1 user.
    assert_eq!(rates["city"][&AttributeValue::from("Chicago")], 1.0);
    assert_eq!(rates["city"][&AttributeValue::from("SF")], 0.0);
}

#[test]
fn concurrent_ingest_and_queries() {
    let service = Arc::new(InsightService::new(&AppConfig::default()));
    let writers = 6;
    let per_writer = 500;

    std::thread::scope(|scope| {
        for w in 0..writers {
            let service = service.clone();
            scope.spawn(move || {
                let user = format!("user{}", w);
                let mut attrs = city(if w % 2 == 0 { "SF" } else { "NYC" });
                attrs.insert("isMobile".to_string(), AttributeValue::flag(w % 3 == 0));
                service.set_user(&user, attrs).unwrap();
                for i in 0..per_writer {
                    let hour = 12 + (i % 6) as u32;
                    service.ingest(&user, VIEW, at(hour)).unwrap();
                }
            });
        }
        for _ in 0..2 {
            let service = service.clone();
            scope.spawn(move || {
                let mut previous = 0;
                for _ in 0..200 {
                    let total = service.window_sum(VIEW, at(18), 24, None).unwrap();
                    assert!(total >= previous);
                    previous = total;
                    let _ = service.conversion_rates(VIEW, at(18), None).unwrap();
                }
            });
        }
    });

    assert_eq!(
        service.window_sum(VIEW, at(18), 24, None).unwrap(),
        (writers * per_writer) as u64
    );
    let sf = city("SF");
    assert_eq!(
        service.window_sum(VIEW, at(18), 24, Some(&sf)).unwrap(),
        (writers / 2 * per_writer) as u64
    );
}
