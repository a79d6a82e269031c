//! Spoken announcement texts (Korean, matching the ko-KR voice)

use crate::transit::{ArrivalRecord, Resolution};

/// Nothing could be read from the video
pub fn nothing_recognized() -> String {
    "아무 번호도 인식되지 않았습니다.".to_string()
}

/// The number is not a known route
pub fn route_not_found(route: &str) -> String {
    format!("{}번 버스 정보를 찾을 수 없습니다.", route)
}

/// The route does not stop at the rider's stop
pub fn not_served_at_stop(route: &str, stop_name: &str) -> String {
    format!("{}번 버스는 {} 정류소에 정차하지 않습니다.", route, stop_name)
}

/// Arrival information could not be retrieved
pub fn unavailable(route: &str) -> String {
    format!(
        "{}번 버스의 도착 정보를 지금은 확인할 수 없습니다. 잠시 후 다시 시도해 주세요.",
        route
    )
}

/// Arrival status and both ETAs
pub fn arrival(record: &ArrivalRecord) -> String {
    let status = if record.arrived {
        format!("{}번 버스가 도착했습니다.", record.route)
    } else {
        format!("{}번 버스가 도착하지 않았습니다.", record.route)
    };

    let mut text = status;
    if !record.first_eta.is_empty() {
        text.push_str(&format!(" 첫번째 버스 도착 예정시간: {}.", record.first_eta));
    }
    if !record.second_eta.is_empty() {
        text.push_str(&format!(" 두번째 버스 도착 예정시간: {}.", record.second_eta));
    }
    text
}

/// Text for any transit resolution
pub fn for_resolution(resolution: &Resolution) -> String {
    match resolution {
        Resolution::Arrival { record, .. } => arrival(record),
        Resolution::RouteNotFound { route } => route_not_found(route),
        Resolution::NotServedAtStop { route, stop } => not_served_at_stop(route, &stop.name),
        Resolution::Unavailable { route } => unavailable(route),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transit::Stop;

    fn record(arrived: bool, first: &str, second: &str) -> ArrivalRecord {
        ArrivalRecord {
            route: "721".to_string(),
            arrived,
            first_eta: first.to_string(),
            second_eta: second.to_string(),
        }
    }

    #[test]
    fn test_arrival_announcement() {
        let text = arrival(&record(true, "곧 도착", "8분후"));
        assert_eq!(
            text,
            "721번 버스가 도착했습니다. 첫번째 버스 도착 예정시간: 곧 도착. 두번째 버스 도착 예정시간: 8분후."
        );
    }

    #[test]
    fn test_not_arrived_skips_missing_eta() {
        let text = arrival(&record(false, "3분후", ""));
        assert_eq!(text, "721번 버스가 도착하지 않았습니다. 첫번째 버스 도착 예정시간: 3분후.");
    }

    #[test]
    fn test_failure_announcements() {
        assert_eq!(
            for_resolution(&Resolution::RouteNotFound {
                route: "9999".to_string()
            }),
            "9999번 버스 정보를 찾을 수 없습니다."
        );

        let stop = Stop {
            id: "1".to_string(),
            name: "시청앞".to_string(),
            x: 0.0,
            y: 0.0,
        };
        assert_eq!(
            for_resolution(&Resolution::NotServedAtStop {
                route: "143".to_string(),
                stop,
            }),
            "143번 버스는 시청앞 정류소에 정차하지 않습니다."
        );
        assert_eq!(
            for_resolution(&Resolution::Unavailable {
                route: "721".to_string()
            }),
            "721번 버스의 도착 정보를 지금은 확인할 수 없습니다. 잠시 후 다시 시도해 주세요."
        );
        assert!(!nothing_recognized().is_empty());
    }
}
