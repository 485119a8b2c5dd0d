//! Current date and time

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use serde_json::json;

use crate::tools::{Tool, str_arg};
use crate::{Error, Result};

const FORMAT: &str = "%A, %B %d, %Y at %I:%M %p";

/// Describe the current time, locally or in an IANA timezone
///
/// # Errors
///
/// Returns error if the timezone name is unknown
pub fn describe_now(timezone: Option<&str>) -> Result<String> {
    match timezone.filter(|tz| !tz.eq_ignore_ascii_case("local")) {
        None => Ok(format_local(Local::now())),
        Some(name) => {
            let tz: Tz = name
                .parse()
                .map_err(|_| Error::Tool(format!("unknown timezone '{name}'")))?;
            Ok(format_in_zone(name, &Utc::now().with_timezone(&tz)))
        }
    }
}

fn format_local(now: DateTime<Local>) -> String {
    format!("Current local time: {}", now.format(FORMAT))
}

fn format_in_zone(name: &str, now: &DateTime<Tz>) -> String {
    format!("Current time in {name}: {}", now.format(FORMAT))
}

/// The `get_current_time` tool
#[must_use]
pub fn tool() -> Tool {
    Tool::from_fn(
        "get_current_time",
        "Get the current date and time. Use this when the user asks what time it is or what day it is.",
        |args| describe_now(str_arg(args, "timezone")),
    )
    .parameters(json!({
        "type": "object",
        "properties": {
            "timezone": {
                "type": "string",
                "description": "Optional timezone (e.g., 'America/New_York'). Defaults to local time."
            }
        },
        "required": []
    }))
    .usage_rule("get_current_time: the current time, date, or day of the week")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn formats_named_zone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let at = tz.with_ymd_and_hms(2024, 7, 4, 15, 5, 0).unwrap();
        assert_eq!(
            format_in_zone("America/New_York", &at),
            "Current time in America/New_York: Thursday, July 04, 2024 at 03:05 PM"
        );
    }

    #[test]
    fn local_and_unknown() {
        assert!(describe_now(None).unwrap().starts_with("Current local time: "));
        assert!(describe_now(Some("local")).unwrap().starts_with("Current local time: "));
        assert!(describe_now(Some("Europe/Paris")).unwrap().starts_with("Current time in Europe/Paris: "));
        assert!(describe_now(Some("Mars/Olympus")).is_err());
    }
}
