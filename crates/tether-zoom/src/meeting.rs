//! [`CreateMeeting`]: schedule a Zoom meeting for the identity's owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{Error, Result, executor::Action, http::HttpRequest};

use crate::{PROVIDER, config::ZoomConfig};

const MAX_TOPIC_CHARS: usize = 200;
const MAX_AGENDA_CHARS: usize = 2000;
const MAX_TIMEZONE_CHARS: usize = 64;
const MAX_DURATION_MINUTES: u64 = 24 * 60;

/// Zoom's "scheduled meeting" type.
const SCHEDULED: u8 = 2;

/// Raw caller parameters, before bounds checks.
#[derive(Debug, Deserialize)]
struct MeetingParams {
  topic:      Option<String>,
  start_time: Option<String>,
  /// Kept loose so a mistyped duration is reported against its own field.
  duration:   Option<Value>,
  timezone:   Option<String>,
  agenda:     Option<String>,
}

/// Validated meeting parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingRequest {
  pub topic:      String,
  pub start_time: DateTime<Utc>,
  /// Minutes.
  pub duration:   u64,
  pub timezone:   Option<String>,
  pub agenda:     Option<String>,
}

/// Body of `POST /users/me/meetings`.
#[derive(Debug, Serialize)]
struct ZoomMeetingBody<'a> {
  topic:      &'a str,
  #[serde(rename = "type")]
  kind:       u8,
  start_time: String,
  duration:   u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  timezone:   Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  agenda:     Option<&'a str>,
}

impl<'a> From<&'a MeetingRequest> for ZoomMeetingBody<'a> {
  fn from(request: &'a MeetingRequest) -> Self {
    Self {
      topic:      &request.topic,
      kind:       SCHEDULED,
      start_time: request.start_time.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
      duration:   request.duration,
      timezone:   request.timezone.as_deref(),
      agenda:     request.agenda.as_deref(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct CreateMeeting {
  api_base_url: String,
}

impl CreateMeeting {
  pub fn new(config: &ZoomConfig) -> Self {
    Self { api_base_url: config.api_base_url.trim_end_matches('/').to_owned() }
  }
}

impl Action for CreateMeeting {
  type Request = MeetingRequest;

  fn name(&self) -> &'static str { "create_meeting" }

  fn provider(&self) -> &'static str { PROVIDER }

  fn parse(&self, params: &Value) -> Result<MeetingRequest> {
    let raw = MeetingParams::deserialize(params)
      .map_err(|e| Error::invalid("params", e.to_string()))?;

    let topic = raw
      .topic
      .as_deref()
      .ok_or_else(|| Error::invalid("topic", "required"))?
      .trim();
    check_len("topic", topic, 1, MAX_TOPIC_CHARS)?;

    let start_time = raw
      .start_time
      .as_deref()
      .ok_or_else(|| Error::invalid("start_time", "required"))?;
    let start_time = DateTime::parse_from_rfc3339(start_time)
      .map_err(|e| Error::invalid("start_time", format!("not an RFC 3339 timestamp: {e}")))?
      .with_timezone(&Utc);

    let duration = raw
      .duration
      .as_ref()
      .ok_or_else(|| Error::invalid("duration", "required"))?
      .as_u64()
      .filter(|d| (1..=MAX_DURATION_MINUTES).contains(d))
      .ok_or_else(|| {
        Error::invalid(
          "duration",
          format!("must be a whole number of minutes between 1 and {MAX_DURATION_MINUTES}"),
        )
      })?;

    let timezone = raw
      .timezone
      .as_deref()
      .map(str::trim)
      .filter(|tz| !tz.is_empty());
    if let Some(tz) = timezone {
      check_len("timezone", tz, 1, MAX_TIMEZONE_CHARS)?;
    }

    let agenda = raw.agenda.as_deref().filter(|a| !a.is_empty());
    if let Some(agenda) = agenda {
      check_len("agenda", agenda, 1, MAX_AGENDA_CHARS)?;
    }

    Ok(MeetingRequest {
      topic: topic.to_owned(),
      start_time,
      duration,
      timezone: timezone.map(str::to_owned),
      agenda: agenda.map(str::to_owned),
    })
  }

  fn build(&self, request: &MeetingRequest, access_token: &str) -> Result<HttpRequest> {
    let req = HttpRequest::new("POST", format!("{}/users/me/meetings", self.api_base_url))
      .bearer(access_token)
      .json_body(&ZoomMeetingBody::from(request))?;
    Ok(req)
  }
}

fn check_len(field: &'static str, value: &str, min: usize, max: usize) -> Result<()> {
  let len = value.chars().count();
  if len < min || len > max {
    return Err(Error::invalid(field, format!("must be {min}-{max} characters")));
  }
  Ok(())
}
