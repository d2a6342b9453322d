use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "planner-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "PLANNER_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "PLANNER_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "UTC";

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// Timezone used to decide which
/// calendar day "today" is.
pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

#[must_use]
pub fn today(
  now: DateTime<Utc>
) -> NaiveDate {
  now.with_timezone(project_timezone())
    .date_naive()
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or(chrono_tz::UTC)
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Resolves a user-typed date to a
/// calendar day relative to `now`.
#[tracing::instrument(skip(now), fields(input = input))]
pub fn parse_date_expr(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let local_today = today(now);

  match lower.as_str() {
    | "today" => return Ok(local_today),
    | "tomorrow" => {
      return shift_days(local_today, 1);
    }
    | "yesterday" => {
      return shift_days(
        local_today,
        -1
      );
    }
    | _ => {}
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      local_today,
      target_weekday
    ));
  }

  let rel_re = Regex::new(
    r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dw])$"
  )
  .map_err(|e| {
    anyhow!(
      "internal regex compile \
       failure: {e}"
    )
  })?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let sign = caps
      .name("sign")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative sign")
      })?;
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let days = match unit {
      | "d" => num,
      | "w" => num.saturating_mul(7),
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ))
      }
    };

    return shift_days(
      local_today,
      if sign == "-" { -days } else { days }
    );
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, \
     weekday names (e.g. monday), \
     +Nd/-Nd/+Nw, YYYY-MM-DD"
  })
}

fn shift_days(
  from: NaiveDate,
  days: i64
) -> anyhow::Result<NaiveDate> {
  from
    .checked_add_signed(Duration::days(
      days
    ))
    .ok_or_else(|| {
      anyhow!(
        "date out of range: {from} \
         shifted by {days} days"
      )
    })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::parse_date_expr;

  fn noon_utc() -> chrono::DateTime<Utc>
  {
    Utc
      .with_ymd_and_hms(
        2026, 2, 17, 12, 0, 0
      )
      .single()
      .expect("valid now")
  }

  #[test]
  fn parses_iso_date_verbatim() {
    let parsed = parse_date_expr(
      "2026-03-08",
      noon_utc()
    )
    .expect("parse iso date");
    assert_eq!(
      parsed,
      NaiveDate::from_ymd_opt(
        2026, 3, 8
      )
      .expect("valid date")
    );
  }

  #[test]
  fn parses_weekday_name() {
    let parsed = parse_date_expr(
      "wednesday",
      noon_utc()
    )
    .expect("parse weekday");
    assert_eq!(
      parsed.format("%Y-%m-%d").to_string(),
      "2026-02-18"
    );
  }

  #[test]
  fn relative_offsets_move_from_today() {
    let base = parse_date_expr(
      "today",
      noon_utc()
    )
    .expect("today");
    let plus_week = parse_date_expr(
      "+1w",
      noon_utc()
    )
    .expect("plus week");
    let minus_two = parse_date_expr(
      "-2d",
      noon_utc()
    )
    .expect("minus two days");
    assert_eq!(
      (plus_week - base).num_days(),
      7
    );
    assert_eq!(
      (base - minus_two).num_days(),
      2
    );
  }

  #[test]
  fn rejects_garbage() {
    assert!(
      parse_date_expr(
        "someday",
        noon_utc()
      )
      .is_err()
    );
  }
}

/// `YYYY-MM-DD` calendar dates as the
/// task store writes them. Empty strings
/// read as no date.
pub mod iso_date_serde {
  const FORMAT: &str = "%Y-%m-%d";

  pub mod option {
    use chrono::NaiveDate;
    use serde::{
      Deserialize,
      Deserializer,
      Serializer
    };

    pub fn serialize<S>(
      date: &Option<NaiveDate>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match date {
        | Some(value) => serializer
          .serialize_str(
            &value
              .format(super::FORMAT)
              .to_string()
          ),
        | None => {
          serializer.serialize_none()
        }
      }
    }

    pub fn deserialize<'de, D>(
      deserializer: D
    ) -> Result<Option<NaiveDate>, D::Error>
    where
      D: Deserializer<'de>
    {
      let opt =
        Option::<String>::deserialize(
          deserializer
        )?;
      match opt.as_deref().map(str::trim) {
        | None | Some("") => Ok(None),
        | Some(raw) => NaiveDate::parse_from_str(raw, super::FORMAT)
          .map(Some)
          .map_err(serde::de::Error::custom)
      }
    }
  }

  /// Patch form: outer `None` is
  /// skipped, `Some(None)` is `""`. The
  /// store ignores a `null` date in a
  /// patch, so an empty string clears.
  pub mod nullable {
    use chrono::NaiveDate;
    use serde::Serializer;

    pub fn serialize<S>(
      date: &Option<Option<NaiveDate>>,
      serializer: S
    ) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {
      match date {
        | Some(Some(value)) => serializer
          .serialize_str(
            &value
              .format(super::FORMAT)
              .to_string()
          ),
        | Some(None) => {
          serializer.serialize_str("")
        }
        | None => {
          serializer.serialize_none()
        }
      }
    }
  }
}

/// Creation timestamps. The store may
/// omit the offset; those are UTC.
pub mod created_at_serde {
  use chrono::{
    DateTime,
    NaiveDateTime,
    SecondsFormat,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt.to_rfc3339_opts(
        SecondsFormat::AutoSi,
        true
      )
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    if let Ok(dt) =
      DateTime::parse_from_rfc3339(&raw)
    {
      return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(
      &raw,
      "%Y-%m-%dT%H:%M:%S%.f"
    )
    .map(|ndt| {
      DateTime::<Utc>::from_naive_utc_and_offset(
        ndt, Utc
      )
    })
    .map_err(serde::de::Error::custom)
  }
}
