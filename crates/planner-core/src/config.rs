use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::task::Category;

pub const DEFAULT_API_URL: &str =
  "http://127.0.0.1:8000";

const DEFAULTS: &[(&str, &str)] = &[
  ("api.url", DEFAULT_API_URL),
  ("auth", "off"),
  (
    "session.location",
    "~/.planner/session.json"
  ),
  ("color", "on"),
  ("default.command", "stream"),
  ("default.category", "work")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc =
      resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(plannerrc = %path.display(), "loading plannerrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no plannerrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn api_url(&self) -> String {
    self
      .get("api.url")
      .filter(|url| !url.trim().is_empty())
      .unwrap_or_else(|| {
        DEFAULT_API_URL.to_string()
      })
  }

  /// Whether the task store wants a
  /// signed-in session.
  pub fn auth_required(&self) -> bool {
    self
      .get_bool("auth")
      .unwrap_or(false)
  }

  /// Category for new tasks that name
  /// none; unknown values fall back to
  /// work.
  pub fn default_category(
    &self
  ) -> Category {
    self
      .get("default.category")
      .map(|raw| {
        Category::parse_or_default(&raw)
      })
      .unwrap_or_default()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// Where the session record lives, or
/// `None` when authentication is off.
#[tracing::instrument(skip(cfg))]
pub fn resolve_session_path(
  cfg: &Config
) -> anyhow::Result<Option<PathBuf>> {
  if !cfg.auth_required() {
    return Ok(None);
  }

  let path = match cfg
    .get("session.location")
    .filter(|value| {
      !value.trim().is_empty()
    }) {
    | Some(value) => {
      expand_tilde(Path::new(
        value.trim()
      ))
    }
    | None => default_session_path()?
  };
  debug!(path = %path.display(), "resolved session location");
  Ok(Some(path))
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("PLANNERRC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping plannerrc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".plannerrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_session_path()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(
    home
      .join(".planner")
      .join("session.json")
  )
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn defaults_cover_every_key() {
    let cfg = Config::default();
    assert_eq!(
      cfg.api_url(),
      DEFAULT_API_URL
    );
    assert!(!cfg.auth_required());
    assert_eq!(
      cfg.default_category(),
      Category::Work
    );
    assert_eq!(
      cfg.get("default.command"),
      Some("stream".to_string())
    );
  }

  #[test]
  fn rc_file_with_include_and_overrides()
  {
    let temp =
      tempdir().expect("tempdir");
    let extra =
      temp.path().join("extra.rc");
    fs::write(
      &extra,
      "default.category = personal\n"
    )
    .expect("write include");
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# planner settings\napi.url = \
       http://tasks.local:9000 # \
       lan\nauth=on\ninclude \
       extra.rc\n"
    )
    .expect("write rc");

    let mut cfg = Config::load(Some(&rc))
      .expect("load rc");
    assert_eq!(
      cfg.api_url(),
      "http://tasks.local:9000"
    );
    assert!(cfg.auth_required());
    assert_eq!(
      cfg.default_category(),
      Category::Personal
    );
    assert_eq!(cfg.loaded_files.len(), 2);

    cfg.apply_overrides(vec![(
      "rc.auth".to_string(),
      "off".to_string()
    )]);
    assert!(!cfg.auth_required());
    assert_eq!(
      resolve_session_path(&cfg)
        .expect("session path"),
      None
    );
  }

  #[test]
  fn malformed_line_is_an_error() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "just words\n")
      .expect("write rc");
    let err = Config::load(Some(&rc))
      .expect_err("bad line");
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }

  #[test]
  fn session_location_is_configurable()
  {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![
      (
        "auth".to_string(),
        "yes".to_string()
      ),
      (
        "session.location".to_string(),
        "/tmp/planner/s.json".to_string()
      ),
    ]);
    assert_eq!(
      resolve_session_path(&cfg)
        .expect("session path"),
      Some(PathBuf::from(
        "/tmp/planner/s.json"
      ))
    );
  }
}
