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

const RC_ENV_VAR: &str = "PIPELINERC";
const RC_FILE_NAME: &str = ".pipelinerc";
const DATA_DIR_NAME: &str = ".pipeline";

/// Flat `key = value` settings read from a pipelinerc file.
#[derive(Debug, Clone)]
pub struct Config {
  map:        HashMap<String, String>,
  /// The pipelinerc actually read, if any.
  pub source: Option<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self::with_defaults()
  }
}

impl Config {
  #[must_use]
  pub fn with_defaults() -> Self {
    let mut cfg = Config {
      map:    HashMap::new(),
      source: None
    };

    for (key, value) in [
      ("data.location", "~/.pipeline"),
      ("color", "on"),
      ("fiscal.year_start_month", "1"),
      ("view.default", "quarterly"),
      ("quarterly.show_all", "off")
    ] {
      cfg
        .map
        .insert(key.to_string(), value.to_string());
    }

    cfg
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::with_defaults();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(pipelinerc = %path.display(), "loading pipelinerc");
      cfg.read_rc(&path)?;
    } else {
      warn!(
        "no pipelinerc found; using \
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

  /// `None` when the key is absent; an error when it is not a number.
  pub fn get_u32(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u32>> {
    self
      .map
      .get(key)
      .map(|raw| {
        raw.trim().parse::<u32>().with_context(
          || {
            format!(
              "invalid number for {key}: \
               {raw}"
            )
          }
        )
      })
      .transpose()
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn read_rc(
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

    for (index, raw) in
      text.lines().enumerate()
    {
      let Some((key, value)) =
        parse_rc_line(raw).with_context(
          || {
            format!(
              "{}:{}",
              path.display(),
              index + 1
            )
          }
        )?
      else {
        continue;
      };
      trace!(%key, %value, "pipelinerc entry");
      self.map.insert(key, value);
    }

    self.source = Some(path);
    Ok(())
  }
}

/// `Ok(None)` for blank and comment-only lines.
fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<(String, String)>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(None);
  }

  let (key, value) =
    line.split_once('=').ok_or_else(|| {
      anyhow!(
        "expected key = value, got: \
         {raw}"
      )
    })?;
  let key = key.trim();
  if key.is_empty() {
    return Err(anyhow!(
      "missing key before '=': {raw}"
    ));
  }
  Ok(Some((
    key.to_string(),
    value.trim().to_string()
  )))
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
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
    std::env::var(RC_ENV_VAR)
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
       directory; skipping \
       pipelinerc lookup"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(DATA_DIR_NAME))
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
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    parse_rc_line
  };

  #[test]
  fn reads_pairs_and_skips_comments() {
    let dir =
      tempdir().expect("tempdir");
    let rc = dir.path().join("main.rc");
    fs::write(
      &rc,
      "# fiscal setup\n\
       \n\
       fiscal.year_start_month = 7 # july\n\
       quarterly.window.back=2\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load config");
    assert_eq!(
      cfg
        .get_u32("fiscal.year_start_month")
        .expect("number"),
      Some(7)
    );
    assert_eq!(
      cfg.get("quarterly.window.back")
        .as_deref(),
      Some("2")
    );
    assert_eq!(
      cfg.get("view.default").as_deref(),
      Some("quarterly")
    );
    assert_eq!(
      cfg.source.as_deref(),
      Some(rc.as_path())
    );
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::with_defaults();
    cfg.apply_overrides([(
      "rc.quarterly.show_all".to_string(),
      "yes".to_string()
    )]);
    assert_eq!(
      cfg.get_bool("quarterly.show_all"),
      Some(true)
    );
  }

  #[test]
  fn rejects_lines_without_equals() {
    let dir =
      tempdir().expect("tempdir");
    let rc = dir.path().join("bad.rc");
    fs::write(&rc, "fiscal\n")
      .expect("write rc");
    let err = Config::load(Some(&rc))
      .expect_err("no equals sign");
    assert!(
      format!("{err:#}").contains("bad.rc:1")
    );
    assert!(
      parse_rc_line(" = 3").is_err()
    );
  }

  #[test]
  fn non_numeric_values_are_errors() {
    let mut cfg = Config::with_defaults();
    cfg.apply_overrides([(
      "fiscal.year_start_month".to_string(),
      "july".to_string()
    )]);
    assert!(
      cfg
        .get_u32("fiscal.year_start_month")
        .is_err()
    );
  }
}
