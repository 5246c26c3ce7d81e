use std::path::{Path, PathBuf};

use regex::Regex;

use crate::{
    error::{Error, Result},
    schema::BootConfig,
};

/// Search order mirrors the teacher's `discover_and_load`: a config file
/// next to the working directory first, then the user's config directory.
#[must_use]
pub fn find_config_file() -> Option<PathBuf> {
    let candidate = PathBuf::from("./chatrelay.toml");
    if candidate.is_file() {
        return Some(candidate);
    }

    let dirs = directories::ProjectDirs::from("", "", "chatrelay")?;
    let candidate = dirs.config_dir().join("config.toml");
    candidate.is_file().then_some(candidate)
}

/// Loads and parses a config file at `path`, substituting `${VAR}` /
/// `${VAR:-default}` references against the process environment before
/// parsing TOML.
pub fn load_config(path: impl AsRef<Path>) -> Result<BootConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;

    let substituted = substitute_env(&raw)?;

    toml::from_str(&substituted).map_err(|source| Error::Parse {
        path: path.display().to_string(),
        source: Box::new(source),
    })
}

/// Discovers a config file via [`find_config_file`] and loads it.
pub fn discover_and_load() -> Result<BootConfig> {
    let path = find_config_file().ok_or_else(|| {
        Error::NotFound("./chatrelay.toml, $XDG_CONFIG_HOME/chatrelay/config.toml".to_string())
    })?;
    load_config(path)
}

/// Replaces `${VAR}` and `${VAR:-default}` references with values from the
/// process environment. Missing variables with no default are an error
/// rather than silently becoming an empty string, so a misconfigured
/// deployment fails at boot instead of at first use.
fn substitute_env(input: &str) -> Result<String> {
    // `unwrap` is safe: this pattern is a fixed string, not user input.
    #[allow(clippy::unwrap_used)]
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap();

    let mut first_err = None;
    let result = pattern.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => match caps.get(3) {
                Some(default) => default.as_str().to_string(),
                None => {
                    first_err.get_or_insert_with(|| Error::MissingEnvVar(name.to_string()));
                    String::new()
                }
            },
        }
    });

    if let Some(err) = first_err {
        return Err(err);
    }
    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_present_var() {
        unsafe { std::env::set_var("CHATRELAY_TEST_VAR", "hello") };
        let out = substitute_env("value = \"${CHATRELAY_TEST_VAR}\"").expect("substitutes");
        assert_eq!(out, "value = \"hello\"");
        unsafe { std::env::remove_var("CHATRELAY_TEST_VAR") };
    }

    #[test]
    fn falls_back_to_default_when_missing() {
        let out = substitute_env("value = \"${CHATRELAY_DOES_NOT_EXIST:-fallback}\"")
            .expect("substitutes");
        assert_eq!(out, "value = \"fallback\"");
    }

    #[test]
    fn errors_when_missing_and_no_default() {
        let err = substitute_env("value = \"${CHATRELAY_DOES_NOT_EXIST_EITHER}\"").unwrap_err();
        assert!(matches!(err, Error::MissingEnvVar(_)));
    }

    #[test]
    fn loads_and_parses_a_real_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chatrelay.toml");
        std::fs::write(
            &path,
            r#"
                database_url = "postgres://localhost/chatrelay"
                gateway_token_secret = "${CHATRELAY_TEST_SECRET:-dev-secret}"
                webhook_signing_secret = "dev-secret-2"
            "#,
        )
        .expect("write config");

        let cfg = load_config(&path).expect("loads");
        assert_eq!(cfg.gateway_token_secret, "dev-secret");
    }
}
