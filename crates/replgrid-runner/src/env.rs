//! Shell environment sanitization.

use std::ffi::OsString;
use std::path::Path;

use tracing::debug;

/// Variables that carry storage or session credentials.
pub const DEFAULT_DENIED_ENV: [&str; 6] = [
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "S3_BUCKET",
    "S3_ENDPOINT",
    "AWS_SESSION_TOKEN",
    "AWS_SECURITY_TOKEN",
];

/// Filter `vars` against the deny list and inject the terminal defaults.
///
/// The result is the complete environment of the shell; nothing else is
/// inherited.
pub fn sanitized_env<I>(vars: I, extra_denied: &[String], home: &Path) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let denied = |key: &str| {
        DEFAULT_DENIED_ENV.contains(&key) || extra_denied.iter().any(|d| d == key)
    };
    let mut env: Vec<(String, String)> = vars
        .into_iter()
        .filter(|(key, _)| !denied(key) && key != "TERM" && key != "HOME")
        .collect();
    env.push(("TERM".to_string(), "xterm-256color".to_string()));
    env.push(("HOME".to_string(), home.display().to_string()));
    env
}

/// The variables of this process that are valid UTF-8.
pub fn process_env() -> Vec<(String, String)> {
    utf8_vars(std::env::vars_os())
}

fn utf8_vars<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| {
            let lossy = key.to_string_lossy().into_owned();
            match (key.into_string(), value.into_string()) {
                (Ok(key), Ok(value)) => Some((key, value)),
                _ => {
                    debug!(key = %lossy, "skipping non-UTF-8 variable");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn strips_credentials() {
        let env = sanitized_env(
            vars(&[
                ("AWS_ACCESS_KEY_ID", "AKIA"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("S3_BUCKET", "repl-code"),
                ("PATH", "/usr/bin"),
            ]),
            &[],
            Path::new("/workspace"),
        );
        assert_eq!(lookup(&env, "AWS_ACCESS_KEY_ID"), None);
        assert_eq!(lookup(&env, "AWS_SECRET_ACCESS_KEY"), None);
        assert_eq!(lookup(&env, "S3_BUCKET"), None);
        assert_eq!(lookup(&env, "PATH"), Some("/usr/bin"));
    }

    #[test]
    fn extra_denied_names_apply() {
        let env = sanitized_env(
            vars(&[("GITHUB_TOKEN", "ghp"), ("LANG", "C.UTF-8")]),
            &["GITHUB_TOKEN".to_string()],
            Path::new("/workspace"),
        );
        assert_eq!(lookup(&env, "GITHUB_TOKEN"), None);
        assert_eq!(lookup(&env, "LANG"), Some("C.UTF-8"));
    }

    #[test]
    fn injects_terminal_defaults_once() {
        let env = sanitized_env(
            vars(&[("TERM", "dumb"), ("HOME", "/root")]),
            &[],
            Path::new("/workspace"),
        );
        assert_eq!(lookup(&env, "TERM"), Some("xterm-256color"));
        assert_eq!(lookup(&env, "HOME"), Some("/workspace"));
        assert_eq!(env.iter().filter(|(k, _)| k == "HOME").count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let bad = OsString::from_vec(vec![0x66, 0x6f, 0xff]);
        let env = utf8_vars([
            (OsString::from("LANG"), OsString::from("C.UTF-8")),
            (OsString::from("BROKEN"), bad.clone()),
            (bad, OsString::from("x")),
        ]);
        assert_eq!(env, vars(&[("LANG", "C.UTF-8")]));
    }
}
