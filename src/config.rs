//! Configuration (C9)
//!
//! Loaded once at startup from `ZEROTERM_*` environment variables. Every
//! value has a default; malformed input falls back to that default rather
//! than failing the process, matching `original_source/src/zerotermd/
//! config.py`.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub shell: String,
    pub shell_cmd: Option<Vec<String>>,
    pub term: String,
    pub cwd: Option<String>,
    pub log_level: String,
    pub static_dir: PathBuf,
    pub session_log_dir: Option<PathBuf>,
    pub session_resume: bool,
    pub session_ttl: u64,
}

fn env_value(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_int(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value.parse().unwrap_or(default),
        _ => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) if !value.is_empty() => {
            matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
        }
        _ => default,
    }
}

/// Splits a shell-quoted command string into argv, honoring single and
/// double quotes the way a shell would for a simple, unnested command.
/// Unmatched quotes cause the whole string to be treated as absent, mirroring
/// `load_config`'s `except ValueError: shell_cmd = None` in the original.
fn split_shell_words(input: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if quote.is_some() {
        return None;
    }
    if in_word {
        words.push(current);
    }
    Some(words)
}

impl Config {
    pub fn load() -> Config {
        let static_dir = PathBuf::from(env_value("ZEROTERM_STATIC_DIR", "./web"));
        let static_dir = static_dir.canonicalize().unwrap_or(static_dir);

        let bind = env_value("ZEROTERM_BIND", "0.0.0.0");
        let port = match env::var("ZEROTERM_PORT") {
            Ok(value) if !value.is_empty() => value.parse().unwrap_or(8080),
            _ => 8080,
        };
        let shell = env_value("ZEROTERM_SHELL", "/bin/bash");

        let shell_cmd = match env::var("ZEROTERM_SHELL_CMD") {
            Ok(value) if !value.is_empty() => {
                split_shell_words(&value).filter(|words| !words.is_empty())
            }
            _ => None,
        };

        let term = env_value("ZEROTERM_TERM", "linux");
        let cwd = env::var("ZEROTERM_CWD").ok().filter(|v| !v.is_empty());
        let log_level = env_value("ZEROTERM_LOG_LEVEL", "info").to_lowercase();

        let session_log_dir = match env::var("ZEROTERM_SESSION_LOG_DIR") {
            Ok(value) if !value.is_empty() => {
                let path = PathBuf::from(value);
                Some(path.canonicalize().unwrap_or(path))
            }
            _ => None,
        };
        let session_resume = env_bool("ZEROTERM_SESSION_RESUME", true);
        let session_ttl = env_int("ZEROTERM_SESSION_TTL", 60);

        Config {
            bind,
            port,
            shell,
            shell_cmd,
            term,
            cwd,
            log_level,
            static_dir,
            session_log_dir,
            session_resume,
            session_ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        for (k, v) in vars {
            env::set_var(k, v);
        }
        f();
        for (k, _) in vars {
            env::remove_var(k);
        }
    }

    #[test]
    fn defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in [
            "ZEROTERM_BIND",
            "ZEROTERM_PORT",
            "ZEROTERM_SHELL",
            "ZEROTERM_SHELL_CMD",
            "ZEROTERM_SESSION_RESUME",
            "ZEROTERM_SESSION_TTL",
        ] {
            env::remove_var(key);
        }
        let config = Config::load();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.shell, "/bin/bash");
        assert_eq!(config.shell_cmd, None);
        assert!(config.session_resume);
        assert_eq!(config.session_ttl, 60);
    }

    #[test]
    fn invalid_port_falls_back() {
        with_env(&[("ZEROTERM_PORT", "not-a-number")], || {
            let config = Config::load();
            assert_eq!(config.port, 8080);
        });
    }

    #[test]
    fn overrides_are_applied() {
        with_env(
            &[
                ("ZEROTERM_BIND", "127.0.0.1"),
                ("ZEROTERM_PORT", "9001"),
                ("ZEROTERM_SHELL", "/bin/zsh"),
                ("ZEROTERM_SHELL_CMD", "tmux new -A -s zeroterm"),
                ("ZEROTERM_SESSION_RESUME", "0"),
                ("ZEROTERM_SESSION_TTL", "120"),
            ],
            || {
                let config = Config::load();
                assert_eq!(config.bind, "127.0.0.1");
                assert_eq!(config.port, 9001);
                assert_eq!(config.shell, "/bin/zsh");
                assert_eq!(
                    config.shell_cmd,
                    Some(vec![
                        "tmux".to_string(),
                        "new".to_string(),
                        "-A".to_string(),
                        "-s".to_string(),
                        "zeroterm".to_string()
                    ])
                );
                assert!(!config.session_resume);
                assert_eq!(config.session_ttl, 120);
            },
        );
    }

    #[test]
    fn split_shell_words_handles_quotes() {
        assert_eq!(
            split_shell_words("tmux new -A -s 'my session'"),
            Some(vec![
                "tmux".into(),
                "new".into(),
                "-A".into(),
                "-s".into(),
                "my session".into()
            ])
        );
        assert_eq!(split_shell_words("unterminated 'quote"), None);
    }
}
