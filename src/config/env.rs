// Child environment files and command-line splitting

use crate::error::{Result, WardenError};
use std::path::Path;

/// Read a `KEY=VALUE` environment file
pub fn parse_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        WardenError::Config(format!("Failed to read env file {}: {}", path.display(), e))
    })?;
    parse_env(&contents)
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped; the value
/// is everything after the first `=`, kept verbatim.
pub fn parse_env(contents: &str) -> Result<Vec<(String, String)>> {
    let mut vars = Vec::new();

    for (number, line) in contents.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match trimmed.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                vars.push((key.trim().to_string(), value.to_string()));
            }
            _ => {
                return Err(WardenError::InvalidConfig(format!(
                    "env line {} is not KEY=VALUE: {}",
                    number + 1,
                    line
                )))
            }
        }
    }

    Ok(vars)
}

/// Split a command line into words the way a POSIX shell would, without any
/// expansion
pub fn split_command(line: &str) -> Result<Vec<String>> {
    let words = shell_words::split(line).map_err(|e| {
        WardenError::InvalidConfig(format!("cannot split command '{}': {}", line, e))
    })?;

    if words.is_empty() {
        return Err(WardenError::MissingConfigField("command".to_string()));
    }

    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn words(line: &str) -> Vec<String> {
        split_command(line).unwrap()
    }

    #[test]
    fn test_split_plain() {
        assert_eq!(words("sleep 30"), vec!["sleep", "30"]);
        assert_eq!(words("  echo   a\tb  "), vec!["echo", "a", "b"]);
    }

    #[test]
    fn test_split_quotes() {
        assert_eq!(words("echo 'hello world'"), vec!["echo", "hello world"]);
        assert_eq!(words(r#"echo "say \"hi\"""#), vec!["echo", r#"say "hi""#]);
        assert_eq!(words(r#"echo "a\nb""#), vec!["echo", r"a\nb"]);
        assert_eq!(words("echo ''"), vec!["echo", ""]);
        assert_eq!(words("echo pre'mid dle'post"), vec!["echo", "premid dlepost"]);
        assert_eq!(words(r"echo a\ b"), vec!["echo", "a b"]);
    }

    #[test]
    fn test_split_errors() {
        assert!(split_command("echo 'open").is_err());
        assert!(split_command("echo \"open").is_err());
        assert!(matches!(
            split_command("   "),
            Err(WardenError::MissingConfigField(_))
        ));
    }

    #[test]
    fn test_parse_env() {
        let vars = parse_env("# header\n\nTHEVAR=WORLD\n  PATH=/bin:/usr/bin\nEMPTY=\nURL=a=b\n").unwrap();

        assert_eq!(
            vars,
            vec![
                ("THEVAR".to_string(), "WORLD".to_string()),
                ("PATH".to_string(), "/bin:/usr/bin".to_string()),
                ("EMPTY".to_string(), String::new()),
                ("URL".to_string(), "a=b".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_env_rejects_garbage() {
        assert!(parse_env("NOT A PAIR").is_err());
        assert!(parse_env("=value").is_err());
    }

    #[test]
    fn test_parse_env_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("child.env");
        fs::write(&path, "A=1\nB=2\n").unwrap();

        assert_eq!(parse_env_file(&path).unwrap().len(), 2);
        assert!(parse_env_file(&temp_dir.path().join("missing.env")).is_err());
    }
}
