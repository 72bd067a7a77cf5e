//! `{{.Key}}` placeholder rendering for compose files

use crate::error::{FlotillaError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

const PLACEHOLDER: &str = r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";

/// Substitute every `{{.Key}}` in `template`.
///
/// An unknown key is an error; text without placeholders is returned as is.
pub fn render(template: &str, values: &HashMap<String, String>) -> Result<String> {
    let re = Regex::new(PLACEHOLDER).map_err(|e| FlotillaError::Internal(e.to_string()))?;
    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for caps in re.captures_iter(template) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = values.get(key.as_str()).ok_or_else(|| {
            FlotillaError::Template(format!("unknown key '{}'", key.as_str()))
        })?;
        output.push_str(&template[last..whole.start()]);
        output.push_str(value);
        last = whole.end();
    }

    output.push_str(&template[last..]);
    Ok(output)
}

/// Read and render a template file
pub fn render_file(path: &Path, values: &HashMap<String, String>) -> Result<String> {
    if !path.exists() {
        return Err(FlotillaError::MissingFile(path.display().to_string()));
    }
    let template = std::fs::read_to_string(path)?;
    render(&template, values)
        .map_err(|e| FlotillaError::Template(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn values() -> HashMap<String, String> {
        let mut values = HashMap::new();
        values.insert("Domain".to_string(), "example.com".to_string());
        values.insert("Email".to_string(), "ops@example.com".to_string());
        values
    }

    #[test]
    fn test_render_both_spellings() {
        let out = render("host: {{.Domain}}\nemail: {{ .Email }}\n", &values()).unwrap();
        assert_eq!(out, "host: example.com\nemail: ops@example.com\n");
    }

    #[test]
    fn test_unknown_key() {
        let err = render("{{.Nope}}", &values()).unwrap_err();
        assert!(err.to_string().contains("Nope"));
    }

    #[test]
    fn test_text_without_placeholders() {
        let text = "labels:\n  - \"traefik.enable=true\"\n";
        assert_eq!(render(text, &values()).unwrap(), text);
    }

    #[test]
    fn test_render_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("traefik.yml");
        std::fs::write(&path, "- --certificatesresolvers.le.acme.email={{.Email}}").unwrap();

        let out = render_file(&path, &values()).unwrap();
        assert_eq!(out, "- --certificatesresolvers.le.acme.email=ops@example.com");

        let missing = render_file(&temp.path().join("nope.yml"), &values());
        assert!(matches!(missing, Err(FlotillaError::MissingFile(_))));
    }
}
