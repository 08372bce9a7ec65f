use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::utils;

pub fn cmd_config(config: &Config, path: Option<&str>, save: bool) -> Result<()> {
    let path = path
        .map(utils::expand_tilde)
        .unwrap_or_else(Config::config_path);

    if save {
        config.save_to(&path)?;
        println!("Saved configuration to {}", path.display());
        return Ok(());
    }

    print!("{}", render(config, &path)?);
    Ok(())
}

fn render(config: &Config, path: &Path) -> Result<String> {
    let status = if path.is_file() { "" } else { " (not present, using defaults)" };
    Ok(format!(
        "# {}{status}\n{}",
        path.display(),
        toml::to_string_pretty(config)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_marks_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let text = render(&Config::default(), &path).unwrap();
        assert!(text.starts_with(&format!("# {} (not present", path.display())));
        assert!(text.contains("url = \"https://home-assistant.io\""));
        assert!(text.contains("[timing]"));
    }
}
