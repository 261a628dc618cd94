//! Initialize command - scaffolds a new shardlord project directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use shardlord_config::{Paths, ShardlordConfig};

use crate::style::{
    colors::SemanticStyle, create_spinner, finish_success, print_code_example, print_hint,
    print_labeled, print_spacer, print_success,
};

pub fn run(path: &str) -> Result<()> {
    let project_dir = Path::new(path);

    if Paths::is_initialized(project_dir) {
        anyhow::bail!(
            "Project already initialized in {}. shardlord.toml already exists.",
            project_dir.display()
        );
    }

    print_spacer();
    println!("Initializing new shardlord project...");
    print_spacer();

    let sp = create_spinner("Creating project directory...");
    fs::create_dir_all(project_dir).context("failed to create project directory")?;
    finish_success(&sp, "Created project directory");

    let sp = create_spinner("Writing configuration...");
    let config = ShardlordConfig::default();
    let config_path = Paths::cluster_config_file(project_dir);
    let config_content =
        toml::to_string_pretty(&config).context("failed to serialize configuration")?;
    fs::write(&config_path, config_content).context("failed to write shardlord.toml")?;
    finish_success(&sp, "Wrote shardlord.toml");

    let sp = create_spinner("Creating .gitignore...");
    let gitignore_content = r"# Local config overrides (not tracked in git)
shardlord.local.toml

# Build artifacts
target/
";
    let gitignore_path = project_dir.join(".gitignore");
    if gitignore_path.exists() {
        sp.finish_with_message("⏭  .gitignore already exists");
    } else {
        fs::write(&gitignore_path, gitignore_content).context("failed to write .gitignore")?;
        finish_success(&sp, "Created .gitignore");
    }

    print_spacer();
    print_success("Project initialized successfully!");
    print_spacer();

    let canonical_path = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());
    print_labeled("Location", &canonical_path.display().to_string());
    print_labeled("Config", "shardlord.toml");

    print_spacer();
    println!("{}", "Next steps:".header());
    print_spacer();

    print_hint("Register worker nodes and the catalog connection in shardlord.toml, then:");
    if path == "." {
        print_code_example("shardlord cluster status");
    } else {
        print_code_example(&format!("cd {path} && shardlord cluster status"));
    }

    Ok(())
}
