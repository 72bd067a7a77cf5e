//! Compose stacks deployed from the working directory to the leader

use super::require_leader;
use crate::error::{FlotillaError, Result};
use crate::inventory::{Inventory, Node};
use crate::remote::{Remote, RemoteCommand};
use crate::template;
use bcrypt::Version;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Heredoc delimiter for uploads; quoted so the remote shell expands nothing
pub const UPLOAD_DELIMITER: &str = "FLOTILLA_EOF";

/// Upload `content` to `remote_path` (relative to the login home).
///
/// Content with a line equal to the delimiter would end the heredoc early
/// and is rejected.
pub fn upload(remote_path: &str, content: &str) -> Result<RemoteCommand> {
    if content.lines().any(|line| line.trim() == UPLOAD_DELIMITER) {
        return Err(FlotillaError::InvalidArgument(format!(
            "{} contains the line {}, which cannot be uploaded",
            remote_path, UPLOAD_DELIMITER
        )));
    }

    Ok(RemoteCommand::new(format!(
        "cat > {} << '{delim}'\n{}\n{delim}",
        remote_path,
        content.trim_end_matches('\n'),
        delim = UPLOAD_DELIMITER
    ))
    .titled(format!("Uploading {}", remote_path)))
}

/// Write each missing `(name, content)` file into `working_dir/dir`
pub fn write_defaults(
    working_dir: &Path,
    dir: &Path,
    files: &[(&str, &str)],
) -> Result<Vec<PathBuf>> {
    let dir = working_dir.join(dir);
    fs::create_dir_all(&dir)?;

    let mut written = Vec::new();
    for (name, content) in files {
        let path = dir.join(name);
        if path.exists() {
            continue;
        }
        fs::write(&path, content)?;
        written.push(path);
    }
    Ok(written)
}

/// The leader, which must already run the reverse proxy
pub fn require_proxy_leader<'a>(inventory: &'a Inventory, command: &str) -> Result<&'a Node> {
    let leader = require_leader(inventory, command)?;
    if !leader.has_reverse_proxy {
        return Err(FlotillaError::Swarm(format!(
            "{} needs the reverse proxy, run `flotilla proxy` first",
            command
        )));
    }
    Ok(leader)
}

/// `user:hash` for traefik basic auth, with `$` escaped for compose files
pub fn basic_auth(user: &str, password: &str) -> Result<String> {
    if password.is_empty() {
        return Err(FlotillaError::InvalidArgument(format!(
            "empty password for {}",
            user
        )));
    }
    let hash = bcrypt::hash_with_result(password, bcrypt::DEFAULT_COST)
        .map_err(|e| FlotillaError::Internal(format!("bcrypt: {}", e)))?
        .format_for_version(Version::TwoY);
    Ok(format!("{}:{}", user, hash.replace('$', "$$")))
}

/// Directory and file name of a stack's compose file.
///
/// The compose file must sit in a subdirectory, which holds nothing but the
/// stack's files.
pub fn compose_location(compose_file: &str) -> Result<(&Path, &str)> {
    let path = Path::new(compose_file);
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
    let name = path.file_name().and_then(|name| name.to_str());
    match (dir, name) {
        (Some(dir), Some(name)) => Ok((dir, name)),
        _ => Err(FlotillaError::InvalidConfig(format!(
            "{} must live in its own directory",
            compose_file
        ))),
    }
}

/// A compose file plus the files next to it, uploaded together.
///
/// Every regular file in the compose file's directory is rendered as a
/// template and uploaded under the same relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackBundle {
    /// Stack name for `docker stack deploy`
    pub stack: String,
    /// Compose file, relative to the working directory
    pub compose_file: String,
    /// Rendered `(relative path, content)` pairs, compose file included
    pub files: Vec<(String, String)>,
}

impl StackBundle {
    /// Render the directory holding `compose_file`
    pub fn render(
        working_dir: &Path,
        stack: &str,
        compose_file: &str,
        values: &HashMap<String, String>,
    ) -> Result<Self> {
        let (relative_dir, _) = compose_location(compose_file)?;
        let dir = working_dir.join(relative_dir);
        if !working_dir.join(compose_file).is_file() {
            return Err(FlotillaError::MissingFile(format!(
                "{} not found",
                working_dir.join(compose_file).display()
            )));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    FlotillaError::InvalidConfig(format!("unusable file name {}", path.display()))
                })?;
            let remote_path = relative_dir.join(name);
            let remote_path = remote_path.to_str().ok_or_else(|| {
                FlotillaError::InvalidConfig(format!("unusable path {}", remote_path.display()))
            })?;
            files.push((
                remote_path.replace('\\', "/"),
                template::render_file(&path, values)?,
            ));
        }

        Ok(Self {
            stack: stack.to_string(),
            compose_file: compose_file.replace('\\', "/"),
            files,
        })
    }

    /// Upload every file and deploy the stack on `host`.
    ///
    /// Uploads are masked when `secret` is set, since rendered files may
    /// carry credentials.
    pub async fn deploy(&self, remote: &Remote, host: &str, secret: bool) -> Result<()> {
        let mut commands = Vec::with_capacity(self.files.len() + 2);

        let mut dirs: Vec<&str> = self
            .files
            .iter()
            .filter_map(|(path, _)| path.rsplit_once('/').map(|(dir, _)| dir))
            .collect();
        dirs.dedup();
        for dir in dirs {
            commands.push(RemoteCommand::new(format!("mkdir -p {}", dir)));
        }

        for (path, content) in &self.files {
            let command = upload(path, content)?;
            commands.push(if secret { command.mask_input() } else { command });
        }

        commands.push(
            RemoteCommand::sudo(format!(
                "docker stack deploy -c {} {}",
                self.compose_file, self.stack
            ))
            .titled(format!("Deploying {} stack", self.stack)),
        );

        remote.exec_all(host, &commands).await?;
        tracing::info!("{}: {} stack deployed", host, self.stack);
        Ok(())
    }
}
