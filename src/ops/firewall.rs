//! ufw command lists

use crate::remote::RemoteCommand;

/// Ports every swarm node needs open
pub const SWARM_NODE_PORTS: &[&str] = &["22/tcp", "2376/tcp", "7946/tcp", "7946/udp", "4789/udp"];

/// Manager API port
pub const MANAGER_PORT: &str = "2377/tcp";

/// Allow SSH and turn the firewall on
pub fn ssh_rules() -> Vec<RemoteCommand> {
    vec![
        RemoteCommand::sudo("ufw allow OpenSSH").titled("Allowing OpenSSH in firewall"),
        RemoteCommand::new("yes | sudo ufw enable").titled("Enabling firewall"),
        reload(),
    ]
}

/// Open the swarm ports, plus the manager port for managers
pub fn swarm_rules(manager: bool) -> Vec<RemoteCommand> {
    let mut commands: Vec<RemoteCommand> = SWARM_NODE_PORTS
        .iter()
        .map(|port| RemoteCommand::sudo(format!("ufw allow {}", port)))
        .collect();
    if let Some(first) = commands.first_mut() {
        first.title = Some("Configuring swarm firewall".to_string());
    }
    if manager {
        commands.push(RemoteCommand::sudo(format!("ufw allow {}", MANAGER_PORT)));
    }
    commands
}

/// Reload the firewall
pub fn reload() -> RemoteCommand {
    RemoteCommand::sudo("ufw reload").titled("Reloading firewall")
}

/// Reload the firewall and restart docker so it picks up the rules
pub fn reload_with_docker() -> Vec<RemoteCommand> {
    vec![
        reload(),
        RemoteCommand::sudo("systemctl restart docker").titled("Restarting docker"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shells(commands: &[RemoteCommand]) -> Vec<String> {
        commands.iter().map(|c| c.shell().into_owned()).collect()
    }

    #[test]
    fn test_worker_rules_skip_manager_port() {
        let shells = shells(&swarm_rules(false));
        assert_eq!(shells.len(), SWARM_NODE_PORTS.len());
        assert!(shells.contains(&"sudo ufw allow 4789/udp".to_string()));
        assert!(!shells.iter().any(|s| s.contains("2377")));
    }

    #[test]
    fn test_manager_rules_open_manager_port() {
        let shells = shells(&swarm_rules(true));
        assert_eq!(shells.last().map(String::as_str), Some("sudo ufw allow 2377/tcp"));
    }

    #[test]
    fn test_ssh_rules_end_with_reload() {
        let shells = shells(&ssh_rules());
        assert_eq!(
            shells,
            vec!["sudo ufw allow OpenSSH", "yes | sudo ufw enable", "sudo ufw reload"]
        );
    }
}
