#![allow(dead_code)]

use shellmux::config::{
    CommandConfig, ConfigFile, ConnectionSection, CoordinatorSection, RawConfigFile,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(host: &str) -> Self {
        Self {
            config: RawConfigFile {
                connection: ConnectionSection {
                    host: host.to_string(),
                    user: None,
                    port: None,
                    ssh_program: "ssh".to_string(),
                    options: Vec::new(),
                    control_path: None,
                },
                coordinator: CoordinatorSection::default(),
                commands: Vec::new(),
            },
        }
    }

    pub fn user(mut self, user: &str) -> Self {
        self.config.connection.user = Some(user.to_string());
        self
    }

    pub fn ssh_option(mut self, option: &str) -> Self {
        self.config.connection.options.push(option.to_string());
        self
    }

    pub fn refresh_interval(mut self, value: &str) -> Self {
        self.config.coordinator.refresh_interval = value.to_string();
        self
    }

    pub fn poll_timeout(mut self, value: &str) -> Self {
        self.config.coordinator.poll_timeout = value.to_string();
        self
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.config.commands.push(CommandConfig {
            cmd: cmd.to_string(),
        });
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}
