//! Binary entry point for the Kamatera driver CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kamatera_driver::config::ConfigError;
use kamatera_driver::kamatera::api::{ApiClient, HttpTransport, RetryPolicy};
use kamatera_driver::ssh::ProcessCommandRunner;
use kamatera_driver::store::StoreError;
use kamatera_driver::{
    DriverError, KamateraConfig, KamateraDriver, MachineDriver, MachineStore,
};

use cli::{Cli, CreateCommand, MachineArgs};

type Driver = KamateraDriver<HttpTransport, ProcessCommandRunner>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("machine store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to initialise the Kamatera API client: {0}")]
    Transport(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Create(command) => exec_create(command).await,
        Cli::Remove(args) => exec_remove(&args).await,
        Cli::Start(args) => {
            let mut session = Session::open(&load_config()?, &args.machine)?;
            let outcome = session.driver.start().await;
            session.persist(outcome)
        }
        Cli::Stop(args) => {
            let mut session = Session::open(&load_config()?, &args.machine)?;
            let outcome = session.driver.stop().await;
            session.persist(outcome)
        }
        Cli::Restart(args) => {
            let mut session = Session::open(&load_config()?, &args.machine)?;
            let outcome = session.driver.restart().await;
            session.persist(outcome)
        }
        Cli::Kill(args) => {
            let mut session = Session::open(&load_config()?, &args.machine)?;
            let outcome = session.driver.kill().await;
            session.persist(outcome)
        }
        Cli::State(args) => {
            let session = Session::open(&load_config()?, &args.machine)?;
            let state = session.driver.state().await?;
            writeln!(io::stdout(), "{state}")?;
            Ok(())
        }
        Cli::Url(args) => {
            let session = Session::open(&load_config()?, &args.machine)?;
            let url = session.driver.url().await?;
            writeln!(io::stdout(), "{url}")?;
            Ok(())
        }
        Cli::SshHostname(args) => {
            let session = Session::open(&load_config()?, &args.machine)?;
            let hostname = session.driver.ssh_hostname()?;
            writeln!(io::stdout(), "{hostname}")?;
            Ok(())
        }
    }
}

async fn exec_create(command: CreateCommand) -> Result<(), CliError> {
    let mut config = load_config()?;
    apply_create_overrides(&mut config, &command);
    let mut session = Session::open(&config, &command.target.machine)?;
    let plan = config.create_plan()?;

    let outcome = session.driver.create_machine(plan).await;
    let provisioned = session.persist(outcome)?;
    info!(
        server = %provisioned.server_name,
        address = %provisioned.address,
        "machine created"
    );
    Ok(())
}

async fn exec_remove(args: &MachineArgs) -> Result<(), CliError> {
    let mut session = Session::open(&load_config()?, &args.machine)?;
    let outcome = session.driver.remove_machine().await;
    let job_id = session.persist(outcome)?;
    session.store.remove(&args.machine)?;
    info!(command_id = %job_id, "removal requested");
    Ok(())
}

fn load_config() -> Result<KamateraConfig, CliError> {
    let config = KamateraConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(config)
}

/// Folds the `create` flags into the loaded configuration.
fn apply_create_overrides(config: &mut KamateraConfig, command: &CreateCommand) {
    if let Some(datacenter) = &command.datacenter {
        config.datacenter.clone_from(datacenter);
    }
    if let Some(cpu) = &command.cpu {
        config.cpu.clone_from(cpu);
    }
    if let Some(ram) = command.ram {
        config.ram = ram;
    }
    if let Some(disk_size) = command.disk_size {
        config.disk_size = disk_size;
    }
    if let Some(image) = &command.image {
        config.image.clone_from(image);
    }
    if let Some(billing) = &command.billing {
        config.billing.clone_from(billing);
    }
    if !command.tags.is_empty() {
        let mut tags = config.tag_list();
        tags.extend(command.tags.iter().cloned());
        config.tags = Some(tags.join(","));
    }
    if command.resume_job_id.is_some() {
        config.create_server_command_id = command.resume_job_id;
    }
}

/// One machine's driver plus the store its record lives in.
struct Session {
    store: MachineStore,
    driver: Driver,
}

impl Session {
    fn open(config: &KamateraConfig, machine: &str) -> Result<Self, CliError> {
        let store = MachineStore::new(config.storage_root());
        let machine_dir = store.machine_dir(machine)?;
        let record = store.load(machine)?;
        let transport = HttpTransport::new(config.api_url.clone(), config.credentials())
            .map_err(|err| CliError::Transport(err.to_string()))?;
        let driver = KamateraDriver::new(
            ApiClient::new(transport, RetryPolicy::standard()),
            ProcessCommandRunner,
            config.driver_settings(machine, &machine_dir),
            record,
        );
        Ok(Self { store, driver })
    }

    /// Saves the record whatever the outcome, then surfaces the outcome.
    fn persist<T>(&self, outcome: Result<T, DriverError>) -> Result<T, CliError> {
        let saved = self.store.save(self.driver.record());
        let value = outcome?;
        saved?;
        Ok(value)
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use kamatera_driver::config::DEFAULT_IMAGE;
    use rstest::rstest;

    fn base_config() -> KamateraConfig {
        KamateraConfig {
            api_client_id: String::from("client"),
            api_secret: String::from("secret"),
            api_url: String::from("https://console.example.test"),
            datacenter: String::from("EU"),
            billing: String::from("hourly"),
            traffic: None,
            cpu: String::from("1B"),
            ram: 1024,
            disk_size: 10,
            extra_disk_sizes: None,
            image: String::from(DEFAULT_IMAGE),
            create_server_command_id: None,
            resume_server_name: None,
            resume_password: None,
            private_network_name: None,
            private_network_ip: None,
            script: None,
            script_file: None,
            extra_sshkey: None,
            extra_sshkey_file: None,
            userdata: None,
            userdata_file: None,
            tags: Some(String::from("team-a")),
            storage_path: String::from("/tmp/kamatera-driver"),
            poll_interval_secs: 2,
            wait_timeout_secs: 1800,
            power_attempts: 3,
        }
    }

    fn create_command() -> CreateCommand {
        CreateCommand {
            target: MachineArgs {
                machine: String::from("worker"),
            },
            datacenter: None,
            cpu: None,
            ram: None,
            disk_size: None,
            image: None,
            billing: None,
            tags: Vec::new(),
            resume_job_id: None,
        }
    }

    #[test]
    fn cli_definition_names_this_binary() {
        use clap::CommandFactory;

        let command = Cli::command();
        command.clone().debug_assert();

        assert_eq!(command.get_name(), "kamatera-driver");
        let subcommands: Vec<_> = command.get_subcommands().map(|sub| sub.get_name()).collect();
        assert_eq!(
            subcommands,
            vec![
                "create",
                "remove",
                "start",
                "stop",
                "restart",
                "kill",
                "state",
                "url",
                "ssh-hostname"
            ]
        );
    }

    #[test]
    fn overrides_leave_config_untouched_when_absent() {
        let mut config = base_config();
        apply_create_overrides(&mut config, &create_command());
        assert_eq!(config, base_config());
    }

    #[test]
    fn overrides_replace_sizing_and_append_tags() {
        let mut config = base_config();
        let command = CreateCommand {
            datacenter: Some(String::from("US-NY2")),
            cpu: Some(String::from("2B")),
            ram: Some(4096),
            disk_size: Some(30),
            billing: Some(String::from("monthly")),
            tags: vec![String::from("ci"), String::from("nightly")],
            resume_job_id: Some(77),
            ..create_command()
        };

        apply_create_overrides(&mut config, &command);

        assert_eq!(config.datacenter, "US-NY2");
        assert_eq!(config.cpu, "2B");
        assert_eq!(config.ram, 4096);
        assert_eq!(config.disk_size, 30);
        assert_eq!(config.billing, "monthly");
        assert_eq!(config.tag_list(), vec!["team-a", "ci", "nightly"]);
        assert_eq!(config.create_server_command_id, Some(77));
    }

    #[rstest]
    #[case::not_running(
        CliError::Driver(DriverError::NotRunning { state: String::from("Stopped") }),
        "Stopped"
    )]
    #[case::transport(CliError::Transport(String::from("tls")), "API client: tls")]
    fn write_error_renders_message(#[case] err: CliError, #[case] needle: &str) {
        let mut buf = Vec::new();
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains(needle), "rendered: {rendered}");
    }
}
