//! Workflow tests for the Kamatera driver.

use std::net::Ipv4Addr;
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use super::api::{ApiRequest, ApiResponse, Method, RequestBody};
use super::*;
use crate::ssh::BootstrapError;
use crate::test_support::{ScriptedRunner, ScriptedTransport, json_server_list};

const CATALOG: &str = r#"{
    "datacenters": {"EU": "Amsterdam"},
    "cpu": ["1B", "2B"],
    "disk": [10, 20],
    "billing": ["hourly", "monthly"],
    "diskImages": {"EU": [{"description": "ubuntu_server_18.04_64-bit", "id": "EU:6000C29a", "sizeGB": 10}]},
    "networks": {},
    "traffic": {"EU": [{"id": "t5000", "info": "5TB"}]}
}"#;

struct Workspace {
    _tmp: TempDir,
    ssh: SshSettings,
}

fn workspace() -> Workspace {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().join("machines/worker"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    std::fs::create_dir_all(&root).unwrap_or_else(|err| panic!("mkdir: {err}"));
    std::fs::write(root.join("id_rsa"), "PRIVATE").unwrap_or_else(|err| panic!("key: {err}"));
    std::fs::write(root.join("id_rsa.pub"), "ssh-rsa AAAATEST worker\n")
        .unwrap_or_else(|err| panic!("pub key: {err}"));
    Workspace {
        _tmp: tmp,
        ssh: SshSettings::for_machine_dir(&root),
    }
}

fn request() -> ServerRequest {
    ServerRequest::builder()
        .datacenter("EU")
        .billing("hourly")
        .cpu("1B")
        .ram_mb(1024)
        .disk_size_gb(10)
        .image("ubuntu_server_18.04_64-bit")
        .build()
        .expect("request should build")
}

/// Name submitted in the first `serverCreate` request seen so far.
fn submitted_name(history: &[ApiRequest]) -> String {
    history
        .iter()
        .find_map(|request| match &request.body {
            RequestBody::Json(body) if request.path == "/svc/serverCreate" => body["names"]
                .get(0)
                .and_then(|name| name.as_str())
                .map(str::to_owned),
            _ => None,
        })
        .unwrap_or_default()
}

fn listing_with_submitted_server(
    power: &'static str,
) -> impl Fn(&ApiRequest, &[ApiRequest]) -> ApiResponse + Send + Sync + 'static {
    move |_, history| {
        let name = submitted_name(history);
        ApiResponse {
            status: 200,
            body: json_server_list(&[("srv-1", name.as_str(), power)]),
        }
    }
}

#[tokio::test]
async fn create_end_to_end() {
    let workspace = workspace();
    let transport = ScriptedTransport::new();
    transport.push_json(200, CATALOG);
    transport.push_json(200, "[42]");
    transport.push_json(200, r#"{"status":"running"}"#);
    transport.push_json(200, r#"{"status":"running"}"#);
    transport.push_json(
        200,
        r#"{"status":"complete","log":"Server created\nassigned 198.51.100.20 to eth0\n"}"#,
    );
    transport.push_with(listing_with_submitted_server("off"));
    transport.push_with(listing_with_submitted_server("on"));
    let runner = ScriptedRunner::new();
    runner.push_output(Some(255), "", "Connection refused");
    runner.push_success();
    let mut driver = test_driver(transport.clone(), runner.clone());
    driver.settings.ssh = workspace.ssh.clone();

    let provisioned = driver
        .create_machine(CreatePlan::Fresh(request()))
        .await
        .expect("create should succeed");

    assert_eq!(provisioned.job_id, JobId(42));
    assert_eq!(provisioned.address, Ipv4Addr::new(198, 51, 100, 20));
    assert!(provisioned.server_name.starts_with("worker-"));
    assert_eq!(provisioned.server_name.len(), "worker-".len() + 6);

    let requests = transport.requests();
    assert_eq!(requests.len(), 7);
    assert_eq!(
        requests.first().map(|request| request.path.as_str()),
        Some("/service/server")
    );
    let create = requests.get(1).expect("create request");
    assert_eq!(create.method, Method::Post);
    assert_eq!(submitted_name(&requests), provisioned.server_name);

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 2);
    let last = invocations.last().expect("ssh invocation").command_string();
    assert!(last.contains("root@198.51.100.20"), "{last}");
    assert!(last.contains("ssh-rsa AAAATEST worker"), "{last}");

    let record = driver.record();
    assert_eq!(record.server_name.as_deref(), Some(provisioned.server_name.as_str()));
    assert_eq!(record.ip_address, Some(Ipv4Addr::new(198, 51, 100, 20)));
    assert_eq!(record.create_job_id, Some(42));
}

#[tokio::test]
async fn create_rejects_request_before_submitting() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, CATALOG);
    let mut driver = test_driver(transport.clone(), ScriptedRunner::new());
    let mut small = request();
    small.ram_mb = 512;

    let err = driver
        .create_machine(CreatePlan::Fresh(small))
        .await
        .expect_err("validation should fail");

    assert!(matches!(err, DriverError::Validation(_)), "{err:?}");
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn resume_skips_submission() {
    let workspace = workspace();
    let transport = ScriptedTransport::new();
    transport.push_json(404, "");
    transport.push_json(200, r#"{"status":"complete","log":"ip 203.0.113.7 ready"}"#);
    transport.push_json(200, &json_server_list(&[("srv-5", "worker-resume", "on")]));
    let runner = ScriptedRunner::new();
    runner.push_success();
    let mut driver = test_driver(transport.clone(), runner);
    driver.settings.ssh = workspace.ssh.clone();

    let provisioned = driver
        .create_machine(CreatePlan::Resume(ResumeJob {
            job_id: JobId(900),
            server_name: String::from("worker-resume"),
            password: OneTimePassword::new("abc123def456"),
        }))
        .await
        .expect("resume should succeed");

    assert_eq!(provisioned.address, Ipv4Addr::new(203, 0, 113, 7));
    assert!(
        transport
            .requests()
            .iter()
            .all(|request| request.method == Method::Get)
    );
}

fn resume_plan() -> CreatePlan {
    CreatePlan::Resume(ResumeJob {
        job_id: JobId(900),
        server_name: String::from("worker-resume"),
        password: OneTimePassword::new("abc123def456"),
    })
}

fn short_wait() -> WaitPolicy {
    WaitPolicy {
        poll_interval: Duration::from_millis(5),
        timeout: Duration::from_millis(60),
    }
}

#[tokio::test]
async fn server_that_never_runs_times_out() {
    let workspace = workspace();
    let transport = ScriptedTransport::new();
    transport.push_json(200, r#"{"status":"complete","log":"ip 203.0.113.7 ready"}"#);
    for _ in 0..200 {
        transport.push_json(200, &json_server_list(&[("srv-5", "worker-resume", "off")]));
    }
    let runner = ScriptedRunner::new();
    let mut driver = test_driver(transport, runner.clone());
    driver.settings.ssh = workspace.ssh.clone();
    driver.settings.wait = short_wait();

    let err = driver
        .create_machine(resume_plan())
        .await
        .expect_err("a stopped server never becomes reachable");

    assert_eq!(
        err,
        DriverError::Timeout {
            action: String::from("server to reach running state")
        }
    );
    assert!(runner.invocations().is_empty());
}

#[tokio::test]
async fn unreachable_ssh_times_out_at_the_shared_deadline() {
    let workspace = workspace();
    let transport = ScriptedTransport::new();
    transport.push_json(200, r#"{"status":"complete","log":"ip 203.0.113.7 ready"}"#);
    transport.push_json(200, &json_server_list(&[("srv-5", "worker-resume", "on")]));
    let runner = ScriptedRunner::new();
    for _ in 0..200 {
        runner.push_output(Some(255), "", "Connection refused");
    }
    let mut driver = test_driver(transport, runner.clone());
    driver.settings.ssh = workspace.ssh.clone();
    driver.settings.wait = short_wait();

    let err = driver
        .create_machine(resume_plan())
        .await
        .expect_err("ssh never connects");

    assert_eq!(
        err,
        DriverError::Timeout {
            action: String::from("SSH access to 203.0.113.7")
        }
    );
    assert!(!runner.invocations().is_empty());
}

#[tokio::test]
async fn failed_remote_command_aborts_create() {
    let workspace = workspace();
    let transport = ScriptedTransport::new();
    transport.push_json(200, r#"{"status":"complete","log":"ip 203.0.113.7 ready"}"#);
    transport.push_json(200, &json_server_list(&[("srv-5", "worker-resume", "on")]));
    let runner = ScriptedRunner::new();
    runner.push_failure(1);
    runner.push_success();
    let mut driver = test_driver(transport, runner.clone());
    driver.settings.ssh = workspace.ssh.clone();

    let err = driver
        .create_machine(resume_plan())
        .await
        .expect_err("remote failure is fatal");

    assert!(
        matches!(
            err,
            DriverError::Bootstrap(BootstrapError::RemoteCommand { .. })
        ),
        "{err:?}"
    );
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(
        invocations.first().map(|invocation| invocation.program.as_str()),
        Some("sshpass")
    );
}

#[tokio::test]
async fn missing_address_in_log_fails_create() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, r#"{"status":"complete","log":"no address here"}"#);
    let mut driver = test_driver(transport, ScriptedRunner::new());

    let err = driver
        .create_machine(CreatePlan::Resume(ResumeJob {
            job_id: JobId(11),
            server_name: String::from("worker-x"),
            password: OneTimePassword::new("p"),
        }))
        .await
        .expect_err("no address should fail");

    assert_eq!(err, DriverError::MissingAddress { job_id: 11 });
}

#[tokio::test]
async fn url_requires_running_machine() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, &json_server_list(&[("srv-1", "worker-abcdef", "off")]));
    transport.push_json(200, &json_server_list(&[("srv-1", "worker-abcdef", "on")]));
    let mut driver = test_driver(transport, ScriptedRunner::new());
    driver.record.server_name = Some(String::from("worker-abcdef"));
    driver.record.ip_address = Some(Ipv4Addr::new(198, 51, 100, 20));

    let stopped = driver.url().await.expect_err("stopped machine has no URL");
    let running = driver.url().await.expect("running machine has a URL");

    assert_eq!(
        stopped,
        DriverError::NotRunning {
            state: String::from("Stopped")
        }
    );
    assert_eq!(running, "tcp://198.51.100.20:2376");
    assert_eq!(
        driver.ssh_hostname().expect("hostname"),
        "198.51.100.20"
    );
}

#[tokio::test]
async fn kill_powers_off() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, "8");
    transport.push_json(200, r#"{"status":"complete"}"#);
    let mut driver = test_driver(transport.clone(), ScriptedRunner::new());
    driver.record.server_name = Some(String::from("worker-abcdef"));
    driver.record.server_id = Some(String::from("srv-1"));

    driver.kill().await.expect("kill should stop the server");

    let requests = transport.requests();
    assert_eq!(
        requests.first().map(|request| request.body.clone()),
        Some(RequestBody::Form(vec![(
            String::from("power"),
            String::from("off")
        )]))
    );
    assert_eq!(driver.driver_name(), "kamatera");
}
