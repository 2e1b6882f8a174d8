#![allow(clippy::unwrap_used)]
// Guest command execution: exit-code and output-file judgement.
//
// Output files are served by wiremock standing in for the ESXi host's
// guest file transfer endpoint. Tests that download run on the real
// clock so the HTTP client's own timeout is not auto-advanced.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::time::Instant;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vmsteward_api::fake::{Call, FakeConnector, FakeControlPlane, Script};
use vmsteward_api::{GuestProcessId, GuestProcessInfo, ProgramSpec};
use vmsteward_core::{
    CommandSuccess, Connection, ConnectionConfig, CoreError, GuestCommand, GuestOsInterface,
};

// ── Helpers ─────────────────────────────────────────────────────────

const PID: u64 = 4242;

async fn setup() -> (FakeControlPlane, GuestOsInterface) {
    let plane = FakeControlPlane::new();
    plane.add_vm("win-01", "vm-1");
    plane.set_launch_pid(PID);

    let config = ConnectionConfig::new("vcenter.lab", "svc", SecretString::from("pw".to_string()));
    let conn = Connection::connect(Arc::new(FakeConnector::new(plane.clone())), &config)
        .await
        .unwrap();
    let guest = GuestOsInterface::new(
        Arc::new(conn),
        "win-01",
        "Administrator",
        SecretString::from("guest-pw".to_string()),
    )
    .await
    .unwrap();
    (plane, guest)
}

fn exited(code: i32) -> Vec<GuestProcessInfo> {
    vec![GuestProcessInfo {
        pid: GuestProcessId(PID),
        exit_code: Some(code),
    }]
}

fn running() -> Vec<GuestProcessInfo> {
    vec![GuestProcessInfo {
        pid: GuestProcessId(PID),
        exit_code: None,
    }]
}

/// Serve `body` as the staged output file and point the fake at it.
async fn serve_output(plane: &FakeControlPlane, status: u16, body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/guestFile"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;
    let url = Url::parse(&format!("{}/guestFile?id=17&token=t", server.uri())).unwrap();
    plane.set_download_url(Some(url));
    server
}

fn install_command() -> GuestCommand {
    GuestCommand::new(r"C:\Windows\System32\cmd.exe", "/c install.bat")
        .description("install agent")
        .output_file(r"C:\Temp\install.log")
        .success_outputs(["Installed", "Already installed"])
}

fn transfers(plane: &FakeControlPlane) -> usize {
    plane.count(|c| matches!(c, Call::InitiateFileTransfer(_)))
}

// ── Launch ──────────────────────────────────────────────────────────

#[tokio::test]
async fn launch_appends_output_redirect() {
    let (plane, guest) = setup().await;

    guest.run_command_and_check_result(&install_command()).await.unwrap();

    let started: Vec<ProgramSpec> = plane
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::StartProgram(spec) => Some(spec),
            _ => None,
        })
        .collect();
    assert_eq!(
        started,
        vec![ProgramSpec {
            program_path: r"C:\Windows\System32\cmd.exe".into(),
            arguments: r"/c install.bat > C:\Temp\install.log".into(),
        }]
    );
}

#[tokio::test]
async fn zero_pid_is_launch_failure() {
    let (plane, guest) = setup().await;
    plane.set_launch_pid(0);

    let err = guest
        .run_command_and_check_result(&install_command())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::GuestOs { .. }), "got {err:?}");
    assert_eq!(plane.count(|c| matches!(c, Call::ListProcesses(_))), 0);
}

#[tokio::test]
async fn launch_error_is_guest_os_error() {
    let (plane, guest) = setup().await;
    plane.fail_launch_with(vmsteward_api::Error::GuestOperation {
        message: "InvalidGuestLogin".into(),
    });

    let err = guest
        .run_command_and_check_result(&install_command())
        .await
        .unwrap_err();

    assert!(
        matches!(&err, CoreError::GuestOs { message } if message.contains("InvalidGuestLogin")),
        "got {err:?}"
    );
}

// ── Exit codes ──────────────────────────────────────────────────────

#[tokio::test]
async fn exit_code_zero_succeeds_with_or_without_output_file() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(exited(0)));

    let with_file = guest.run_command_and_check_result(&install_command()).await.unwrap();
    let bare = GuestCommand::new("/bin/sh", "-c true");
    let without_file = guest.run_command_and_check_result(&bare).await.unwrap();

    assert_eq!(with_file, CommandSuccess::ExitCode);
    assert_eq!(without_file, CommandSuccess::ExitCode);
    assert_eq!(transfers(&plane), 0);
}

#[tokio::test]
async fn non_zero_exit_without_output_file_is_unknown_result() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(exited(3)));

    let command = GuestCommand::new("/bin/sh", "-c false").success_output("ok");
    let err = guest.run_command_and_check_result(&command).await.unwrap_err();

    assert!(
        matches!(err, CoreError::ProcessUnknownResult { exit_code: 3, .. }),
        "got {err:?}"
    );
    assert_eq!(transfers(&plane), 0);
}

#[tokio::test]
async fn empty_process_list_is_guest_os_error() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(Vec::new()));

    let err = guest
        .run_command_and_check_result(&install_command())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::GuestOs { .. }), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn running_process_is_polled_until_exit() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::after(running(), 3, exited(0)));

    let start = Instant::now();
    let result = guest.run_command_and_check_result(&install_command()).await.unwrap();

    assert_eq!(result, CommandSuccess::ExitCode);
    assert_eq!(start.elapsed(), Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn process_still_running_past_timeout_is_guest_timeout() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(running()));

    let command = install_command().timeout(Duration::from_secs(20));
    let start = Instant::now();
    let err = guest.run_command_and_check_result(&command).await.unwrap_err();

    assert!(matches!(err, CoreError::GuestOsTimeout { .. }), "got {err:?}");
    assert_eq!(start.elapsed(), Duration::from_secs(25));
}

// ── Output inspection ───────────────────────────────────────────────

#[tokio::test]
async fn matching_output_succeeds() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(exited(1)));
    let _server = serve_output(&plane, 200, "  Agent Already installed\r\n").await;

    let result = guest.run_command_and_check_result(&install_command()).await.unwrap();

    assert_eq!(
        result,
        CommandSuccess::MatchedOutput("Already installed".into())
    );
    assert_eq!(
        plane.count(|c| *c == Call::InitiateFileTransfer(r"C:\Temp\install.log".into())),
        1
    );
}

#[tokio::test]
async fn unexpected_output_is_bad_output_with_content() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(exited(1603)));
    let _server = serve_output(&plane, 200, "Fatal error during installation.\r\n").await;

    let err = guest
        .run_command_and_check_result(&install_command())
        .await
        .unwrap_err();

    match err {
        CoreError::BadOutput {
            output, exit_code, ..
        } => {
            assert_eq!(output, "Fatal error during installation.");
            assert_eq!(exit_code, 1603);
        }
        other => panic!("expected BadOutput, got {other:?}"),
    }
}

#[tokio::test]
async fn blank_output_declared_acceptable_is_ambiguous() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(exited(1)));
    let _server = serve_output(&plane, 200, "\r\n \r\n").await;

    let command = install_command().success_output("");
    let err = guest.run_command_and_check_result(&command).await.unwrap_err();

    assert!(matches!(err, CoreError::AmbiguousResult { .. }), "got {err:?}");
}

#[tokio::test]
async fn blank_output_not_declared_is_bad_output() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(exited(1)));
    let _server = serve_output(&plane, 200, "").await;

    let err = guest
        .run_command_and_check_result(&install_command())
        .await
        .unwrap_err();

    assert!(
        matches!(&err, CoreError::BadOutput { output, .. } if output.is_empty()),
        "got {err:?}"
    );
}

#[tokio::test]
async fn non_200_download_is_bad_state() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(exited(1)));
    let _server = serve_output(&plane, 404, "").await;

    let err = guest
        .run_command_and_check_result(&install_command())
        .await
        .unwrap_err();

    assert!(
        matches!(&err, CoreError::BadState { message } if message.contains("404: Not Found")),
        "got {err:?}"
    );
}

#[tokio::test]
async fn missing_download_url_is_guest_os_error() {
    let (plane, guest) = setup().await;
    plane.set_process_script(Script::constant(exited(1)));
    plane.set_download_url(None);

    let err = guest
        .run_command_and_check_result(&install_command())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::GuestOs { .. }), "got {err:?}");
}
