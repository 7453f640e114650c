use myob_test_support::MockErp;
use serde_json::Value;
use std::io::Write as _;
use std::process::Output;
use tokio::process::Command;

fn spec_file(mock: &MockErp) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("tempfile");
    f.write_all(mock.openapi_document().as_bytes())
        .expect("write spec");
    f
}

fn command(spec: &tempfile::NamedTempFile) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_myob-tools"));
    cmd.env_clear()
        .env("MYOB_OPENAPI_PATH", spec.path())
        .env("MYOB_LOG_LEVEL", "off");
    cmd
}

fn with_credentials(cmd: &mut Command) -> &mut Command {
    cmd.env("MYOB_LOGIN_NAME", "admin")
        .env("MYOB_LOGIN_PASSWORD", "secret")
        .env("MYOB_LOGIN_COMPANY", "Company")
        .env("MYOB_LOGIN_BRANCH", "MAIN")
}

fn stdout_json(out: &Output) -> Value {
    serde_json::from_slice(&out.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}\nstderr: {}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        )
    })
}

#[tokio::test]
async fn tools_lists_builtins_and_operations() {
    let mock = MockErp::spawn().await.expect("mock");
    let spec = spec_file(&mock);

    let out = command(&spec)
        .args(["tools", "--json"])
        .output()
        .await
        .expect("run");
    assert!(out.status.success());
    let tools = stdout_json(&out);
    let names: Vec<&str> = tools
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(&names[..5], ["login", "login_raw", "logout", "ping", "echo"]);
    assert!(names.contains(&"StockItem_GetList"));
    assert!(!names.contains(&"Salesperson_GetList"));

    let out = command(&spec)
        .args(["tools", "--include-tags", "Customer", "--disable-auth-tools"])
        .output()
        .await
        .expect("run");
    let text = String::from_utf8_lossy(&out.stdout);
    assert_eq!(text.lines().count(), 1);
    assert!(text.starts_with("Customer_GetList  read"));
}

#[tokio::test]
async fn call_auto_logs_in_from_env() {
    let mock = MockErp::spawn().await.expect("mock");
    let spec = spec_file(&mock);

    let out = with_credentials(&mut command(&spec))
        .args(["call", "StockItem_GetList", "--args", r#"{"top": 3}"#, "--json"])
        .output()
        .await
        .expect("run");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let result = stdout_json(&out);
    assert_eq!(result["structuredContent"]["count"], 3);
    assert_eq!(result["isError"], false);
    assert_eq!(mock.login_posts(), 1);
}

#[tokio::test]
async fn call_without_session_exits_with_tool_failure() {
    let mock = MockErp::spawn().await.expect("mock");
    let spec = spec_file(&mock);

    let out = command(&spec)
        .env("MYOB_LOG_LEVEL", "warn")
        .args(["call", "StockItem_GetList"])
        .output()
        .await
        .expect("run");
    assert_eq!(out.status.code(), Some(2));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.starts_with("status: 401\n"));
    assert_eq!(mock.login_posts(), 0);

    let log = String::from_utf8_lossy(&out.stderr);
    assert!(log.contains("exiting with status 2"), "stderr: {log}");
    assert!(log.contains("StockItem_GetList returned an error result"));
}

#[tokio::test]
async fn missing_path_param_is_a_setup_error() {
    let mock = MockErp::spawn().await.expect("mock");
    let spec = spec_file(&mock);

    let out = command(&spec)
        .args(["call", "StockItem_GetById", "--args", "{}", "--no-auto-login"])
        .output()
        .await
        .expect("run");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Missing path param: id"));
}

#[tokio::test]
async fn login_reports_missing_fields() {
    let mock = MockErp::spawn().await.expect("mock");
    let spec = spec_file(&mock);

    let out = command(&spec)
        .args(["login", "--name", "admin", "--password", "secret", "--company", "Company"])
        .output()
        .await
        .expect("run");
    assert_eq!(out.status.code(), Some(2));
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("Missing credentials: branch."));
    assert_eq!(mock.login_posts(), 0);
}

#[tokio::test]
async fn paginate_counts_every_page() {
    let mock = MockErp::spawn().await.expect("mock");
    let spec = spec_file(&mock);

    let out = with_credentials(&mut command(&spec))
        .args(["paginate", "StockItem_GetList", "--max-pages", "5", "--select", "InventoryID,Description"])
        .output()
        .await
        .expect("run");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let acc = stdout_json(&out);
    assert_eq!(acc["count"], 130);
    assert_eq!(acc["pages"], 3);
    assert_eq!(acc["complete"], true);
    assert_eq!(acc["sample"].as_array().map(Vec::len), Some(5));
    assert_eq!(acc["sample"][0]["InventoryID"], "ITEM-0000");

    let pages = mock.requests_to("/StockItem");
    assert_eq!(pages.len(), 3);
    assert!(
        pages[2]
            .query
            .as_deref()
            .is_some_and(|q| q.contains("$skip=100") && q.contains("$select=InventoryID%2CDescription"))
    );
}

#[tokio::test]
async fn auth_mode_needs_no_document() {
    let mock = MockErp::spawn().await.expect("mock");

    let out = Command::new(env!("CARGO_BIN_EXE_myob-tools"))
        .env_clear()
        .env("MYOB_MODE", "auth")
        .env("MYOB_BASE_URL", mock.api_base())
        .env("MYOB_LOG_LEVEL", "off")
        .args(["call", "ping", "--json", "--no-auto-login"])
        .output()
        .await
        .expect("run");
    assert!(out.status.success());
    let result = stdout_json(&out);
    assert_eq!(result["structuredContent"]["baseUrl"], Value::String(mock.api_base()));
}
