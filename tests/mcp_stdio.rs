use std::path::{Path, PathBuf};

use docsift::{ConfigDb, config_db};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let docs_dir = data_dir.join("docs");
    std::fs::create_dir_all(&docs_dir)?;
    std::fs::write(
        docs_dir.join("hello.md"),
        "Hello world. Greetings from the test fixture.\n",
    )?;
    std::fs::write(
        docs_dir.join("soup.txt"),
        "Simmer the onions slowly. Add stock and salt.\n",
    )?;

    let config_db = ConfigDb::open(&data_dir.join("config.redb"))?;
    config_db.set_setting(config_db::ROOT_KEY, docs_dir.to_str().unwrap())?;
    config_db.set_setting(config_db::EMBEDDER_KEY, "hash")?;

    Ok(())
}

#[tokio::test]
async fn mcp_stdio_sync_and_search_roundtrip()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = docsift_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp").env("DOCSIFT_DATA_DIR", tempdir.path());
        }),
    )?;

    let client = ().serve(transport).await?;

    let sync = client
        .peer()
        .call_tool(CallToolRequestParams::new("docsift_sync"))
        .await?;
    let report = sync.structured_content.expect("sync report");
    assert_eq!(report.get("added").and_then(|v| v.as_u64()), Some(2));

    let args = json!({
        "query": "hello world greetings",
        "limit": 5
    });
    let result = client
        .peer()
        .call_tool(CallToolRequestParams::new("docsift_search").with_arguments(args.as_object().unwrap().clone()))
        .await?;

    let structured = result.structured_content.expect("structured content");
    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");

    assert!(!results.is_empty());
    assert_eq!(
        results[0].get("filename").and_then(|v| v.as_str()),
        Some("hello.md")
    );
    assert_eq!(results[0].get("rank").and_then(|v| v.as_u64()), Some(1));

    let status = client
        .peer()
        .call_tool(CallToolRequestParams::new("docsift_status"))
        .await?;
    let stats = status.structured_content.expect("status");
    assert_eq!(stats.get("documents").and_then(|v| v.as_u64()), Some(2));

    client.cancel().await?;
    Ok(())
}

fn docsift_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docsift") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docsift");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
