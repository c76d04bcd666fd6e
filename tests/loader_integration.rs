use pagecheck::loader::{PageLoader, PageSource};
use pagecheck::{HarnessError, MockSpec};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;

struct TestSandbox {
    root: PathBuf,
}

impl TestSandbox {
    fn new(prefix: &str) -> Result<Self, Box<dyn Error>> {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let root = std::env::temp_dir().join(format!(
            "pagecheck-{prefix}-{}-{nanos}",
            std::process::id()
        ));
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self) -> &Path {
        &self.root
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), Box<dyn Error>> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Drop for TestSandbox {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

async fn http_get(url: &str) -> Result<(reqwest::StatusCode, String), Box<dyn Error>> {
    let client = reqwest::Client::builder().no_proxy().build()?;
    let response = client.get(url).send().await?;
    let status = response.status();
    Ok((status, response.text().await?))
}

#[tokio::test]
async fn served_page_copies_designated_assets_and_serves_them() -> Result<(), Box<dyn Error>> {
    let pages = TestSandbox::new("loader-served")?;
    pages.write("toolshed.html", "<h1>Ops Toolshed</h1>")?;
    pages.write("toolshed.js", "console.log('toolshed');")?;
    pages.write("secret-notes.txt", "not designated")?;

    let loader = PageLoader::new(
        pages.path(),
        PageSource::served("toolshed.html", &["toolshed.js"]),
        MockSpec::default(),
    );
    let prepared = loader.prepare().await?;

    let entry = prepared.urls().entry.clone();
    assert!(entry.starts_with("http://127.0.0.1:"), "{entry}");
    assert!(entry.ends_with("/toolshed.html"), "{entry}");

    let (status, page) = http_get(&entry).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(page, "<h1>Ops Toolshed</h1>");

    let (status, script) = http_get(&prepared.urls().resolve(Some("toolshed.js"))).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(script, "console.log('toolshed');");

    let (status, _) = http_get(&prepared.urls().resolve(Some("secret-notes.txt"))).await?;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

    let problems = prepared.release().await;
    assert!(problems.is_empty(), "{problems:?}");
    Ok(())
}

#[tokio::test]
async fn release_frees_port_and_removes_staging_dir() -> Result<(), Box<dyn Error>> {
    let pages = TestSandbox::new("loader-release")?;
    pages.write("index.html", "<p>hi</p>")?;

    let prepared = PageLoader::new(
        pages.path(),
        PageSource::served("index.html", &[]),
        MockSpec::default(),
    )
    .prepare()
    .await?;
    let staging = prepared
        .staging_dir()
        .ok_or("served page should have a staging dir")?
        .to_path_buf();
    let host = prepared
        .urls()
        .base
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string();
    assert!(staging.join("index.html").is_file());

    let problems = prepared.release().await;
    assert!(problems.is_empty(), "{problems:?}");
    assert!(!staging.exists(), "staging dir left behind: {}", staging.display());
    assert!(
        TcpStream::connect(&host).await.is_err(),
        "port {host} still accepting connections"
    );
    Ok(())
}

#[tokio::test]
async fn empty_asset_list_stages_whole_pages_dir() -> Result<(), Box<dyn Error>> {
    let pages = TestSandbox::new("loader-whole")?;
    pages.write("settings.html", "<h1>Settings</h1>")?;
    pages.write("features/feedback-modal.js", "window.feedbackModalFeature = {};")?;

    let prepared = PageLoader::new(
        pages.path(),
        PageSource::served("settings.html", &[]),
        MockSpec::default(),
    )
    .prepare()
    .await?;

    let (status, nested) =
        http_get(&prepared.urls().resolve(Some("features/feedback-modal.js"))).await?;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert!(nested.contains("window.feedbackModalFeature"), "{nested}");

    let problems = prepared.release().await;
    assert!(problems.is_empty(), "{problems:?}");
    Ok(())
}

#[tokio::test]
async fn missing_asset_fails_naming_the_file() -> Result<(), Box<dyn Error>> {
    let pages = TestSandbox::new("loader-missing")?;
    pages.write("toolshed.html", "<h1>Ops Toolshed</h1>")?;

    let result = PageLoader::new(
        pages.path(),
        PageSource::served("toolshed.html", &["toolshed.js", "style.css"]),
        MockSpec::default(),
    )
    .prepare()
    .await;

    match result {
        Err(HarnessError::MissingAsset { path }) => {
            assert_eq!(path, pages.path().join("toolshed.js"));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected missing asset error"),
    }
    Ok(())
}

#[tokio::test]
async fn file_source_builds_file_url_without_server() -> Result<(), Box<dyn Error>> {
    let pages = TestSandbox::new("loader-file")?;
    pages.write("settings.html", "<h1>Settings</h1>")?;

    let prepared = PageLoader::new(
        pages.path(),
        PageSource::file("settings.html"),
        MockSpec::default(),
    )
    .prepare()
    .await?;

    let urls = prepared.urls().clone();
    assert!(urls.entry.starts_with("file://"), "{}", urls.entry);
    assert!(urls.entry.ends_with("/settings.html"), "{}", urls.entry);
    assert!(urls.resolve(Some("toolshed.html")).ends_with("/toolshed.html"));
    assert!(prepared.staging_dir().is_none());
    assert!(prepared.release().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn fixed_port_in_use_is_a_server_error() -> Result<(), Box<dyn Error>> {
    let pages = TestSandbox::new("loader-port")?;
    pages.write("index.html", "<p>hi</p>")?;
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = occupied.local_addr()?.port();

    let result = PageLoader::new(
        pages.path(),
        PageSource::Served {
            entry: "index.html".into(),
            assets: Vec::new(),
            port: Some(port),
        },
        MockSpec::default(),
    )
    .prepare()
    .await;

    match result {
        Err(err) => assert_eq!(err.category(), "server", "{err}"),
        Ok(_) => panic!("expected bind failure on occupied port {port}"),
    }
    Ok(())
}

#[tokio::test]
async fn file_url_percent_encodes_special_directory_names() -> Result<(), Box<dyn Error>> {
    let pages = TestSandbox::new("loader-encoding")?;
    pages.write("extension pages#v2?100%/settings.html", "<h1>Settings</h1>")?;

    let prepared = PageLoader::new(
        pages.path().join("extension pages#v2?100%"),
        PageSource::file("settings.html"),
        MockSpec::default(),
    )
    .prepare()
    .await?;

    let entry = prepared.urls().entry.clone();
    assert!(
        entry.ends_with("/extension%20pages%23v2%3F100%25/settings.html"),
        "{entry}"
    );
    assert!(!entry.contains('#'), "{entry}");
    let parsed = url::Url::parse(&entry)?;
    assert_eq!(parsed.fragment(), None);
    let on_disk = parsed
        .to_file_path()
        .map_err(|()| format!("not a file url: {entry}"))?;
    assert!(on_disk.is_file(), "{}", on_disk.display());

    let sibling = prepared.urls().resolve(Some("toolshed.html"));
    assert!(sibling.ends_with("%25/toolshed.html"), "{sibling}");
    assert!(prepared.release().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn served_pages_stage_under_scratch_dir_and_leave_nothing() -> Result<(), Box<dyn Error>> {
    let pages = TestSandbox::new("loader-scratch")?;
    pages.write("site/index.html", "<p>hi</p>")?;
    let scratch = pages.path().join("scratch");

    let prepared = PageLoader::new(
        pages.path().join("site"),
        PageSource::served("index.html", &[]),
        MockSpec::default(),
    )
    .with_scratch_dir(Some(scratch.clone()))
    .prepare()
    .await?;
    let staging = prepared
        .staging_dir()
        .ok_or("served page should have a staging dir")?
        .to_path_buf();
    assert!(staging.starts_with(&scratch), "{}", staging.display());

    let problems = prepared.release().await;
    assert!(problems.is_empty(), "{problems:?}");
    assert_eq!(fs::read_dir(&scratch)?.count(), 0);
    Ok(())
}
