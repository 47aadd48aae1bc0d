//! Shared test fixtures: an on-disk build tree and an in-process mock remote.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::builds::config::{BUILD_PUBLISHER, CONFIG_FILE};
use crate::builds::{
    BuildMetadata, ChildBuild, FsBuildStore, ProjectConfig, PublisherEntry, read_metadata,
    write_metadata,
};
use crate::persistence::write_atomic;
use crate::status::StatusTracker;
use crate::target::TargetSettings;
use crate::transfer::{RECEIPT_HEADER, RemoteEndpoint};
use crate::types::{
    BuildKey, BuildResult, ProjectKind, ProjectName, StatusRecord, TargetName,
};
use crate::worker::{PostActions, WorkerContext, WorkerOptions};

// ─── Build tree ───

/// A local build server job tree in a temporary directory.
pub struct BuildTree {
    root: TempDir,
    state: TempDir,
}

impl BuildTree {
    pub fn new() -> Self {
        BuildTree {
            root: tempfile::tempdir().unwrap(),
            state: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn state_dir(&self) -> &Path {
        self.state.path()
    }

    pub fn store(&self) -> FsBuildStore {
        FsBuildStore::new(self.root.path())
    }

    pub fn project(&self, name: &str, kind: ProjectKind) {
        let dir = self.store().project_dir(&ProjectName::new(name));
        let config = serde_json::to_vec_pretty(&ProjectConfig::new(kind)).unwrap();
        write_atomic(&dir.join(CONFIG_FILE), &config).unwrap();
    }

    /// Adds a build-publisher entry to an existing project.
    pub fn publisher_settings(&self, name: &str, target: &str, unstable: bool, failed: bool) {
        let dir = self.store().project_dir(&ProjectName::new(name));
        let mut config = crate::builds::config::read_config(&dir).unwrap();
        let settings = serde_json::json!({
            "target": target,
            "publish_unstable": unstable,
            "publish_failed": failed,
        });
        config.publishers.push(PublisherEntry {
            kind: BUILD_PUBLISHER.to_string(),
            settings: settings.as_object().unwrap().clone(),
        });
        write_atomic(
            &dir.join(CONFIG_FILE),
            &serde_json::to_vec_pretty(&config).unwrap(),
        )
        .unwrap();
    }

    pub fn build(&self, name: &str, number: u64, result: Option<BuildResult>, files: &[(&str, &str)]) {
        let dir = self.store().build_dir(&BuildKey::new(name, number));
        let mut metadata = BuildMetadata::new(number);
        metadata.result = result;
        write_metadata(&dir, &metadata).unwrap();

        for (path, contents) in files {
            let file = dir.join(path);
            std::fs::create_dir_all(file.parent().unwrap()).unwrap();
            std::fs::write(file, contents).unwrap();
        }
    }

    pub fn composite_build(
        &self,
        name: &str,
        number: u64,
        result: Option<BuildResult>,
        children: &[(&str, u64)],
    ) {
        let dir = self.store().build_dir(&BuildKey::new(name, number));
        let mut metadata = BuildMetadata::new(number);
        metadata.result = result;
        metadata.children = children
            .iter()
            .map(|(item, n)| ChildBuild {
                item: item.to_string(),
                number: (*n).into(),
            })
            .collect();
        write_metadata(&dir, &metadata).unwrap();
        std::fs::write(dir.join("log"), "composite log").unwrap();
    }

    pub fn set_status(&self, name: &str, number: u64, record: StatusRecord) {
        let dir = self.store().build_dir(&BuildKey::new(name, number));
        let mut metadata = read_metadata(&dir).unwrap();
        metadata.publishing.insert(record.target.clone(), record);
        write_metadata(&dir, &metadata).unwrap();
    }

    pub fn status(&self, name: &str, number: u64, target: &str) -> Option<StatusRecord> {
        let dir = self.store().build_dir(&BuildKey::new(name, number));
        let mut metadata = read_metadata(&dir).unwrap();
        metadata
            .publishing
            .remove(&TargetName::parse(target).unwrap())
    }

    pub fn context(&self, recovery_window: Duration) -> WorkerContext {
        self.context_with(recovery_window, PostActions::new())
    }

    pub fn context_with(&self, recovery_window: Duration, post_actions: PostActions) -> WorkerContext {
        WorkerContext {
            store: Arc::new(self.store()),
            tracker: Arc::new(StatusTracker::new()),
            post_actions,
            options: WorkerOptions {
                recovery_window,
                request_timeout: Duration::from_secs(5),
                ..WorkerOptions::default()
            },
            state_dir: self.state.path().to_path_buf(),
        }
    }
}

pub fn target_settings(name: &str, url: &str) -> TargetSettings {
    TargetSettings {
        name: TargetName::parse(name).unwrap(),
        endpoint: RemoteEndpoint {
            url: Url::parse(url).unwrap(),
            credentials: None,
        },
    }
}

// ─── Mock remote ───

/// A request the mock remote received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A build archive the mock remote accepted.
#[derive(Debug, Clone)]
pub struct ReceivedBuild {
    pub project: String,
    pub entries: Vec<String>,
    pub build_id: Option<String>,
}

#[derive(Debug, Clone)]
enum Receipt {
    Echo,
    Omit,
    Fixed(String),
}

struct Scripted {
    method: String,
    path: String,
    status: u16,
    remaining: usize,
}

struct MockState {
    projects: Mutex<BTreeSet<String>>,
    configs: Mutex<BTreeMap<String, Vec<u8>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    received: Mutex<Vec<ReceivedBuild>>,
    scripted: Mutex<Vec<Scripted>>,
    redirects: Mutex<HashMap<String, String>>,
    login: Mutex<Option<(String, String)>>,
    receipt: Mutex<Receipt>,
    hold_builds: Mutex<bool>,
}

/// An in-process remote server speaking the publish protocol.
pub struct MockRemote {
    state: Arc<MockState>,
    url: Url,
    task: JoinHandle<()>,
}

impl MockRemote {
    pub async fn start() -> Self {
        let state = Arc::new(MockState {
            projects: Mutex::default(),
            configs: Mutex::default(),
            requests: Mutex::default(),
            received: Mutex::default(),
            scripted: Mutex::default(),
            redirects: Mutex::default(),
            login: Mutex::default(),
            receipt: Mutex::new(Receipt::Echo),
            hold_builds: Mutex::new(false),
        });
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockRemote {
            state,
            url: Url::parse(&format!("http://{addr}/")).unwrap(),
            task,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn endpoint(&self) -> RemoteEndpoint {
        RemoteEndpoint {
            url: self.url.clone(),
            credentials: None,
        }
    }

    pub fn settings(&self, name: &str) -> TargetSettings {
        target_settings(name, self.url.as_str())
    }

    pub fn add_project(&self, name: &str) {
        self.state.projects.lock().unwrap().insert(name.to_string());
    }

    pub fn has_project(&self, name: &str) -> bool {
        self.state.projects.lock().unwrap().contains(name)
    }

    /// The last configuration sent for a project.
    pub fn config(&self, name: &str) -> Option<serde_json::Value> {
        self.state
            .configs
            .lock()
            .unwrap()
            .get(name)
            .map(|b| serde_json::from_slice(b).unwrap())
    }

    /// Answers the next `times` matching requests with `status`.
    pub fn fail_next(&self, method: &str, path: &str, status: u16, times: usize) {
        self.state.scripted.lock().unwrap().push(Scripted {
            method: method.to_string(),
            path: path.to_string(),
            status,
            remaining: times,
        });
    }

    /// Redirects every request for `from` to `to`.
    pub fn redirect(&self, from: &str, to: &str) {
        self.state
            .redirects
            .lock()
            .unwrap()
            .insert(from.to_string(), to.to_string());
    }

    pub fn require_login(&self, login: &str, password: &str) {
        *self.state.login.lock().unwrap() = Some((login.to_string(), password.to_string()));
    }

    pub fn omit_receipt(&self) {
        *self.state.receipt.lock().unwrap() = Receipt::Omit;
    }

    pub fn fixed_receipt(&self, project: &str) {
        *self.state.receipt.lock().unwrap() = Receipt::Fixed(project.to_string());
    }

    pub fn echo_receipt(&self) {
        *self.state.receipt.lock().unwrap() = Receipt::Echo;
    }

    /// Keeps build uploads hanging until released.
    pub fn hold_builds(&self, hold: bool) {
        *self.state.hold_builds.lock().unwrap() = hold;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn received_builds(&self) -> Vec<ReceivedBuild> {
        self.state.received.lock().unwrap().clone()
    }
}

impl Drop for MockRemote {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let query = uri.query().map(str::to_string);
    let header_list: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        query: query.clone(),
        headers: header_list,
        body: body.to_vec(),
    });

    if let Some(status) = take_scripted(&state, method.as_str(), &path) {
        return respond(status, "scripted failure");
    }
    if let Some(to) = state.redirects.lock().unwrap().get(&path).cloned() {
        return Response::builder()
            .status(StatusCode::TEMPORARY_REDIRECT)
            .header("location", to)
            .body(Body::empty())
            .unwrap();
    }

    let params = query.as_deref().map(parse_form).unwrap_or_default();
    let login = state.login.lock().unwrap().clone();

    match (method.as_str(), path.as_str()) {
        ("GET", "/loginEntry") => return respond(200, "login"),
        ("POST", "/j_security_check") => {
            let form = parse_form(&String::from_utf8_lossy(&body));
            let ok = login.as_ref().is_some_and(|(user, pass)| {
                form.get("j_username") == Some(user) && form.get("j_password") == Some(pass)
            });
            if !ok {
                return respond(401, "bad credentials");
            }
            return Response::builder()
                .status(StatusCode::OK)
                .header("set-cookie", "mock-session=ok; Path=/")
                .body(Body::from("logged in"))
                .unwrap();
        }
        _ => {}
    }

    if login.is_some() {
        let authenticated = headers
            .get_all("cookie")
            .iter()
            .any(|v| v.to_str().unwrap_or_default().contains("mock-session=ok"));
        if !authenticated {
            return respond(403, "login required");
        }
    }

    match (method.as_str(), path.as_str()) {
        ("GET", "/") => respond(200, "remote"),
        ("POST", "/createItem") => {
            let Some(name) = params.get("name") else {
                return respond(400, "missing name");
            };
            if !state.projects.lock().unwrap().insert(name.clone()) {
                return respond(400, "project exists");
            }
            state
                .configs
                .lock()
                .unwrap()
                .insert(name.clone(), body.to_vec());
            respond(200, "created")
        }
        (_, p) if p.starts_with("/job/") => {
            let segments: Vec<String> = p["/job/".len()..]
                .split('/')
                .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
                .collect();
            let (action, project) = segments.split_last().unwrap();
            let project = project.join("/");
            job(&state, method.as_str(), &project, action, &params, &headers, &body).await
        }
        _ => respond(404, "not found"),
    }
}

async fn job(
    state: &MockState,
    method: &str,
    project: &str,
    action: &str,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Response {
    let exists = state.projects.lock().unwrap().contains(project);
    if !exists {
        return respond(404, "no such project");
    }

    match (method, action) {
        ("GET", "") => respond(200, "project"),
        ("POST", "config-accept") => {
            state
                .configs
                .lock()
                .unwrap()
                .insert(project.to_string(), body.to_vec());
            respond(200, "updated")
        }
        ("POST", "module-accept") => {
            let Some(item) = params.get("name") else {
                return respond(400, "missing name");
            };
            let child = format!("{project}/{item}");
            state.projects.lock().unwrap().insert(child.clone());
            state.configs.lock().unwrap().insert(child, body.to_vec());
            respond(200, "module accepted")
        }
        ("POST", "build-accept") => {
            while state.holding_builds() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            let mut archive = tar::Archive::new(body.as_ref());
            let entries = archive
                .entries()
                .unwrap()
                .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
                .collect();
            state.received.lock().unwrap().push(ReceivedBuild {
                project: project.to_string(),
                entries,
                build_id: headers
                    .get("x-build-id")
                    .map(|v| v.to_str().unwrap().to_string()),
            });

            let short = project.rsplit('/').next().unwrap_or(project).to_string();
            let receipt = match state.receipt.lock().unwrap().clone() {
                Receipt::Echo => Some(short),
                Receipt::Omit => None,
                Receipt::Fixed(name) => Some(name),
            };
            let mut response = Response::builder().status(StatusCode::OK);
            if let Some(receipt) = receipt {
                response = response.header(RECEIPT_HEADER, receipt);
            }
            response.body(Body::from("received")).unwrap()
        }
        _ => respond(404, "unknown action"),
    }
}

impl MockState {
    fn holding_builds(&self) -> bool {
        *self.hold_builds.lock().unwrap()
    }
}

fn take_scripted(state: &MockState, method: &str, path: &str) -> Option<u16> {
    let mut scripted = state.scripted.lock().unwrap();
    let entry = scripted
        .iter_mut()
        .find(|s| s.remaining > 0 && s.method == method && s.path == path)?;
    entry.remaining -= 1;
    Some(entry.status)
}

fn respond(status: u16, body: &'static str) -> Response {
    Response::builder()
        .status(status)
        .body(Body::from(body))
        .unwrap()
}

fn parse_form(s: &str) -> HashMap<String, String> {
    s.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_form(k), decode_form(v))
        })
        .collect()
}

fn decode_form(s: &str) -> String {
    percent_decode_str(&s.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_form_decodes_plus_and_escapes() {
        let form = parse_form("name=my+app&x=a%26b&flag");
        assert_eq!(form["name"], "my app");
        assert_eq!(form["x"], "a&b");
        assert_eq!(form["flag"], "");
    }

    #[test]
    fn build_tree_writes_loadable_records() {
        use crate::builds::BuildStore;

        let tree = BuildTree::new();
        tree.project("app", ProjectKind::Plain);
        tree.publisher_settings("app", "public", true, false);
        tree.build("app", 1, None, &[("a/b.txt", "x")]);

        let store = tree.store();
        let settings = store
            .project_config(&ProjectName::new("app"))
            .unwrap()
            .publisher_settings()
            .unwrap();
        assert!(settings.publish_unstable);
        let build = store.resolve(&BuildKey::new("app", 1)).unwrap().unwrap();
        assert_eq!(build.result, BuildResult::NotBuilt);
        assert!(build.root_dir.join("a/b.txt").is_file());
    }
}
