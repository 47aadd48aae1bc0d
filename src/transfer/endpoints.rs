//! Remote endpoint URLs.
//!
//! All endpoints hang off the target's base URL. Project names become path
//! segments under `job/`, one segment per level, percent-encoded as needed.

use reqwest::Url;

use super::error::{Result, TransferError};
use crate::types::ProjectName;

/// Returns `{base}/createItem?name={project}`.
pub fn create_item(base: &Url, project: &ProjectName) -> Result<Url> {
    let mut url = under_base(base, &["createItem"])?;
    url.query_pairs_mut().append_pair("name", project.as_str());
    Ok(url)
}

/// Returns `{base}/job/{project}/config-accept`.
pub fn config_accept(base: &Url, project: &ProjectName) -> Result<Url> {
    job(base, project, "config-accept")
}

/// Returns `{base}/job/{project}/module-accept?name={item}`.
pub fn module_accept(base: &Url, project: &ProjectName, item: &str) -> Result<Url> {
    let mut url = job(base, project, "module-accept")?;
    url.query_pairs_mut().append_pair("name", item);
    Ok(url)
}

/// Returns `{base}/job/{project}/build-accept`.
pub fn build_accept(base: &Url, project: &ProjectName) -> Result<Url> {
    job(base, project, "build-accept")
}

/// Returns `{base}/job/{project}/`, used to probe whether a project exists.
pub fn project(base: &Url, project: &ProjectName) -> Result<Url> {
    job(base, project, "")
}

/// Returns `{base}/loginEntry`.
pub fn login_entry(base: &Url) -> Result<Url> {
    under_base(base, &["loginEntry"])
}

/// Returns `{base}/j_security_check`.
pub fn security_check(base: &Url) -> Result<Url> {
    under_base(base, &["j_security_check"])
}

fn job(base: &Url, project: &ProjectName, action: &str) -> Result<Url> {
    let mut segments = vec!["job"];
    segments.extend(project.segments());
    segments.push(action);
    under_base(base, &segments)
}

fn under_base(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|()| TransferError::invalid_url(base.as_str(), "URL cannot be a base"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
