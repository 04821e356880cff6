use crate::RuntimeError;
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::info;

const LAUNCHPAD_API: &str = "https://api.launchpad.net/devel";

/// Whether `location` names a remote resource rather than a local path.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn get(agent: &ureq::Agent, url: &str) -> Result<ureq::http::Response<ureq::Body>, RuntimeError> {
    match agent.get(url).call() {
        Ok(resp) => Ok(resp),
        Err(ureq::Error::StatusCode(code)) => {
            Err(RuntimeError::Fetch(format!("HTTP {code} for {url}")))
        }
        Err(e) => Err(RuntimeError::Fetch(format!("{url}: {e}"))),
    }
}

/// Download `url` into the file `dest`.
pub fn download(url: &str, dest: &Path) -> Result<(), RuntimeError> {
    info!("downloading {url}");
    let agent = ureq::Agent::new_with_defaults();
    let resp = get(&agent, url)?;
    let mut reader = resp.into_body().into_reader();
    let mut file = File::create(dest)?;
    io::copy(&mut reader, &mut file)
        .map_err(|e| RuntimeError::Fetch(format!("{url}: {e}")))?;
    Ok(())
}

/// Signing key fingerprint Launchpad publishes for the PPA `owner/name`.
pub fn ppa_fingerprint(owner: &str, name: &str) -> Result<String, RuntimeError> {
    let url = format!("{LAUNCHPAD_API}/~{owner}/+archive/ubuntu/{name}");
    let agent = ureq::Agent::new_with_defaults();
    let resp = get(&agent, &url)?;
    let body: serde_json::Value = serde_json::from_reader(resp.into_body().into_reader())
        .map_err(|e| RuntimeError::Fetch(format!("{url}: invalid response: {e}")))?;
    signing_key_fingerprint(&body)
        .ok_or_else(|| RuntimeError::Fetch(format!("{url}: no signing key fingerprint")))
}

fn signing_key_fingerprint(body: &serde_json::Value) -> Option<String> {
    body.get("signing_key_fingerprint")
        .and_then(serde_json::Value::as_str)
        .filter(|f| !f.is_empty())
        .map(str::to_owned)
}
