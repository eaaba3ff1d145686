//! Advisory tracker over its `api/v1` endpoints.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::info;

use shepherd_core::model::advisory::package_of_nvr;
use shepherd_core::model::{
    Advisory, AdvisoryStatus, BuildManifest, Comment, PackageBuild, PushStatus, StagePush,
};
use shepherd_core::rules::TransitionRuleSet;
use shepherd_core::services::AdvisoryTracker;

use crate::http::JsonClient;

const STAGE_TARGET: &str = "cdn_stage";
const ADVISORY_KINDS: [&str; 3] = ["rhba", "rhsa", "rhea"];

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S UTC").map(|naive| naive.and_utc())
        })
        .with_context(|| format!("invalid timestamp '{raw}'"))
}

fn optional_time(value: &Value) -> Result<Option<DateTime<Utc>>> {
    value.as_str().map(parse_time).transpose()
}

/// Decode `erratum/{id}`.
///
/// # Errors
///
/// Returns an error if the advisory kind or status is unrecognized.
pub fn decode_advisory(raw: &Value, advisory_base: &str) -> Result<Advisory> {
    let details = ADVISORY_KINDS
        .iter()
        .map(|kind| &raw["errata"][kind])
        .find(|details| details.is_object())
        .context("unknown advisory type")?;
    let id = details["id"].as_u64().context("advisory without an id")?;
    let context = || format!("decode advisory {id}");

    let status = details["status"]
        .as_str()
        .unwrap_or_default()
        .parse::<AdvisoryStatus>()
        .with_context(context)?;

    let issue_keys = raw["jira_issues"]["jira_issues"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| entry["jira_issue"]["key"].as_str())
        .map(str::to_string)
        .collect();

    let mut owners: Vec<String> = ["assigned_to", "package_owner"]
        .iter()
        .filter_map(|role| raw["people"][role].as_str())
        .filter(|who| !who.is_empty())
        .map(str::to_string)
        .collect();
    owners.dedup();

    Ok(Advisory {
        id,
        name: details["fulladvisory"].as_str().unwrap_or_default().to_string(),
        url: format!("{}/advisory/{id}", advisory_base.trim_end_matches('/')),
        synopsis: details["synopsis"].as_str().unwrap_or_default().to_string(),
        status,
        issue_keys,
        owners,
        release_id: details["group_id"].as_u64(),
        publish_date: optional_time(&details["publish_date"]).with_context(context)?,
        status_updated_at: optional_time(&details["status_updated_at"]).with_context(context)?,
    })
}

/// Newest push to the staging target among `pushes`.
///
/// # Errors
///
/// Returns an error if that push has an unrecognized status.
pub fn latest_stage_push(pushes: &[Value]) -> Result<Option<StagePush>> {
    let Some(push) = pushes
        .iter()
        .filter(|push| push["target"]["name"].as_str() == Some(STAGE_TARGET))
        .max_by_key(|push| push["id"].as_u64().unwrap_or(0))
    else {
        return Ok(None);
    };
    let id = push["id"].as_u64().unwrap_or(0);
    Ok(Some(StagePush {
        id,
        status: push["status"]
            .as_str()
            .unwrap_or_default()
            .parse::<PushStatus>()
            .with_context(|| format!("decode push {id}"))?,
        updated_at: optional_time(&push["updated_at"])?,
    }))
}

/// Decode `erratum/{id}/builds_list` into one entry per package.
///
/// # Errors
///
/// Returns an error if a build name is not an NVR.
pub fn decode_manifest(raw: &Value) -> Result<BuildManifest> {
    let mut manifest = BuildManifest::new();
    for release in raw.as_object().into_iter().flat_map(serde_json::Map::values) {
        for builds in release["builds"].as_array().map(Vec::as_slice).unwrap_or_default() {
            for (nvr, variants) in builds.as_object().into_iter().flatten() {
                let package = package_of_nvr(nvr)
                    .with_context(|| format!("build '{nvr}' is not name-version-release"))?;
                let mut files: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
                for (variant, arches) in variants.as_object().into_iter().flatten() {
                    for (arch, names) in arches.as_object().into_iter().flatten() {
                        let mut names: Vec<String> = names
                            .as_array()
                            .map(Vec::as_slice)
                            .unwrap_or_default()
                            .iter()
                            .filter_map(|name| {
                                name.as_str()
                                    .or_else(|| name["filename"].as_str())
                                    .map(str::to_string)
                            })
                            .collect();
                        names.sort();
                        files
                            .entry(variant.clone())
                            .or_default()
                            .insert(arch.clone(), names);
                    }
                }
                manifest.insert(
                    package.to_string(),
                    PackageBuild {
                        nvr: nvr.clone(),
                        files,
                    },
                );
            }
        }
    }
    Ok(manifest)
}

pub struct AdvisoryTrackerClient {
    http: JsonClient,
    base_url: String,
    dry_run: bool,
}

impl AdvisoryTrackerClient {
    #[must_use]
    pub fn new(base_url: &str, token: Option<&str>, dry_run: bool) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            http: JsonClient::new(&format!("{base_url}/api/v1"), token),
            base_url,
            dry_run,
        }
    }
}

impl AdvisoryTracker for AdvisoryTrackerClient {
    fn get_advisory(&self, id: u64) -> Result<Advisory> {
        let raw: Value = self.http.get_json(&format!("erratum/{id}"), &[])?;
        decode_advisory(&raw, &self.base_url)
    }

    fn transition_rules(&self, id: u64) -> Result<TransitionRuleSet> {
        self.http
            .get_json(&format!("erratum/{id}/transition_rules"), &[])
            .with_context(|| format!("transition rules of advisory {id}"))
    }

    fn latest_stage_push(&self, id: u64) -> Result<Option<StagePush>> {
        let pushes: Vec<Value> = self.http.get_json(&format!("erratum/{id}/push"), &[])?;
        latest_stage_push(&pushes)
    }

    fn push_to_stage(&self, id: u64) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would push advisory {id} to stage");
            return Ok(());
        }
        self.http
            .post_form(&format!("erratum/{id}/push"), &[("defaults", "stage")])
            .with_context(|| format!("push advisory {id} to stage"))
    }

    fn refresh_security_alerts(&self, id: u64) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would refresh security alerts for advisory {id}");
            return Ok(());
        }
        self.http
            .post_form(&format!("erratum/{id}/security_alerts/refresh"), &[])
            .with_context(|| format!("refresh security alerts of advisory {id}"))
    }

    fn change_status(&self, id: u64, status: AdvisoryStatus) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would change status of advisory {id} to {status}");
            return Ok(());
        }
        self.http
            .post_form(
                &format!("erratum/{id}/change_state"),
                &[("new_state", status.as_str())],
            )
            .with_context(|| format!("move advisory {id} to {status}"))
    }

    fn build_manifest(&self, id: u64) -> Result<BuildManifest> {
        let raw: Value = self.http.get_json(&format!("erratum/{id}/builds_list"), &[])?;
        decode_manifest(&raw).with_context(|| format!("builds of advisory {id}"))
    }

    fn previous_advisory(&self, id: u64, package: &str) -> Result<Option<Advisory>> {
        let advisory = self.get_advisory(id)?;
        let Some(release_id) = advisory.release_id else {
            return Ok(None);
        };
        let releases: Value = self
            .http
            .get_json("releases", &[("filter[id]", &release_id.to_string())])?;
        let Some(release) = releases["data"][0]["attributes"]["name"].as_str() else {
            bail!("release {release_id} of advisory {id} not found");
        };

        let released: Option<Value> = self.http.get_json_opt(
            &format!("product_versions/{release}/released_builds/{package}"),
            &[],
        )?;
        match released.as_ref().and_then(|build| build["errata_id"].as_u64()) {
            Some(previous) if previous != id => self.get_advisory(previous).map(Some),
            _ => Ok(None),
        }
    }

    fn build_nvr(&self, id: u64, package: &str) -> Result<Option<String>> {
        Ok(self
            .build_manifest(id)?
            .remove(package)
            .map(|build| build.nvr))
    }

    fn comments(&self, id: u64) -> Result<Vec<Comment>> {
        let raw: Value = self
            .http
            .get_json("comments", &[("filter[errata_id]", &id.to_string())])?;
        raw["data"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|comment| {
                let attributes = &comment["attributes"];
                Ok(Comment {
                    id: match &comment["id"] {
                        Value::String(id) => id.clone(),
                        other => other.to_string(),
                    },
                    author: attributes["who"]["login_name"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    created: parse_time(attributes["created_at"].as_str().unwrap_or_default())?,
                    body: attributes["text"].as_str().unwrap_or_default().to_string(),
                })
            })
            .collect()
    }

    fn add_comment(&self, id: u64, body: &str) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would comment on advisory {id}: {body}");
            return Ok(());
        }
        self.http
            .post_json_unit(&format!("erratum/{id}/add_comment"), &json!({ "comment": body }))
            .with_context(|| format!("comment on advisory {id}"))
    }

    fn set_owner(&self, id: u64, identity: &str) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would assign advisory {id} to {identity}");
            return Ok(());
        }
        self.http
            .put_json(
                &format!("erratum/{id}"),
                &json!({ "advisory": { "assigned_to_email": identity } }),
            )
            .with_context(|| format!("assign advisory {id} to {identity}"))
    }
}
