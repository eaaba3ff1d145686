//! Issue tracker over its REST v2 API.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, info};

use shepherd_core::cache::LookupCache;
use shepherd_core::model::{Comment, Issue, IssueBrief, IssueStatus};
use shepherd_core::services::{Attachment, IssueTracker, NewIssue};

use crate::http::{JsonClient, multipart_files};

const PAGE_SIZE: u64 = 100;

const ADVISORY_LINK_FIELD: &str = "Errata Link";
const FIXED_IN_BUILD_FIELD: &str = "Fixed in Build";
const TEST_COVERAGE_FIELD: &str = "Test Coverage";
const PRELIMINARY_TESTING_FIELD: &str = "Preliminary Testing";

const BASE_FIELDS: &[&str] = &["components", "summary", "status", "labels", "assignee"];

static NULL: Value = Value::Null;

/// Ids of the custom fields an [`Issue`] is decoded from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldIds {
    pub advisory_link: Option<String>,
    pub fixed_in_build: Option<String>,
    pub test_coverage: Option<String>,
    pub preliminary_testing: Option<String>,
}

impl FieldIds {
    fn custom(&self) -> impl Iterator<Item = &str> {
        [
            &self.advisory_link,
            &self.fixed_in_build,
            &self.test_coverage,
            &self.preliminary_testing,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
    }
}

fn field<'a>(fields: &'a Value, id: Option<&String>) -> &'a Value {
    id.map_or(&NULL, |id| &fields[id.as_str()])
}

fn text(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Tracker timestamps look like `2025-01-02T10:00:00.000+0000`.
fn parse_tracker_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|time| time.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp '{raw}'"))
}

fn decode_comments(raw: &Value) -> Result<Vec<Comment>> {
    raw["comments"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .map(|comment| {
            Ok(Comment {
                id: match &comment["id"] {
                    Value::Number(n) => n.to_string(),
                    other => other.as_str().unwrap_or_default().to_string(),
                },
                author: text(&comment["author"]["name"]).unwrap_or_default(),
                created: parse_tracker_time(comment["created"].as_str().unwrap_or_default())?,
                body: comment["body"].as_str().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Decode one issue as returned by `issue/{key}` or `search`.
///
/// # Errors
///
/// Returns an error if the status or a custom field value is unrecognized.
pub fn decode_issue(raw: &Value, ids: &FieldIds, browse_base: &str) -> Result<Issue> {
    let key = raw["key"].as_str().context("issue without a key")?.to_string();
    let fields = &raw["fields"];
    let context = || format!("decode issue {key}");

    let status = fields["status"]["name"]
        .as_str()
        .with_context(|| format!("issue {key} has no status"))?
        .parse::<IssueStatus>()
        .with_context(context)?;

    let preliminary_testing = field(fields, ids.preliminary_testing.as_ref())["value"]
        .as_str()
        .map(str::parse)
        .transpose()
        .with_context(context)?;

    let test_coverage = field(fields, ids.test_coverage.as_ref())
        .as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(|value| value["value"].as_str())
                .map(str::parse)
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .with_context(context)?;

    Ok(Issue {
        url: format!("{}/browse/{key}", browse_base.trim_end_matches('/')),
        summary: fields["summary"].as_str().unwrap_or_default().to_string(),
        status,
        labels: fields["labels"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        components: fields["components"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|component| component["name"].as_str())
            .map(str::to_string)
            .collect(),
        advisory_link: text(field(fields, ids.advisory_link.as_ref())),
        fixed_in_build: text(field(fields, ids.fixed_in_build.as_ref())),
        test_coverage,
        preliminary_testing,
        assignee: text(&fields["assignee"]["name"]),
        comments: decode_comments(&fields["comment"]).with_context(context)?,
        key,
    })
}

pub struct IssueTrackerClient {
    http: JsonClient,
    browse_base: String,
    cache: LookupCache,
    dry_run: bool,
}

impl IssueTrackerClient {
    #[must_use]
    pub fn new(base_url: &str, token: Option<&str>, dry_run: bool) -> Self {
        let browse_base = base_url.trim_end_matches('/').to_string();
        Self {
            http: JsonClient::new(&format!("{browse_base}/rest/api/2"), token),
            browse_base,
            cache: LookupCache::new(),
            dry_run,
        }
    }

    fn field_ids(&self) -> Result<FieldIds> {
        let load = || -> Result<BTreeMap<String, String>> {
            let fields: Vec<Value> = self.http.get_json("field", &[])?;
            Ok(fields
                .iter()
                .filter_map(|f| Some((f["name"].as_str()?.to_string(), f["id"].as_str()?.to_string())))
                .collect())
        };
        Ok(FieldIds {
            advisory_link: self.cache.field_id(ADVISORY_LINK_FIELD, load)?,
            fixed_in_build: self.cache.field_id(FIXED_IN_BUILD_FIELD, load)?,
            test_coverage: self.cache.field_id(TEST_COVERAGE_FIELD, load)?,
            preliminary_testing: self.cache.field_id(PRELIMINARY_TESTING_FIELD, load)?,
        })
    }

    fn search_raw(&self, jql: &str, fields: &[&str], limit: Option<u64>) -> Result<Vec<Value>> {
        let mut found = Vec::new();
        let mut start_at = 0_u64;
        loop {
            let page: Value = self.http.post_json(
                "search",
                &json!({
                    "jql": jql,
                    "startAt": start_at,
                    "maxResults": limit.unwrap_or(PAGE_SIZE),
                    "fields": fields,
                }),
            )?;
            let issues = page["issues"].as_array().cloned().unwrap_or_default();
            let fetched = issues.len() as u64;
            found.extend(issues);
            start_at += fetched;

            let total = page["total"].as_u64().unwrap_or(0);
            if limit.is_some() || fetched == 0 || start_at >= total {
                break;
            }
        }
        debug!(query = jql, count = found.len(), "search finished");
        Ok(found)
    }

    fn account_for(&self, user: &str) -> Result<Option<String>> {
        self.cache.user(user, || {
            let users: Vec<Value> = self
                .http
                .get_json("user/search", &[("username", user)])?;
            Ok(users.first().and_then(|found| text(&found["name"])))
        })
    }

    fn update_labels(&self, key: &str, op: &str, label: &str, comment: Option<&str>) -> Result<()> {
        let mut update = json!({ "labels": [{ op: label }] });
        if let Some(body) = comment {
            update["comment"] = json!([{ "add": { "body": body } }]);
        }
        self.http
            .put_json(&format!("issue/{key}"), &json!({ "update": update }))
            .with_context(|| format!("{op} label {label} on {key}"))
    }
}

impl IssueTracker for IssueTrackerClient {
    fn search_issues(&self, query: &str) -> Result<Vec<Issue>> {
        let ids = self.field_ids()?;
        let fields: Vec<&str> = BASE_FIELDS.iter().copied().chain(ids.custom()).collect();
        self.search_raw(query, &fields, None)?
            .iter()
            .map(|raw| decode_issue(raw, &ids, &self.browse_base))
            .collect()
    }

    fn get_issue(&self, key: &str) -> Result<Issue> {
        let ids = self.field_ids()?;
        let fields: Vec<&str> = BASE_FIELDS
            .iter()
            .copied()
            .chain(ids.custom())
            .chain(["comment"])
            .collect();
        let raw: Value = self
            .http
            .get_json(&format!("issue/{key}"), &[("fields", &fields.join(","))])?;
        decode_issue(&raw, &ids, &self.browse_base)
    }

    fn issue_briefs(&self, keys: &[String]) -> Result<Vec<IssueBrief>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let jql = format!("key in ({})", keys.join(","));
        self.search_raw(&jql, &["status", "assignee"], None)?
            .iter()
            .map(|raw| {
                let key = raw["key"].as_str().context("issue without a key")?.to_string();
                let status = raw["fields"]["status"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .parse::<IssueStatus>()
                    .with_context(|| format!("decode issue {key}"))?;
                Ok(IssueBrief {
                    assignee: text(&raw["fields"]["assignee"]["name"]),
                    key,
                    status,
                })
            })
            .collect()
    }

    fn add_label(&self, key: &str, label: &str, comment: Option<&str>) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would add label {label} to {key}");
            return Ok(());
        }
        self.update_labels(key, "add", label, comment)
    }

    fn remove_label(&self, key: &str, label: &str) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would remove label {label} from {key}");
            return Ok(());
        }
        self.update_labels(key, "remove", label, None)
    }

    fn add_comment(&self, key: &str, body: &str) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would comment on {key}: {body}");
            return Ok(());
        }
        self.http
            .post_json_unit(&format!("issue/{key}/comment"), &json!({ "body": body }))
            .with_context(|| format!("comment on {key}"))
    }

    fn update_comment(&self, key: &str, comment_id: &str, body: &str) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would update comment {comment_id} on {key}");
            return Ok(());
        }
        self.http
            .put_json(
                &format!("issue/{key}/comment/{comment_id}"),
                &json!({ "body": body }),
            )
            .with_context(|| format!("update comment {comment_id} on {key}"))
    }

    fn change_status(&self, key: &str, status: IssueStatus, comment: &str) -> Result<()> {
        if self.dry_run {
            info!("Dry run: would change status of {key} to {status}");
            return Ok(());
        }
        let available: Value = self.http.get_json(
            &format!("issue/{key}/transitions"),
            &[("expand", "transitions.fields")],
        )?;
        let Some(transition) = available["transitions"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .find(|t| t["to"]["name"].as_str() == Some(status.as_str()))
        else {
            bail!("no transition to '{status}' is available for {key}");
        };

        let fields = transition["fields"].as_object();
        let required: Vec<&str> = fields
            .into_iter()
            .flatten()
            .filter(|(name, schema)| {
                name.as_str() != "comment"
                    && schema["required"].as_bool() == Some(true)
                    && schema["hasDefaultValue"].as_bool() != Some(true)
            })
            .map(|(name, _)| name.as_str())
            .collect();
        if !required.is_empty() {
            bail!(
                "transition of {key} to '{status}' requires fields: {}",
                required.join(", ")
            );
        }

        let takes_comment = fields.is_some_and(|fields| fields.contains_key("comment"));
        let mut body = json!({ "transition": { "id": transition["id"] } });
        if takes_comment {
            body["update"] = json!({ "comment": [{ "add": { "body": comment } }] });
        }
        self.http
            .post_json_unit(&format!("issue/{key}/transitions"), &body)
            .with_context(|| format!("move {key} to {status}"))?;
        if !takes_comment {
            self.add_comment(key, comment)?;
        }
        Ok(())
    }

    fn add_attachments(&self, key: &str, attachments: &[Attachment]) -> Result<()> {
        if self.dry_run {
            let names: Vec<&str> = attachments.iter().map(|a| a.name.as_str()).collect();
            info!("Dry run: would attach {} to {key}", names.join(", "));
            return Ok(());
        }
        let boundary = format!("shepherd-{:016x}", rand::random::<u64>());
        let files: Vec<(&str, &str)> = attachments
            .iter()
            .map(|a| (a.name.as_str(), a.content.as_str()))
            .collect();
        let content_type = format!("multipart/form-data; boundary={boundary}");
        self.http
            .post_bytes(
                &format!("issue/{key}/attachments"),
                &[("X-Atlassian-Token", "no-check"), ("Content-Type", &content_type)],
                &multipart_files(&boundary, &files),
            )
            .with_context(|| format!("attach files to {key}"))
    }

    fn find_by_tag(
        &self,
        project: &str,
        tag: &str,
        with_label: Option<&str>,
    ) -> Result<Option<Issue>> {
        let mut jql = format!(
            "project = {project} AND status NOT IN (Done, Closed) AND description ~ \"\\\"{tag}\\\"\""
        );
        if let Some(label) = with_label {
            jql.push_str(&format!(" AND labels = {label}"));
        }
        let found = self.search_raw(&jql, &["summary"], Some(2))?;
        match found.as_slice() {
            [] => Ok(None),
            [only] => {
                let key = only["key"].as_str().context("issue without a key")?;
                self.get_issue(key).map(Some)
            }
            _ => bail!("more than one open issue in {project} is tagged {tag}"),
        }
    }

    fn create_issue(&self, issue: &NewIssue) -> Result<String> {
        if self.dry_run {
            info!("Dry run: would create issue in {}: {}", issue.project, issue.summary);
            return Ok(format!("{}-DRYRUN", issue.project));
        }
        let mut fields = json!({
            "project": { "key": issue.project },
            "summary": issue.summary,
            "description": issue.description,
            "issuetype": { "name": "Task" },
            "labels": issue.labels,
        });
        if let Some(user) = &issue.assignee {
            let account = self
                .account_for(user)?
                .with_context(|| format!("no tracker account for {user}"))?;
            fields["assignee"] = json!({ "name": account });
        }
        let created: Value = self
            .http
            .post_json("issue", &json!({ "fields": fields }))
            .with_context(|| format!("create issue in {}", issue.project))?;
        let key = created["key"].as_str().context("created issue has no key")?;
        info!(key, "created issue");
        Ok(key.to_string())
    }
}
