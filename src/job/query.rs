use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

use crate::error::{GenieError, Result};
use crate::job::model::JobStatus;
use crate::job::store::JobRecord;

const DEFAULT_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Id,
    Name,
    User,
    Status,
    Created,
    Updated,
}

impl FromStr for OrderBy {
    type Err = GenieError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "id" => Ok(OrderBy::Id),
            "name" => Ok(OrderBy::Name),
            "user" | "userName" => Ok(OrderBy::User),
            "status" => Ok(OrderBy::Status),
            "created" => Ok(OrderBy::Created),
            "updated" => Ok(OrderBy::Updated),
            other => Err(GenieError::Precondition(format!(
                "Cannot order jobs by {}",
                other
            ))),
        }
    }
}

impl OrderBy {
    fn compare(&self, a: &JobRecord, b: &JobRecord) -> Ordering {
        match self {
            OrderBy::Id => a.job.id.cmp(&b.job.id),
            OrderBy::Name => a.job.name.cmp(&b.job.name),
            OrderBy::User => a.job.user.cmp(&b.job.user),
            OrderBy::Status => a.job.status.cmp(&b.job.status),
            OrderBy::Created => a.job.created.cmp(&b.job.created),
            OrderBy::Updated => a.job.updated.cmp(&b.job.updated),
        }
    }
}

/// Filter, ordering and paging for job searches. Unset filters match all.
#[derive(Debug, Clone)]
pub struct JobQuery {
    pub id: Option<String>,
    /// Supports `%` as a wildcard, e.g. `HIVE%`.
    pub name: Option<String>,
    pub user: Option<String>,
    pub statuses: HashSet<JobStatus>,
    /// A job must carry all of these.
    pub tags: BTreeSet<String>,
    pub cluster_name: Option<String>,
    pub cluster_id: Option<String>,
    pub command_name: Option<String>,
    pub command_id: Option<String>,
    pub page: usize,
    pub limit: usize,
    pub descending: bool,
    pub order_by: Vec<OrderBy>,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            user: None,
            statuses: HashSet::new(),
            tags: BTreeSet::new(),
            cluster_name: None,
            cluster_id: None,
            command_name: None,
            command_id: None,
            page: 0,
            limit: DEFAULT_LIMIT,
            descending: true,
            order_by: Vec::new(),
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GenieError::Precondition(format!("Invalid value for {}: {}", key, value)))
}

fn non_blank(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl JobQuery {
    /// Build a query from URL query pairs; repeated keys accumulate.
    pub fn from_params(params: Vec<(String, String)>) -> Result<Self> {
        let mut query = JobQuery::default();
        for (key, value) in params {
            match key.as_str() {
                "id" => query.id = non_blank(value),
                "name" => query.name = non_blank(value),
                "userName" => query.user = non_blank(value),
                "status" => {
                    if !value.trim().is_empty() {
                        query.statuses.insert(value.parse()?);
                    }
                }
                "tag" => {
                    if let Some(tag) = non_blank(value) {
                        query.tags.insert(tag);
                    }
                }
                "executionClusterName" => query.cluster_name = non_blank(value),
                "executionClusterId" => query.cluster_id = non_blank(value),
                "commandName" => query.command_name = non_blank(value),
                "commandId" => query.command_id = non_blank(value),
                "page" => query.page = parse_number(&key, &value)?,
                "limit" => query.limit = parse_number(&key, &value)?,
                "descending" => query.descending = parse_number(&key, &value)?,
                "orderBy" => query.order_by.push(value.parse()?),
                _ => {}
            }
        }
        if query.limit == 0 {
            return Err(GenieError::Precondition(
                "limit must be greater than zero".to_string(),
            ));
        }
        Ok(query)
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        let job = &record.job;
        let cluster = job.execution_cluster.as_ref();

        self.id.as_ref().map_or(true, |id| &job.id == id)
            && self
                .name
                .as_ref()
                .map_or(true, |pattern| matches_pattern(pattern, &job.name))
            && self.user.as_ref().map_or(true, |user| &job.user == user)
            && (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.tags.is_subset(&job.tags)
            && self
                .cluster_name
                .as_ref()
                .map_or(true, |name| cluster.is_some_and(|c| &c.name == name))
            && self
                .cluster_id
                .as_ref()
                .map_or(true, |id| cluster.is_some_and(|c| &c.id == id))
            && self
                .command_name
                .as_ref()
                .map_or(true, |name| &job.command.name == name)
            && self
                .command_id
                .as_ref()
                .map_or(true, |id| &job.command.id == id)
    }

    /// Compare two records by the requested fields, `updated` when none given.
    pub fn compare(&self, a: &JobRecord, b: &JobRecord) -> Ordering {
        let fields: &[OrderBy] = if self.order_by.is_empty() {
            &[OrderBy::Updated]
        } else {
            &self.order_by
        };

        let ordering = fields
            .iter()
            .map(|field| field.compare(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| a.job.id.cmp(&b.job.id));

        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// SQL `LIKE` style matching where `%` matches any run of characters.
pub fn matches_pattern(pattern: &str, value: &str) -> bool {
    if !pattern.contains('%') {
        return pattern == value;
    }

    let parts: Vec<&str> = pattern.split('%').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];
    let Some(mut rest) = value.strip_prefix(first) else {
        return false;
    };

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
