//! Per-resource-type cache hints.
//!
//! Hints describe how filter parameters on a resource type can be evaluated
//! against cached objects without asking the server. The registry is built once
//! at startup, either from the built-in Datatracker table or from a JSON file,
//! and every resource type that is queried must be registered.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CacheError, ResourceUri};

/// Default name of the modification-time field used for incremental sync.
pub const DEFAULT_TIME_FIELD: &str = "time";

fn default_time_field() -> String {
    DEFAULT_TIME_FIELD.to_string()
}

/// Static cache configuration for one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHints {
    /// Reference fields matched by fetching the referenced object and comparing
    /// the named field on it.
    #[serde(default)]
    pub deref: BTreeMap<String, String>,
    /// Reference fields matched by the id suffix of the referenced URI.
    #[serde(default)]
    pub trim: BTreeSet<String>,
    /// Fields giving a stable order over objects of this type.
    #[serde(default)]
    pub sort_by: Vec<String>,
    /// Whether the stable order is descending.
    #[serde(default)]
    pub reverse: bool,
    /// Whether the type can be refreshed incrementally by modification time.
    #[serde(default)]
    pub timed: bool,
    /// Field used for `__gte`/`__lt` time-range refreshes.
    #[serde(default = "default_time_field")]
    pub time_field: String,
}

impl Default for CacheHints {
    fn default() -> Self {
        Self {
            deref: BTreeMap::new(),
            trim: BTreeSet::new(),
            sort_by: vec!["id".to_string()],
            reverse: false,
            timed: false,
            time_field: default_time_field(),
        }
    }
}

impl CacheHints {
    /// Build hints from literal slices.
    pub fn new(
        deref: &[(&str, &str)],
        trim: &[&str],
        sort_by: &[&str],
        reverse: bool,
        timed: bool,
    ) -> Self {
        Self {
            deref: deref
                .iter()
                .map(|(field, remote)| (field.to_string(), remote.to_string()))
                .collect(),
            trim: trim.iter().map(|f| f.to_string()).collect(),
            sort_by: sort_by.iter().map(|f| f.to_string()).collect(),
            reverse,
            timed,
            time_field: default_time_field(),
        }
    }

    /// Parameter name selecting objects modified at or after a time.
    pub fn time_gte_param(&self) -> String {
        format!("{}__gte", self.time_field)
    }

    /// Parameter name selecting objects modified before a time.
    pub fn time_lt_param(&self) -> String {
        format!("{}__lt", self.time_field)
    }

    /// Drop the time-range parameters from a query, giving the key under which
    /// the query is recorded as satisfied.
    pub fn query_key(&self, query: &ResourceUri) -> ResourceUri {
        let gte = self.time_gte_param();
        let lt = self.time_lt_param();
        query.without_params(&[gte.as_str(), lt.as_str()])
    }
}

/// Registry of cache hints keyed by resource type path.
#[derive(Debug, Clone, Default)]
pub struct HintsRegistry {
    hints: HashMap<String, CacheHints>,
}

impl HintsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register hints for a resource type path.
    pub fn with(mut self, type_path: &str, hints: CacheHints) -> Result<Self, CacheError> {
        self.insert(type_path, hints)?;
        Ok(self)
    }

    /// Register hints for a resource type path, replacing any existing entry.
    pub fn insert(&mut self, type_path: &str, hints: CacheHints) -> Result<(), CacheError> {
        let uri = ResourceUri::new(type_path)?;
        self.hints.insert(uri.path().to_string(), hints);
        Ok(())
    }

    /// Look up the hints for a resource type.
    pub fn get(&self, type_uri: &ResourceUri) -> Result<&CacheHints, CacheError> {
        self.hints
            .get(type_uri.path())
            .ok_or_else(|| CacheError::UnknownResourceType {
                path: type_uri.path().to_string(),
            })
    }

    /// Whether a resource type is registered.
    pub fn contains(&self, type_path: &str) -> bool {
        self.hints.contains_key(type_path)
    }

    /// Number of registered resource types.
    pub fn len(&self) -> usize {
        self.hints.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Registered type paths in sorted order.
    pub fn type_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.hints.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Load a registry from a JSON object mapping type paths to hints.
    pub fn from_json_str(json: &str) -> Result<Self, CacheError> {
        let table: BTreeMap<String, CacheHints> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        for (path, hints) in table {
            registry.insert(&path, hints)?;
        }
        Ok(registry)
    }

    /// Load a registry from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, CacheError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Hints for every resource type served by the IETF Datatracker.
    pub fn datatracker() -> Self {
        let mut hints = HashMap::new();
        for (path, deref, trim, sort_by, reverse, timed) in DATATRACKER_HINTS {
            hints.insert(
                path.to_string(),
                CacheHints::new(deref, trim, sort_by, *reverse, *timed),
            );
        }
        Self { hints }
    }
}

type HintRow = (
    &'static str,
    &'static [(&'static str, &'static str)],
    &'static [&'static str],
    &'static [&'static str],
    bool,
    bool,
);

#[rustfmt::skip]
const DATATRACKER_HINTS: &[HintRow] = &[
    ("/api/v1/doc/ballotdocevent/",                 &[("doc", "id")],      &["ballot_type", "by"],                                   &["id"],               false, true),
    ("/api/v1/doc/ballottype/",                     &[],                   &["doc_type"],                                            &["order", "id"],      false, false),
    ("/api/v1/doc/docalias/",                       &[],                   &[],                                                      &["id"],               false, false),
    ("/api/v1/doc/docevent/",                       &[("doc", "id")],      &["by"],                                                  &["id"],               true,  true),
    ("/api/v1/doc/document/",                       &[],                   &["type", "stream", "group"],                             &["id"],               false, true),
    ("/api/v1/doc/documentauthor/",                 &[("document", "id")], &["email", "person"],                                     &["order", "id"],      false, false),
    ("/api/v1/doc/relateddocument/",                &[("source", "id"), ("target", "id"), ("relationship", "slug")], &[],            &["id"],               false, false),
    ("/api/v1/doc/state/",                          &[],                   &["type"],                                                &["order", "id", "slug"], false, false),
    ("/api/v1/doc/statetype/",                      &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/group/changestategroupevent/",        &[],                   &["by", "group", "state"],                                &["order", "id"],      false, true),
    ("/api/v1/group/group/",                        &[],                   &["parent", "state"],                                     &["id"],               false, true),
    ("/api/v1/group/groupevent/",                   &[],                   &["by", "group"],                                         &["id"],               true,  true),
    ("/api/v1/group/grouphistory/",                 &[],                   &["group", "parent", "state"],                            &["id"],               false, true),
    ("/api/v1/group/groupmilestone/",               &[],                   &["group", "state"],                                      &["id"],               false, true),
    ("/api/v1/group/groupmilestonehistory/",        &[],                   &["group", "milestone", "state"],                         &["id"],               false, true),
    ("/api/v1/group/groupurl/",                     &[],                   &["group"],                                               &["id"],               false, false),
    ("/api/v1/group/milestonegroupevent/",          &[],                   &["by", "group", "milestone"],                            &["id"],               true,  true),
    ("/api/v1/group/role/",                         &[],                   &["email", "group", "name", "person"],                    &["id"],               false, false),
    ("/api/v1/group/rolehistory/",                  &[],                   &["email", "group", "name", "person"],                    &["id"],               false, false),
    ("/api/v1/ipr/genericiprdisclosure/",           &[],                   &["by", "state"],                                         &["order", "id"],      false, true),
    ("/api/v1/ipr/holderiprdisclosure/",            &[],                   &["by", "licensing", "state"],                            &["order", "id"],      false, true),
    ("/api/v1/ipr/iprdisclosurebase/",              &[],                   &["by", "state"],                                         &["order", "id"],      false, true),
    ("/api/v1/ipr/thirdpartyiprdisclosure/",        &[],                   &["by", "state"],                                         &["order", "id"],      false, true),
    ("/api/v1/mailinglists/list/",                  &[],                   &[],                                                      &["id"],               false, false),
    ("/api/v1/mailinglists/subscribed/",            &[],                   &["lists"],                                               &["id"],               false, true),
    ("/api/v1/meeting/meeting/",                    &[],                   &["type"],                                                &["id"],               false, false),
    ("/api/v1/meeting/schedtimesessassignment/",    &[],                   &["schedule"],                                            &["id"],               false, false),
    ("/api/v1/meeting/schedule/",                   &[],                   &[],                                                      &["id"],               false, false),
    ("/api/v1/meeting/schedulingevent/",            &[],                   &["session", "by"],                                       &["id"],               false, true),
    ("/api/v1/meeting/session/",                    &[],                   &["meeting", "group", "group_parent"],                    &["id"],               false, false),
    ("/api/v1/meeting/timeslot/",                   &[],                   &[],                                                      &["id"],               false, true),
    ("/api/v1/message/announcementfrom/",           &[],                   &["group", "name"],                                       &["id"],               false, false),
    ("/api/v1/message/message/",                    &[("related_doc", "id")], &["by"],                                               &["id"],               false, true),
    ("/api/v1/message/sendqueue/",                  &[],                   &["by", "message"],                                       &["id"],               false, true),
    ("/api/v1/name/ballotpositionname/",            &[],                   &[],                                                      &["order", "slug"],    false, false),
    ("/api/v1/name/docrelationshipname/",           &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/doctypename/",                   &[],                   &[],                                                      &["order", "slug"],    false, false),
    ("/api/v1/name/groupmilestonestatename/",       &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/groupstatename/",                &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/grouptypename/",                 &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/meetingtypename/",               &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/iprdisclosurestatename/",        &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/iprlicensetypename/",            &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/reviewassignmentstatename/",     &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/reviewresultname/",              &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/reviewtypename/",                &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/reviewrequeststatename/",        &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/rolename/",                      &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/sessionstatusname/",             &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/name/streamname/",                    &[],                   &[],                                                      &["slug"],             false, false),
    ("/api/v1/person/alias/",                       &[],                   &["person"],                                              &["id"],               false, false),
    ("/api/v1/person/email/",                       &[],                   &["person"],                                              &["address"],          false, true),
    ("/api/v1/person/historicalemail/",             &[],                   &["person"],                                              &["history_id"],       true,  true),
    ("/api/v1/person/historicalperson/",            &[],                   &["person"],                                              &["history_id"],       true,  true),
    ("/api/v1/person/person/",                      &[],                   &[],                                                      &["id"],               false, true),
    ("/api/v1/person/personevent/",                 &[],                   &["person"],                                              &["id"],               false, true),
    ("/api/v1/review/historicalreviewassignment/",  &[],                   &["result", "review_request", "reviewer", "state"],       &["id"],               false, false),
    ("/api/v1/review/historicalreviewersettings/",  &[],                   &["person", "team"],                                      &["order", "id"],      false, false),
    ("/api/v1/review/historicalreviewrequest/",     &[("doc", "id")],      &["requested_by", "state", "team", "type"],               &["order", "id"],      false, false),
    ("/api/v1/review/historicalunavailableperiod/", &[],                   &["person", "team"],                                      &["id"],               false, false),
    ("/api/v1/review/nextreviewerinteam/",          &[],                   &["team"],                                                &["id"],               false, false),
    ("/api/v1/review/reviewassignment/",            &[],                   &["result", "review_request", "reviewer", "state"],       &["id"],               false, false),
    ("/api/v1/review/reviewersettings/",            &[],                   &["person", "team"],                                      &["id"],               false, false),
    ("/api/v1/review/reviewrequest/",               &[("doc", "id")],      &["requested_by", "state", "team", "type"],               &["id"],               false, true),
    ("/api/v1/review/reviewsecretarysettings/",     &[],                   &["person", "team"],                                      &["order", "id"],      false, false),
    ("/api/v1/review/reviewteamsettings/",          &[],                   &["group"],                                               &["id"],               false, false),
    ("/api/v1/review/reviewwish/",                  &[("doc", "id")],      &["person", "team"],                                      &["id"],               false, true),
    ("/api/v1/review/unavailableperiod/",           &[],                   &["person", "team"],                                      &["order", "id"],      false, false),
    ("/api/v1/stats/meetingregistration/",          &[],                   &["meeting", "person"],                                   &["id"],               false, false),
    ("/api/v1/submit/submission/",                  &[],                   &[],                                                      &["order", "id"],      false, false),
    ("/api/v1/submit/submissionevent/",             &[],                   &["by", "submission"],                                    &["order", "id"],      false, true),
];
